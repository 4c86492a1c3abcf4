//! Journal event model
//!
//! Every write appends one entry tagged with the session's current
//! transaction id. Entries are never updated; a rollback discards them along
//! with the rest of the relational transaction.

use crate::error::RepositoryError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeAdded,
    NodeRemoved,
    NodeMoved,
    PropertyAdded,
    PropertyChanged,
    PropertyRemoved,
    Locked,
    Unlocked,
    LockRefreshed,
    AccessControlPolicyChanged,
    AccessControlPolicyRemoved,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeAdded => "NODE_ADDED",
            EventType::NodeRemoved => "NODE_REMOVED",
            EventType::NodeMoved => "NODE_MOVED",
            EventType::PropertyAdded => "PROPERTY_ADDED",
            EventType::PropertyChanged => "PROPERTY_CHANGED",
            EventType::PropertyRemoved => "PROPERTY_REMOVED",
            EventType::Locked => "LOCKED",
            EventType::Unlocked => "UNLOCKED",
            EventType::LockRefreshed => "LOCK_REFRESHED",
            EventType::AccessControlPolicyChanged => "ACCESS_CONTROL_POLICY_CHANGED",
            EventType::AccessControlPolicyRemoved => "ACCESS_CONTROL_POLICY_REMOVED",
        }
    }

    pub fn is_property_event(&self) -> bool {
        matches!(
            self,
            EventType::PropertyAdded | EventType::PropertyChanged | EventType::PropertyRemoved
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "NODE_ADDED" => EventType::NodeAdded,
            "NODE_REMOVED" => EventType::NodeRemoved,
            "NODE_MOVED" => EventType::NodeMoved,
            "PROPERTY_ADDED" => EventType::PropertyAdded,
            "PROPERTY_CHANGED" => EventType::PropertyChanged,
            "PROPERTY_REMOVED" => EventType::PropertyRemoved,
            "LOCKED" => EventType::Locked,
            "UNLOCKED" => EventType::Unlocked,
            "LOCK_REFRESHED" => EventType::LockRefreshed,
            "ACCESS_CONTROL_POLICY_CHANGED" => EventType::AccessControlPolicyChanged,
            "ACCESS_CONTROL_POLICY_REMOVED" => EventType::AccessControlPolicyRemoved,
            other => {
                return Err(RepositoryError::Serialization(format!(
                    "unknown journal event type: {}",
                    other
                )))
            }
        })
    }
}

/// An event about to be journaled
#[derive(Debug, Clone)]
pub struct JournalEvent {
    pub event_type: EventType,
    pub item_id: String,
    pub item_path: String,
    pub primary_type: Option<String>,
    pub property_name: Option<String>,
    pub info: Option<serde_json::Value>,
    pub source_path: Option<String>,
    pub destination_path: Option<String>,
}

impl JournalEvent {
    pub fn new(event_type: EventType, item_id: &str, item_path: &str) -> Self {
        Self {
            event_type,
            item_id: item_id.to_string(),
            item_path: item_path.to_string(),
            primary_type: None,
            property_name: None,
            info: None,
            source_path: None,
            destination_path: None,
        }
    }

    pub fn primary_type(mut self, primary_type: Option<String>) -> Self {
        self.primary_type = primary_type;
        self
    }

    pub fn property(mut self, name: &str) -> Self {
        self.property_name = Some(name.to_string());
        self
    }

    pub fn info(mut self, info: serde_json::Value) -> Self {
        self.info = Some(info);
        self
    }

    pub fn moved(mut self, source: &str, destination: &str) -> Self {
        self.source_path = Some(source.to_string());
        self.destination_path = Some(destination.to_string());
        self
    }
}

/// A stored journal row
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub transaction_id: String,
    pub session_id: String,
    pub journal_id: String,
    pub occurred: DateTime<Utc>,
    pub event_type: EventType,
    pub item_id: String,
    pub item_path: String,
    pub primary_type: Option<String>,
    pub property_name: Option<String>,
    pub user_id: Option<String>,
    pub user_data: Option<String>,
    pub info: Option<serde_json::Value>,
    pub source_path: Option<String>,
    pub destination_path: Option<String>,
}
