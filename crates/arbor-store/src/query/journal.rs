//! Journal rows and transaction-scoped change tracking

use super::WorkspaceQuery;
use crate::error::RepositoryResult;
use crate::journal::{EventType, JournalEntry, JournalEvent};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

pub struct JournalQuery<'q> {
    query: &'q WorkspaceQuery,
}

type RawEntry = (
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn read_raw(row: &Row) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ))
}

impl<'q> JournalQuery<'q> {
    pub(super) fn new(query: &'q WorkspaceQuery) -> Self {
        Self { query }
    }

    /// Append one entry to the current transaction
    pub fn write(&self, event: JournalEvent) -> RepositoryResult<()> {
        let q = self.query;
        let info = event.info.as_ref().map(|v| v.to_string());
        q.conn().execute(
            r#"
            INSERT INTO journal (
                transaction_id, session_id, journal_id, event_occurred, event_type,
                item_id, item_path, primary_type, property_name, user_id, user_data,
                event_info, source_path, destination_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                q.transaction_id(),
                q.session_id().as_str(),
                q.session_id().next_journal_id(),
                Utc::now().timestamp_millis(),
                event.event_type.as_str(),
                event.item_id,
                event.item_path,
                event.primary_type,
                event.property_name,
                q.user_id(),
                q.user_data(),
                info,
                event.source_path,
                event.destination_path,
            ],
        )?;
        Ok(())
    }

    fn exists(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> RepositoryResult<bool> {
        let found: bool = self.query.conn().query_row(sql, args, |row| row.get(0))?;
        Ok(found)
    }

    pub fn has_pending_changes(&self) -> RepositoryResult<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM journal WHERE transaction_id = ?1)",
            &[&self.query.transaction_id()],
        )
    }

    pub fn node_is_new(&self, id: &str) -> RepositoryResult<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM journal WHERE transaction_id = ?1 AND item_id = ?2 AND event_type = 'NODE_ADDED')",
            &[&self.query.transaction_id(), &id],
        )
    }

    /// Touched in this transaction without having been created in it
    pub fn node_is_modified(&self, id: &str) -> RepositoryResult<bool> {
        if self.node_is_new(id)? {
            return Ok(false);
        }
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM journal WHERE transaction_id = ?1 AND item_id = ?2)",
            &[&self.query.transaction_id(), &id],
        )
    }

    pub fn property_is_new(&self, owner_id: &str, name: &str) -> RepositoryResult<bool> {
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM journal WHERE transaction_id = ?1 AND item_id = ?2 AND property_name = ?3 AND event_type = 'PROPERTY_ADDED')",
            &[&self.query.transaction_id(), &owner_id, &name],
        )
    }

    pub fn property_is_modified(&self, owner_id: &str, name: &str) -> RepositoryResult<bool> {
        if self.property_is_new(owner_id, name)? {
            return Ok(false);
        }
        self.exists(
            "SELECT EXISTS(SELECT 1 FROM journal WHERE transaction_id = ?1 AND item_id = ?2 AND property_name = ?3)",
            &[&self.query.transaction_id(), &owner_id, &name],
        )
    }

    /// Entries of one transaction in write order
    pub fn entries(&self, transaction_id: &str) -> RepositoryResult<Vec<JournalEntry>> {
        let mut stmt = self.query.conn().prepare_cached(
            r#"
            SELECT transaction_id, session_id, journal_id, event_occurred, event_type,
                   item_id, item_path, primary_type, property_name, user_id, user_data,
                   event_info, source_path, destination_path
            FROM journal
            WHERE transaction_id = ?1
            ORDER BY journal_id
            "#,
        )?;
        let raw = stmt
            .query_map([transaction_id], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode_entry).collect()
    }

    /// Committed entries of every session, oldest first
    ///
    /// The open transaction of this session is left out. With `since` only
    /// entries that occurred strictly after it are returned.
    pub fn history(&self, since: Option<DateTime<Utc>>) -> RepositoryResult<Vec<JournalEntry>> {
        let since = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);
        let mut stmt = self.query.conn().prepare_cached(
            r#"
            SELECT transaction_id, session_id, journal_id, event_occurred, event_type,
                   item_id, item_path, primary_type, property_name, user_id, user_data,
                   event_info, source_path, destination_path
            FROM journal
            WHERE event_occurred > ?1 AND transaction_id != ?2
            ORDER BY event_occurred, journal_id
            "#,
        )?;
        let raw = stmt
            .query_map(params![since, self.query.transaction_id()], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode_entry).collect()
    }
}

fn decode_entry(raw: RawEntry) -> RepositoryResult<JournalEntry> {
    let (
        transaction_id,
        session_id,
        journal_id,
        occurred,
        event_type,
        item_id,
        item_path,
        primary_type,
        property_name,
        user_id,
        user_data,
        info,
        source_path,
        destination_path,
    ) = raw;
    let info = match info {
        Some(text) => Some(serde_json::from_str(&text)?),
        None => None,
    };
    Ok(JournalEntry {
        transaction_id,
        session_id,
        journal_id,
        occurred: DateTime::from_timestamp_millis(occurred).unwrap_or_default(),
        event_type: event_type.parse::<EventType>()?,
        item_id,
        item_path,
        primary_type,
        property_name,
        user_id,
        user_data,
        info,
        source_path,
        destination_path,
    })
}
