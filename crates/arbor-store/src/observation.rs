//! Observation: committed journal entries fanned out to listeners
//!
//! Every successful [`Session::commit`] hands the transaction's journal
//! entries to the workspace's [`ObservationManager`], which broadcasts them
//! as one [`EventBundle`]. Each [`EventListener`] applies its own
//! [`EventFilter`] on the receiving side, so a bundle that matches nothing
//! for a listener is never returned by it.
//!
//! Entries below `/jcr:system` are never delivered. Dropping a listener
//! unregisters it.
//!
//! The [`EventJournal`](ObservationManager::event_journal) reads the same
//! entries back from the database, filtered the same way and restricted to
//! what the reading session may see.

use crate::acl::PrivilegeSet;
use crate::error::RepositoryResult;
use crate::journal::{EventType, JournalEntry};
use crate::node_type::NodeTypeOracle;
use crate::path;
use crate::session::{Session, SYSTEM_PATH};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The entries of one committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct EventBundle {
    pub workspace: String,
    pub transaction_id: String,
    pub entries: Vec<JournalEntry>,
}

/// Which entries a listener wants
///
/// An empty set in any dimension matches everything. Paths are matched
/// against the node an event is associated with: the parent of an added,
/// removed or moved node, and the node itself for every other event.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    event_types: HashSet<EventType>,
    path: Option<(String, bool)>,
    identifiers: HashSet<String>,
    node_types: Vec<String>,
    exclude_session: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types.extend(types);
        self
    }

    /// Only events at `path`, or anywhere below it when `deep`
    pub fn path(mut self, path: impl Into<String>, deep: bool) -> Self {
        self.path = Some((path.into(), deep));
        self
    }

    /// Only events whose item has one of these identifiers
    pub fn identifiers<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.identifiers.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Only events whose node is of one of these types or a subtype
    pub fn node_types<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.node_types.extend(names.into_iter().map(Into::into));
        self
    }

    /// Drop events caused by `session`
    pub fn no_local(mut self, session: &Session) -> Self {
        self.exclude_session = Some(session.identifier().to_string());
        self
    }

    fn normalized(mut self) -> RepositoryResult<Self> {
        if let Some((p, deep)) = self.path.take() {
            self.path = Some((path::normalize(&p)?, deep));
        }
        Ok(self)
    }

    pub fn matches(&self, entry: &JournalEntry, types: &dyn NodeTypeOracle) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&entry.event_type) {
            return false;
        }
        if self.exclude_session.as_deref() == Some(entry.session_id.as_str()) {
            return false;
        }
        if let Some((wanted, deep)) = &self.path {
            let at = associated_path(entry);
            let hit = at == wanted.as_str() || (*deep && path::is_descendant(at, wanted));
            if !hit {
                return false;
            }
        }
        if !self.identifiers.is_empty() && !self.identifiers.contains(&entry.item_id) {
            return false;
        }
        if !self.node_types.is_empty() {
            let Some(primary) = entry.primary_type.as_deref() else {
                return false;
            };
            if !self.node_types.iter().any(|t| types.is_subtype(primary, t)) {
                return false;
            }
        }
        true
    }
}

/// The node an entry is reported against
fn associated_path(entry: &JournalEntry) -> &str {
    match entry.event_type {
        EventType::NodeAdded | EventType::NodeRemoved | EventType::NodeMoved => {
            path::parent(&entry.item_path).unwrap_or(path::ROOT)
        }
        _ => &entry.item_path,
    }
}

fn is_system_entry(entry: &JournalEntry) -> bool {
    let under = |p: &str| p == SYSTEM_PATH || path::is_descendant(p, SYSTEM_PATH);
    under(&entry.item_path) || entry.source_path.as_deref().is_some_and(under)
}

/// Registers listeners and publishes commits for one workspace
#[derive(Clone)]
pub struct ObservationManager {
    workspace: String,
    types: Arc<dyn NodeTypeOracle>,
    sender: broadcast::Sender<Arc<EventBundle>>,
}

impl ObservationManager {
    pub fn new(workspace: impl Into<String>, types: Arc<dyn NodeTypeOracle>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            workspace: workspace.into(),
            types,
            sender,
        }
    }

    pub fn add_event_listener(&self, filter: EventFilter) -> RepositoryResult<EventListener> {
        let filter = filter.normalized()?;
        debug!(workspace = %self.workspace, filter = ?filter, "Event listener registered");
        Ok(EventListener {
            filter,
            types: self.types.clone(),
            receiver: self.sender.subscribe(),
        })
    }

    pub fn remove_event_listener(&self, listener: EventListener) {
        debug!(workspace = %self.workspace, filter = ?listener.filter, "Event listener removed");
        drop(listener);
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn has_listeners(&self) -> bool {
        self.listener_count() > 0
    }

    /// Hand a committed transaction to every listener
    pub(crate) fn publish(&self, transaction_id: &str, entries: &[JournalEntry]) {
        let entries: Vec<JournalEntry> = entries
            .iter()
            .filter(|e| !is_system_entry(e))
            .cloned()
            .collect();
        if entries.is_empty() {
            return;
        }
        let bundle = Arc::new(EventBundle {
            workspace: self.workspace.clone(),
            transaction_id: transaction_id.to_string(),
            entries,
        });
        match self.sender.send(bundle) {
            Ok(receivers) => trace!(transaction_id = %transaction_id, receivers, "Events published"),
            Err(_) => trace!(transaction_id = %transaction_id, "No event listeners"),
        }
    }

    /// Committed entries readable by `session` that match `filter`, oldest first
    pub fn event_journal(
        &self,
        session: &Session,
        filter: EventFilter,
        since: Option<DateTime<Utc>>,
    ) -> RepositoryResult<Vec<JournalEntry>> {
        let filter = filter.normalized()?;
        let mut out = Vec::new();
        for entry in session.query().journal().history(since)? {
            if is_system_entry(&entry) || !filter.matches(&entry, self.types.as_ref()) {
                continue;
            }
            if !session
                .privileges_at(&entry.item_path)?
                .contains(PrivilegeSet::READ)
            {
                continue;
            }
            out.push(entry);
        }
        Ok(out)
    }
}

/// A registered listener; drop it to unregister
pub struct EventListener {
    filter: EventFilter,
    types: Arc<dyn NodeTypeOracle>,
    receiver: broadcast::Receiver<Arc<EventBundle>>,
}

impl EventListener {
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Wait for the next commit with matching entries
    ///
    /// Returns `None` once the workspace has shut down.
    pub async fn recv(&mut self) -> Option<EventBundle> {
        loop {
            match self.receiver.recv().await {
                Ok(bundle) => {
                    if let Some(selected) = self.select(&bundle) {
                        return Some(selected);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching commit already delivered, if any
    pub fn try_recv(&mut self) -> Option<EventBundle> {
        loop {
            match self.receiver.try_recv() {
                Ok(bundle) => {
                    if let Some(selected) = self.select(&bundle) {
                        return Some(selected);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event listener lagged");
                }
                Err(_) => return None,
            }
        }
    }

    fn select(&self, bundle: &EventBundle) -> Option<EventBundle> {
        let entries: Vec<JournalEntry> = bundle
            .entries
            .iter()
            .filter(|e| self.filter.matches(e, self.types.as_ref()))
            .cloned()
            .collect();
        if entries.is_empty() {
            return None;
        }
        Some(EventBundle {
            workspace: bundle.workspace.clone(),
            transaction_id: bundle.transaction_id.clone(),
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessControlEntry;
    use crate::principal::Principal;
    use crate::session::test_support::Workspace;

    fn manager(ws: &Workspace) -> ObservationManager {
        ObservationManager::new("default", ws.context.types.clone())
    }

    fn kinds(bundle: &EventBundle) -> Vec<(EventType, String)> {
        bundle
            .entries
            .iter()
            .map(|e| (e.event_type, e.item_path.clone()))
            .collect()
    }

    #[test]
    fn test_path_filter_shallow_and_deep() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let mut shallow = events
            .add_event_listener(EventFilter::new().path("/a", false))
            .unwrap();
        let mut deep = events.add_event_listener(EventFilter::new().path("/a", true)).unwrap();

        let s = ws.login_observed(Principal::system(), &events);
        s.add_node("/a", "nt:unstructured").unwrap();
        s.add_node("/a/b", "nt:unstructured").unwrap();
        s.add_node("/a/b/c", "nt:unstructured").unwrap();
        s.commit().unwrap();

        let got = shallow.try_recv().unwrap();
        let added: Vec<_> = kinds(&got)
            .into_iter()
            .filter(|(t, _)| *t == EventType::NodeAdded)
            .collect();
        assert_eq!(added, vec![(EventType::NodeAdded, "/a/b".to_string())]);
        // Property events of /a itself are associated with /a
        assert!(got
            .entries
            .iter()
            .any(|e| e.event_type == EventType::PropertyAdded && e.item_path == "/a"));
        assert!(!got.entries.iter().any(|e| e.item_path == "/a/b/c"));

        let got = deep.try_recv().unwrap();
        let added: Vec<_> = got
            .entries
            .iter()
            .filter(|e| e.event_type == EventType::NodeAdded)
            .map(|e| e.item_path.as_str())
            .collect();
        assert_eq!(added, vec!["/a/b", "/a/b/c"]);
        assert!(shallow.try_recv().is_none());
    }

    #[test]
    fn test_event_type_filter() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let mut removals = events
            .add_event_listener(EventFilter::new().event_types([EventType::NodeRemoved]))
            .unwrap();
        let mut changes = events
            .add_event_listener(
                EventFilter::new().event_types([EventType::PropertyChanged, EventType::PropertyAdded]),
            )
            .unwrap();

        let s = ws.login_observed(Principal::system(), &events);
        let n = s.add_node("/n", "nt:unstructured").unwrap();
        n.set_property("title", "one").unwrap();
        s.commit().unwrap();

        // Nothing was removed yet
        assert!(removals.try_recv().is_none());
        let got = changes.try_recv().unwrap();
        assert!(got
            .entries
            .iter()
            .all(|e| e.event_type == EventType::PropertyAdded));
        assert!(got.entries.iter().any(|e| e.property_name.as_deref() == Some("title")));

        s.node("/n").unwrap().set_property("title", "two").unwrap();
        s.commit().unwrap();
        let got = changes.try_recv().unwrap();
        assert_eq!(got.entries.len(), 1);
        assert_eq!(got.entries[0].event_type, EventType::PropertyChanged);

        s.remove("/n").unwrap();
        s.commit().unwrap();
        let got = removals.try_recv().unwrap();
        assert_eq!(kinds(&got), vec![(EventType::NodeRemoved, "/n".to_string())]);
    }

    #[test]
    fn test_identifier_and_node_type_filters() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let s = ws.login_observed(Principal::system(), &events);
        let target = s.add_node("/target", "nt:unstructured").unwrap();
        s.add_node("/other", "nt:unstructured").unwrap();
        s.add_node("/folder", "nt:folder").unwrap();
        s.commit().unwrap();

        let mut by_id = events
            .add_event_listener(EventFilter::new().identifiers([target.identifier().to_string()]))
            .unwrap();
        let mut by_type = events
            .add_event_listener(EventFilter::new().node_types(["nt:hierarchyNode"]))
            .unwrap();

        s.node("/target").unwrap().set_property("x", "1").unwrap();
        s.node("/other").unwrap().set_property("x", "1").unwrap();
        s.add_node("/folder/sub", "nt:folder").unwrap();
        s.commit().unwrap();

        let got = by_id.try_recv().unwrap();
        assert!(got.entries.iter().all(|e| e.item_path == "/target"));
        assert!(!got.entries.is_empty());

        let got = by_type.try_recv().unwrap();
        assert!(!got.entries.is_empty());
        assert!(got
            .entries
            .iter()
            .all(|e| e.item_path.starts_with("/folder")));
    }

    #[test]
    fn test_no_local_skips_own_commits() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let mine = ws.login_observed(Principal::system(), &events);
        let theirs = ws.login_observed(Principal::system(), &events);
        let mut listener = events
            .add_event_listener(EventFilter::new().no_local(&mine))
            .unwrap();

        mine.add_node("/mine", "nt:unstructured").unwrap();
        mine.commit().unwrap();
        assert!(listener.try_recv().is_none());

        theirs.add_node("/theirs", "nt:unstructured").unwrap();
        theirs.commit().unwrap();
        let got = listener.try_recv().unwrap();
        assert!(got.entries.iter().all(|e| e.session_id == theirs.identifier()));
    }

    #[test]
    fn test_system_subtree_is_not_published() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let mut listener = events.add_event_listener(EventFilter::new()).unwrap();
        let s = ws.login_observed(Principal::system(), &events);
        s.add_node("/jcr:system/scratch", "nt:folder").unwrap();
        s.commit().unwrap();
        assert!(listener.try_recv().is_none());
    }

    #[test]
    fn test_dropping_listener_unregisters() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let listener = events.add_event_listener(EventFilter::new()).unwrap();
        let other = events.add_event_listener(EventFilter::new()).unwrap();
        assert_eq!(events.listener_count(), 2);
        events.remove_event_listener(listener);
        drop(other);
        assert_eq!(events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_waits_for_next_commit() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let mut listener = events
            .add_event_listener(EventFilter::new().event_types([EventType::NodeAdded]))
            .unwrap();
        let s = ws.login_observed(Principal::system(), &events);
        s.add_node("/later", "nt:unstructured").unwrap();
        s.commit().unwrap();

        let got = listener.recv().await.unwrap();
        assert_eq!(kinds(&got), vec![(EventType::NodeAdded, "/later".to_string())]);
        assert_eq!(got.workspace, "default");
    }

    #[test]
    fn test_event_journal_reads_history_visible_to_session() {
        let ws = Workspace::new();
        let events = manager(&ws);
        let admin = ws.login_observed(Principal::system(), &events);
        admin.add_node("/open", "nt:unstructured").unwrap();
        admin.add_node("/closed", "nt:unstructured").unwrap();
        admin
            .access_control_manager()
            .set_policy("/closed", &[AccessControlEntry::deny("eve", false, &["jcr:read"])])
            .unwrap();
        admin.commit().unwrap();
        let checkpoint = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        admin.node("/open").unwrap().set_property("late", "yes").unwrap();
        admin.commit().unwrap();

        let added = events
            .event_journal(&admin, EventFilter::new().event_types([EventType::NodeAdded]), None)
            .unwrap();
        // The root was added when the workspace was created
        let paths: Vec<_> = added.iter().map(|e| e.item_path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/open", "/closed"]);

        let eve = ws.login(Principal::user("eve"));
        let seen = events
            .event_journal(&eve, EventFilter::new().event_types([EventType::NodeAdded]), None)
            .unwrap();
        let paths: Vec<_> = seen.iter().map(|e| e.item_path.as_str()).collect();
        assert_eq!(paths, vec!["/", "/open"]);

        let recent = events
            .event_journal(&admin, EventFilter::new(), Some(checkpoint))
            .unwrap();
        assert!(recent.iter().all(|e| e.item_path == "/open"));
        assert!(recent.iter().any(|e| e.property_name.as_deref() == Some("late")));
    }
}
