//! Per-session item cache
//!
//! Node rows are indexed by identifier and by path; property maps and
//! effective privileges ride along with them. Capacity is counted in nodes
//! and enforced with a most-recently-used list.
//!
//! Sessions of one workspace share a [`CommitClock`]. A cache filled before
//! the clock last moved is dropped on next use, so rows committed by other
//! sessions are never served stale.

use crate::acl::PrivilegeSet;
use crate::query::{NodeRecord, PropertyMap};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Count of commits made in a workspace
#[derive(Debug, Clone, Default)]
pub struct CommitClock(Arc<AtomicU64>);

impl CommitClock {
    pub fn now(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Record a commit; returns the new count
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

pub struct ItemCache {
    capacity: usize,
    nodes: HashMap<String, Arc<NodeRecord>>,
    paths: HashMap<String, String>,
    properties: HashMap<String, Arc<PropertyMap>>,
    privileges: HashMap<String, PrivilegeSet>,
    used: VecDeque<String>,
}

impl ItemCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            nodes: HashMap::new(),
            paths: HashMap::new(),
            properties: HashMap::new(),
            privileges: HashMap::new(),
            used: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&mut self, id: &str) -> Option<Arc<NodeRecord>> {
        let node = self.nodes.get(id).cloned()?;
        self.touch(id);
        Some(node)
    }

    pub fn node_by_path(&mut self, path: &str) -> Option<Arc<NodeRecord>> {
        let id = self.paths.get(path).cloned()?;
        self.node(&id)
    }

    pub fn put_node(&mut self, node: Arc<NodeRecord>) {
        let id = node.id.clone();
        if let Some(old) = self.nodes.get(&id) {
            if old.path != node.path {
                self.paths.remove(&old.path);
            }
        }
        self.paths.insert(node.path.clone(), id.clone());
        self.nodes.insert(id.clone(), node);
        self.touch(&id);
        self.evict();
    }

    pub fn properties(&mut self, id: &str) -> Option<Arc<PropertyMap>> {
        let props = self.properties.get(id).cloned()?;
        self.touch(id);
        Some(props)
    }

    pub fn put_properties(&mut self, id: &str, properties: Arc<PropertyMap>) {
        self.properties.insert(id.to_string(), properties);
        self.touch(id);
        self.evict();
    }

    pub fn remove_properties(&mut self, id: &str) {
        self.properties.remove(id);
    }

    pub fn privileges(&self, path: &str) -> Option<PrivilegeSet> {
        self.privileges.get(path).copied()
    }

    pub fn put_privileges(&mut self, path: &str, privileges: PrivilegeSet) {
        if self.privileges.len() >= self.capacity * 8 {
            self.privileges.clear();
        }
        self.privileges.insert(path.to_string(), privileges);
    }

    pub fn clear_privileges(&mut self) {
        self.privileges.clear();
    }

    /// Forget everything known about one identifier
    pub fn remove(&mut self, id: &str) {
        if let Some(node) = self.nodes.remove(id) {
            self.paths.remove(&node.path);
            self.privileges.remove(&node.path);
        }
        self.properties.remove(id);
        self.used.retain(|u| u != id);
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.paths.clear();
        self.properties.clear();
        self.privileges.clear();
        self.used.clear();
    }

    fn touch(&mut self, id: &str) {
        if self.used.back().map(String::as_str) == Some(id) {
            return;
        }
        self.used.retain(|u| u != id);
        self.used.push_back(id.to_string());
    }

    fn evict(&mut self) {
        while self.used.len() > self.capacity {
            let Some(oldest) = self.used.pop_front() else {
                break;
            };
            if let Some(node) = self.nodes.remove(&oldest) {
                self.paths.remove(&node.path);
            }
            self.properties.remove(&oldest);
        }
    }
}
