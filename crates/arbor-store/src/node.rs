//! Node and property views bound to a session
//!
//! A [`Node`] is a session borrow plus an identifier; its path is looked up
//! on every call, so a handle keeps working after the node is moved. Reads go
//! through the session's privilege checks and the checkout read redirect.

use crate::acl::PrivilegeSet;
use crate::error::{RepositoryError, RepositoryResult};
use crate::lock::Lock;
use crate::path;
use crate::pattern::NamePattern;
use crate::query::{NodeRecord, PropertyRecord};
use crate::session::Session;
use crate::value::{Binary, Decimal, PropertyType, Token, Value};
use chrono::{DateTime, FixedOffset};
use std::io::{Cursor, Read};
use std::sync::Arc;

pub struct Node<'s> {
    session: &'s Session,
    id: String,
}

impl<'s> Node<'s> {
    pub(crate) fn new(session: &'s Session, id: String) -> Self {
        Self { session, id }
    }

    fn record(&self) -> RepositoryResult<Arc<NodeRecord>> {
        self.session.query().node_by_id(&self.id)
    }

    fn resolve(&self, relative: &str) -> RepositoryResult<String> {
        let base = self.record()?;
        self.session.query().resolve_relative(&base.path, relative)
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }

    pub fn identifier(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> RepositoryResult<String> {
        Ok(self.record()?.name.clone())
    }

    pub fn path(&self) -> RepositoryResult<String> {
        Ok(self.record()?.path.clone())
    }

    pub fn depth(&self) -> RepositoryResult<usize> {
        Ok(path::depth(&self.record()?.path))
    }

    pub fn parent(&self) -> RepositoryResult<Node<'s>> {
        let record = self.record()?;
        let parent = path::parent(&record.path)
            .ok_or_else(|| RepositoryError::not_found("parent of the root node"))?;
        self.session.node(parent)
    }

    pub fn primary_type(&self) -> RepositoryResult<String> {
        self.session.query().primary_type(&self.id)
    }

    pub fn mixin_types(&self) -> RepositoryResult<Vec<String>> {
        self.session.query().mixin_types(&self.id)
    }

    pub fn is_node_type(&self, name: &str) -> RepositoryResult<bool> {
        let resolved = self.session.query().resolve_name(name)?;
        self.session.query().is_node_type(&self.id, &resolved)
    }

    // -- children -------------------------------------------------------

    /// A node by path relative to this one (`.`, `..` and nested segments)
    pub fn node(&self, relative: &str) -> RepositoryResult<Node<'s>> {
        let target = self.resolve(relative)?;
        self.session.node(&target)
    }

    pub fn has_node(&self, relative: &str) -> RepositoryResult<bool> {
        match self.node(relative) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Readable children, optionally filtered by a name pattern like `a*|b`
    pub fn nodes(&self, pattern: Option<&str>) -> RepositoryResult<Vec<Node<'s>>> {
        let pattern = pattern.map(NamePattern::new).transpose()?;
        let children = self.session.query().children(&self.id, pattern.as_ref())?;
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            if self
                .session
                .privileges_at(&child.path)?
                .contains(PrivilegeSet::READ)
            {
                nodes.push(Node::new(self.session, child.id.clone()));
            }
        }
        Ok(nodes)
    }

    pub fn add_node(&self, relative: &str, primary_type: &str) -> RepositoryResult<Node<'s>> {
        let target = self.resolve(relative)?;
        self.session.add_node(&target, primary_type)
    }

    // -- properties -----------------------------------------------------

    /// A property by name, or by relative path ending in a property name
    pub fn property(&self, relative: &str) -> RepositoryResult<Property<'s>> {
        if let Some((owner, name)) = relative.rsplit_once('/') {
            let owner = if owner.is_empty() { "/" } else { owner };
            return self.node(owner)?.property(name);
        }
        let record = self.session.node_record(&self.record()?.path)?;
        let name = self.session.query().resolve_name(relative)?;
        let visible = self.session.version_manager().visible_properties(&record)?;
        let property = visible
            .get(&name)
            .cloned()
            .ok_or_else(|| RepositoryError::not_found(path::child(&record.path, &name)))?;
        Ok(Property::new(self.session, property, record.path.clone()))
    }

    pub fn has_property(&self, relative: &str) -> RepositoryResult<bool> {
        match self.property(relative) {
            Ok(_) => Ok(true),
            Err(RepositoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn properties(&self, pattern: Option<&str>) -> RepositoryResult<Vec<Property<'s>>> {
        let pattern = pattern.map(NamePattern::new).transpose()?;
        let record = self.session.node_record(&self.record()?.path)?;
        let visible = self.session.version_manager().visible_properties(&record)?;
        Ok(visible
            .values()
            .filter(|p| pattern.as_ref().map(|pat| pat.matches(&p.name)).unwrap_or(true))
            .map(|p| Property::new(self.session, p.clone(), record.path.clone()))
            .collect())
    }

    /// Set a single value with the value's own type
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> RepositoryResult<()> {
        let value = value.into();
        let ty = value.property_type();
        self.set_property_typed(name, value, ty)
    }

    /// Set a single value converted to `property_type`
    pub fn set_property_typed(
        &self,
        name: &str,
        value: Value,
        property_type: PropertyType,
    ) -> RepositoryResult<()> {
        let record = self.record()?;
        self.session
            .write_property(&record, name, property_type, Some(&[value]), false)
    }

    pub fn set_property_values(
        &self,
        name: &str,
        values: Vec<Value>,
        property_type: PropertyType,
    ) -> RepositoryResult<()> {
        let record = self.record()?;
        self.session
            .write_property(&record, name, property_type, Some(values.as_slice()), true)
    }

    pub fn remove_property(&self, name: &str) -> RepositoryResult<()> {
        let record = self.record()?;
        self.session.remove_property(&record, name)
    }

    // -- structure ------------------------------------------------------

    pub fn remove(&self) -> RepositoryResult<()> {
        self.session.remove(&self.record()?.path)
    }

    pub fn add_mixin(&self, name: &str) -> RepositoryResult<bool> {
        let record = self.record()?;
        self.session.add_mixin(&record, name)
    }

    pub fn remove_mixin(&self, name: &str) -> RepositoryResult<()> {
        let record = self.record()?;
        self.session.remove_mixin(&record, name)
    }

    /// Whether the node was created in the current transaction
    pub fn is_new(&self) -> RepositoryResult<bool> {
        self.session.query().journal().node_is_new(&self.id)
    }

    pub fn is_modified(&self) -> RepositoryResult<bool> {
        self.session.query().journal().node_is_modified(&self.id)
    }

    // -- locks and versions ---------------------------------------------

    pub fn lock(&self, is_deep: bool, session_scoped: bool) -> RepositoryResult<Lock> {
        self.session
            .lock_manager()
            .lock(&self.record()?.path, is_deep, session_scoped)
    }

    pub fn unlock(&self) -> RepositoryResult<()> {
        self.session.lock_manager().unlock(&self.record()?.path)
    }

    pub fn is_locked(&self) -> RepositoryResult<bool> {
        self.session.lock_manager().is_locked(&self.record()?.path)
    }

    pub fn holds_lock(&self) -> RepositoryResult<bool> {
        self.session.lock_manager().holds_lock(&self.record()?.path)
    }

    pub fn checkin(&self) -> RepositoryResult<Option<String>> {
        self.session.version_manager().checkin(&self.record()?.path)
    }

    pub fn checkout(&self) -> RepositoryResult<()> {
        self.session.version_manager().checkout(&self.record()?.path)
    }

    pub fn is_checked_out(&self) -> RepositoryResult<bool> {
        self.session
            .version_manager()
            .is_checked_out(&self.record()?.path)
    }

    /// Properties on readable nodes that point at this node
    pub fn references(&self, weak: bool) -> RepositoryResult<Vec<Property<'s>>> {
        let q = self.session.query();
        let mut found = Vec::new();
        for record in q.references(&self.id, weak)? {
            let Some(owner) = q.find_node_by_id(&record.owner_id)? else {
                continue;
            };
            if self
                .session
                .privileges_at(&owner.path)?
                .contains(PrivilegeSet::READ)
            {
                found.push(Property::new(self.session, record, owner.path.clone()));
            }
        }
        Ok(found)
    }
}

impl std::fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node").field("id", &self.id).finish()
    }
}

/// One property as read through a session
pub struct Property<'s> {
    session: &'s Session,
    record: PropertyRecord,
    node_path: String,
}

impl<'s> Property<'s> {
    fn new(session: &'s Session, record: PropertyRecord, node_path: String) -> Self {
        Self {
            session,
            record,
            node_path,
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn path(&self) -> String {
        path::child(&self.node_path, &self.record.name)
    }

    pub fn property_type(&self) -> PropertyType {
        self.record.property_type
    }

    pub fn is_multiple(&self) -> bool {
        self.record.multiple
    }

    pub fn values(&self) -> RepositoryResult<Vec<Value>> {
        self.session.query().decode_values(&self.record)
    }

    /// The single value; fails for multi-valued properties
    pub fn value(&self) -> RepositoryResult<Value> {
        if self.record.multiple {
            return Err(RepositoryError::value_format(format!(
                "{} is multi-valued",
                self.path()
            )));
        }
        self.values()?
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::value_format(format!("{} has no value", self.path())))
    }

    fn converted(&self, ty: PropertyType) -> RepositoryResult<Value> {
        self.value()?.convert(ty)
    }

    fn mismatch(&self, wanted: PropertyType) -> RepositoryError {
        RepositoryError::value_format(format!(
            "{} cannot be read as {}",
            self.path(),
            wanted
        ))
    }

    pub fn string(&self) -> RepositoryResult<String> {
        match self.value()? {
            Value::Binary(binary) => {
                let bytes = binary.to_vec()?;
                String::from_utf8(bytes).map_err(|e| RepositoryError::value_format(e.to_string()))
            }
            other => Ok(other.canonical_string().unwrap_or_default()),
        }
    }

    pub fn long(&self) -> RepositoryResult<i64> {
        match self.converted(PropertyType::Long)? {
            Value::Long(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Long)),
        }
    }

    pub fn double(&self) -> RepositoryResult<f64> {
        match self.converted(PropertyType::Double)? {
            Value::Double(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Double)),
        }
    }

    pub fn decimal(&self) -> RepositoryResult<Decimal> {
        match self.converted(PropertyType::Decimal)? {
            Value::Decimal(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Decimal)),
        }
    }

    pub fn date(&self) -> RepositoryResult<DateTime<FixedOffset>> {
        match self.converted(PropertyType::Date)? {
            Value::Date(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Date)),
        }
    }

    pub fn boolean(&self) -> RepositoryResult<bool> {
        match self.converted(PropertyType::Boolean)? {
            Value::Boolean(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Boolean)),
        }
    }

    pub fn binary(&self) -> RepositoryResult<Binary> {
        match self.converted(PropertyType::Binary)? {
            Value::Binary(v) => Ok(v),
            _ => Err(self.mismatch(PropertyType::Binary)),
        }
    }

    /// A reader over the payload; stored blobs are streamed from disk
    pub fn stream(&self) -> RepositoryResult<Box<dyn Read + Send>> {
        match self.binary()? {
            Binary::Stored(blob) => Ok(Box::new(blob.open()?)),
            Binary::Bytes(bytes) => Ok(Box::new(Cursor::new(bytes))),
        }
    }

    /// Byte length of the single value
    pub fn length(&self) -> RepositoryResult<u64> {
        if self.record.multiple {
            return Err(RepositoryError::value_format(format!(
                "{} is multi-valued",
                self.path()
            )));
        }
        if let Some(Token::Blob(id)) = self.record.tokens.first() {
            if self.record.property_type == PropertyType::Binary {
                return self
                    .session
                    .query()
                    .files()
                    .size(id)?
                    .ok_or_else(|| RepositoryError::not_found(format!("blob {}", id)));
            }
        }
        Ok(match self.value()? {
            Value::Binary(binary) => binary.len(),
            other => other.canonical_string().unwrap_or_default().len() as u64,
        })
    }

    /// The node a REFERENCE, WEAKREFERENCE or PATH value points at
    pub fn node(&self) -> RepositoryResult<Node<'s>> {
        let target = self
            .record
            .first_inline()
            .ok_or_else(|| RepositoryError::value_format(format!("{} has no value", self.path())))?;
        match self.record.property_type {
            PropertyType::Reference => self.session.node_by_identifier(target),
            PropertyType::WeakReference | PropertyType::Path => self.session.node(target),
            other => Err(RepositoryError::value_format(format!(
                "{} is {}, not a reference",
                self.path(),
                other
            ))),
        }
    }

    pub fn is_new(&self) -> RepositoryResult<bool> {
        self.session
            .query()
            .journal()
            .property_is_new(&self.record.owner_id, &self.record.name)
    }

    pub fn is_modified(&self) -> RepositoryResult<bool> {
        self.session
            .query()
            .journal()
            .property_is_modified(&self.record.owner_id, &self.record.name)
    }
}

impl std::fmt::Debug for Property<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("path", &self.path())
            .field("type", &self.record.property_type)
            .finish()
    }
}
