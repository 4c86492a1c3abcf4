//! Property rows and value encoding
//!
//! Values are encoded one at a time into [`Token`]s. Binary payloads and
//! strings over [`INLINE_LIMIT`] characters go to the blob store; text is
//! written in the owner's `jcr:encoding` (UTF-8 when unset) and decoded the
//! same way.

use super::{NodeRecord, PropertyMap, PropertyRecord, WorkspaceQuery};
use crate::error::{RepositoryError, RepositoryResult};
use crate::journal::{EventType, JournalEvent};
use crate::value::{tokens_from_json, tokens_to_json, Binary, PropertyType, Token, Value, INLINE_LIMIT};
use encoding_rs::{Encoding, UTF_8};
use rusqlite::{params, Row};
use std::sync::Arc;
use tracing::debug;

const PROPERTY_COLUMNS: &str =
    "p.item_id, p.parent_item_id, p.item_name, p.property_type, p.property_value, p.is_multiple";

type RawProperty = (String, String, String, String, String, bool);

fn read_raw(row: &Row) -> rusqlite::Result<RawProperty> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode_row(raw: RawProperty) -> RepositoryResult<PropertyRecord> {
    let (id, owner_id, name, property_type, value, multiple) = raw;
    Ok(PropertyRecord {
        id,
        owner_id,
        name,
        property_type: property_type.parse()?,
        tokens: tokens_from_json(&value)?,
        multiple,
    })
}

impl WorkspaceQuery {
    /// Every live property of a node, by name
    pub fn properties(&self, owner_id: &str) -> RepositoryResult<Arc<PropertyMap>> {
        let cached = self.cache().properties(owner_id);
        if let Some(map) = cached {
            return Ok(map);
        }
        let sql = format!(
            "SELECT {} FROM properties p WHERE p.parent_item_id = ?1 AND p.is_deleted = 0",
            PROPERTY_COLUMNS
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let raw = stmt
            .query_map([owner_id], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut map = PropertyMap::new();
        for row in raw {
            let record = decode_row(row)?;
            map.insert(record.name.clone(), record);
        }
        let map = Arc::new(map);
        self.cache().put_properties(owner_id, map.clone());
        Ok(map)
    }

    pub fn property(&self, owner_id: &str, name: &str) -> RepositoryResult<Option<PropertyRecord>> {
        Ok(self.properties(owner_id)?.get(name).cloned())
    }

    /// Upsert a property; `None` removes it
    pub fn set_property(
        &self,
        owner_id: &str,
        name: &str,
        property_type: PropertyType,
        values: Option<&[Value]>,
        multiple: bool,
    ) -> RepositoryResult<()> {
        self.atomic(|q| q.write_property(owner_id, name, property_type, values, multiple))
    }

    pub(crate) fn write_property(
        &self,
        owner_id: &str,
        name: &str,
        property_type: PropertyType,
        values: Option<&[Value]>,
        multiple: bool,
    ) -> RepositoryResult<()> {
        let name = self.resolve_name(name)?;
        let Some(values) = values else {
            self.remove_property_inner(owner_id, &name)?;
            return Ok(());
        };
        if !multiple && values.len() != 1 {
            return Err(RepositoryError::value_format(format!(
                "single-valued property {} needs exactly one value, got {}",
                name,
                values.len()
            )));
        }
        let owner = self.node_by_id(owner_id)?;
        let tokens = values
            .iter()
            .map(|v| self.encode_value(&owner, property_type, v.clone()))
            .collect::<RepositoryResult<Vec<_>>>()?;
        self.write_tokens(&owner, &name, property_type, tokens, multiple)
    }

    /// Store already encoded tokens, releasing blobs of the value replaced
    pub(crate) fn write_tokens(
        &self,
        owner: &NodeRecord,
        name: &str,
        property_type: PropertyType,
        tokens: Vec<Token>,
        multiple: bool,
    ) -> RepositoryResult<()> {
        let row_id = PropertyRecord::row_id(&owner.id, name);
        let json = tokens_to_json(&tokens)?;
        let event_type = match self.property(&owner.id, name)? {
            Some(old) => {
                self.release_tokens(&old.tokens)?;
                self.conn().execute(
                    r#"
                    UPDATE properties
                    SET property_type = ?2, property_value = ?3, is_multiple = ?4
                    WHERE item_id = ?1
                    "#,
                    params![row_id, property_type.as_str(), json, multiple],
                )?;
                EventType::PropertyChanged
            }
            None => {
                self.conn().execute(
                    r#"
                    INSERT INTO properties
                        (item_id, parent_item_id, item_name, property_type, property_value, is_multiple)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(item_id) DO UPDATE SET
                        property_type = excluded.property_type,
                        property_value = excluded.property_value,
                        is_multiple = excluded.is_multiple,
                        is_deleted = 0
                    "#,
                    params![row_id, owner.id, name, property_type.as_str(), json, multiple],
                )?;
                EventType::PropertyAdded
            }
        };
        self.cache().remove_properties(&owner.id);

        let primary = self.primary_type(&owner.id).ok();
        self.journal().write(
            JournalEvent::new(event_type, &owner.id, &owner.path)
                .primary_type(primary)
                .property(name)
                .info(serde_json::json!({
                    "type": property_type.as_str(),
                    "multiple": multiple,
                })),
        )?;
        debug!(item_id = %owner.id, property = %name, event = %event_type, "Property written");
        Ok(())
    }

    pub fn remove_property(&self, owner_id: &str, name: &str) -> RepositoryResult<()> {
        self.atomic(|q| {
            let name = q.resolve_name(name)?;
            if q.remove_property_inner(owner_id, &name)? {
                Ok(())
            } else {
                Err(RepositoryError::not_found(format!("property {} of {}", name, owner_id)))
            }
        })
    }

    /// Soft-delete one property; `false` when there was none
    pub(crate) fn remove_property_inner(&self, owner_id: &str, name: &str) -> RepositoryResult<bool> {
        let Some(old) = self.property(owner_id, name)? else {
            return Ok(false);
        };
        let owner = self.node_by_id(owner_id)?;
        self.release_tokens(&old.tokens)?;
        self.conn().execute(
            "UPDATE properties SET is_deleted = 1 WHERE item_id = ?1",
            [&old.id],
        )?;
        self.cache().remove_properties(owner_id);

        let primary = self.primary_type(owner_id).ok();
        self.journal().write(
            JournalEvent::new(EventType::PropertyRemoved, owner_id, &owner.path)
                .primary_type(primary)
                .property(name),
        )?;
        debug!(item_id = %owner_id, property = %name, "Property removed");
        Ok(true)
    }

    /// Whether a soft-deleted or live row exists for the property
    pub fn property_row_exists(&self, owner_id: &str, name: &str) -> RepositoryResult<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM properties WHERE item_id = ?1)",
            [PropertyRecord::row_id(owner_id, name)],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Encode one value for storage on `owner`
    pub fn encode_value(
        &self,
        owner: &NodeRecord,
        property_type: PropertyType,
        value: Value,
    ) -> RepositoryResult<Token> {
        match value.convert(property_type)? {
            Value::Binary(binary) => {
                let bytes = binary.to_vec()?;
                self.store_blob(&bytes)
            }
            Value::Reference(target) => Ok(Token::Inline(self.resolve_reference(owner, &target)?)),
            Value::WeakReference(target) | Value::Path(target) => {
                Ok(Token::Inline(self.resolve_target_path(owner, &target)?))
            }
            Value::Name(name) => Ok(Token::Inline(self.resolve_name(&name)?)),
            other => {
                let text = other.canonical_string().unwrap_or_default();
                if text.chars().count() > INLINE_LIMIT {
                    let encoding = self.owner_encoding(&owner.id)?;
                    let (bytes, _, _) = encoding.encode(&text);
                    self.store_blob(&bytes)
                } else {
                    Ok(Token::Inline(text))
                }
            }
        }
    }

    fn store_blob(&self, bytes: &[u8]) -> RepositoryResult<Token> {
        let blob = self.blobs().write_new(bytes)?;
        self.files().insert(&blob.id, blob.size)?;
        Ok(Token::Blob(blob.id))
    }

    /// Target identifier of a REFERENCE given as identifier or path
    fn resolve_reference(&self, owner: &NodeRecord, target: &str) -> RepositoryResult<String> {
        self.find_target(owner, target)?
            .map(|n| n.id.clone())
            .ok_or_else(|| RepositoryError::value_format(format!("reference target not found: {}", target)))
    }

    /// Target path of a PATH or WEAKREFERENCE given as path or identifier
    fn resolve_target_path(&self, owner: &NodeRecord, target: &str) -> RepositoryResult<String> {
        self.find_target(owner, target)?
            .map(|n| n.path.clone())
            .ok_or_else(|| RepositoryError::value_format(format!("path target not found: {}", target)))
    }

    fn find_target(&self, owner: &NodeRecord, target: &str) -> RepositoryResult<Option<Arc<NodeRecord>>> {
        if target.starts_with('/') {
            let resolved = self.resolve_path(target)?;
            return self.find_node_by_path(&resolved);
        }
        if let Some(node) = self.find_node_by_id(target)? {
            return Ok(Some(node));
        }
        match self.resolve_relative(&owner.path, target) {
            Ok(resolved) => self.find_node_by_path(&resolved),
            Err(_) => Ok(None),
        }
    }

    /// Declared text encoding of a node
    pub fn owner_encoding(&self, owner_id: &str) -> RepositoryResult<&'static Encoding> {
        let label = self
            .property(owner_id, "jcr:encoding")?
            .and_then(|p| p.first_inline().map(str::to_string));
        Ok(label
            .and_then(|l| Encoding::for_label(l.trim().as_bytes()))
            .unwrap_or(UTF_8))
    }

    /// Decode every stored value of a property
    pub fn decode_values(&self, record: &PropertyRecord) -> RepositoryResult<Vec<Value>> {
        record
            .tokens
            .iter()
            .map(|token| self.decode_token(record, token))
            .collect()
    }

    fn decode_token(&self, record: &PropertyRecord, token: &Token) -> RepositoryResult<Value> {
        match token {
            Token::Inline(text) => Value::parse(record.property_type, text),
            Token::Blob(id) => {
                let size = self
                    .files()
                    .size(id)?
                    .ok_or_else(|| RepositoryError::not_found(format!("blob {}", id)))?;
                let blob = self.blobs().reference(id, size)?;
                if record.property_type == PropertyType::Binary {
                    return Ok(Value::Binary(Binary::Stored(blob)));
                }
                let bytes = blob.read()?;
                let encoding = self.owner_encoding(&record.owner_id)?;
                let (text, _, _) = encoding.decode(&bytes);
                Value::parse(record.property_type, &text)
            }
        }
    }

    /// Soft-delete the blob rows a value refers to; safe to repeat
    pub(crate) fn release_tokens(&self, tokens: &[Token]) -> RepositoryResult<()> {
        for id in tokens.iter().filter_map(Token::blob_id) {
            self.files().release(id)?;
        }
        Ok(())
    }

    /// Copy tokens, giving every blob a fresh copy
    pub(crate) fn duplicate_tokens(&self, tokens: &[Token]) -> RepositoryResult<Vec<Token>> {
        tokens
            .iter()
            .map(|token| match token {
                Token::Inline(_) => Ok(token.clone()),
                Token::Blob(id) => {
                    let bytes = self.blobs().reference(id, 0)?.read()?;
                    self.store_blob(&bytes)
                }
            })
            .collect()
    }

    /// Live REFERENCE properties pointing at `id`
    pub fn count_referenced(&self, id: &str) -> RepositoryResult<usize> {
        let count: i64 = self.conn().query_row(
            r#"
            SELECT COUNT(*) FROM properties p
            JOIN items i ON i.item_id = p.parent_item_id AND i.is_deleted = 0
            WHERE p.is_deleted = 0 AND p.property_type = 'REFERENCE'
              AND EXISTS (
                SELECT 1 FROM json_each(p.property_value) j
                WHERE json_extract(j.value, '$.kind') = 'inline'
                  AND json_extract(j.value, '$.value') = ?1
              )
            "#,
            [id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Properties referring to a node: REFERENCE by identifier, or
    /// WEAKREFERENCE by path when `weak` is set
    pub fn references(&self, id: &str, weak: bool) -> RepositoryResult<Vec<PropertyRecord>> {
        let node = self.node_by_id(id)?;
        let (property_type, target) = if weak {
            (PropertyType::WeakReference, node.path.as_str())
        } else {
            (PropertyType::Reference, node.id.as_str())
        };
        let sql = format!(
            r#"
            SELECT {} FROM properties p
            JOIN items i ON i.item_id = p.parent_item_id AND i.is_deleted = 0
            WHERE p.is_deleted = 0 AND p.property_type = ?2
              AND EXISTS (
                SELECT 1 FROM json_each(p.property_value) j
                WHERE json_extract(j.value, '$.kind') = 'inline'
                  AND json_extract(j.value, '$.value') = ?1
              )
            ORDER BY i.item_path, p.item_name
            "#,
            PROPERTY_COLUMNS
        );
        let mut stmt = self.conn().prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params![target, property_type.as_str()], read_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::test_support::fixture;
    use crate::query::NodeDefinition;
    use crate::value::{parse_date, Decimal};

    fn round_trip(q: &WorkspaceQuery, owner: &str, value: Value) -> Value {
        let ty = value.property_type();
        q.set_property(owner, "p", ty, Some(&[value]), false).unwrap();
        let record = q.property(owner, "p").unwrap().unwrap();
        q.decode_values(&record).unwrap().remove(0)
    }

    #[test]
    fn test_scalar_values_round_trip() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();

        let date = parse_date("2024-01-02T03:04:05.678+02:00").unwrap();
        let decimal: Decimal = "3.14159265358979323846264338327950288".parse().unwrap();
        for value in [
            Value::from("text"),
            Value::Long(-42),
            Value::Double(1.25),
            Value::Boolean(true),
            Value::Date(date),
            Value::Decimal(decimal),
            Value::Uri("https://example.com/x".into()),
            Value::Name("jcr:title".into()),
        ] {
            assert_eq!(round_trip(q, &node.id, value.clone()), value);
        }
    }

    #[test]
    fn test_long_string_spills_to_blob() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();
        let long = "é".repeat(INLINE_LIMIT + 1);

        q.set_property(&node.id, "body", PropertyType::String, Some(&[Value::from(long.as_str())]), false)
            .unwrap();
        let record = q.property(&node.id, "body").unwrap().unwrap();
        assert!(record.tokens[0].blob_id().is_some());
        assert_eq!(q.decode_values(&record).unwrap(), vec![Value::String(long)]);
    }

    #[test]
    fn test_declared_encoding_applies_to_blobs() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();
        q.set_property(&node.id, "jcr:encoding", PropertyType::String, Some(&[Value::from("Shift_JIS")]), false)
            .unwrap();
        let long = "日本".repeat(INLINE_LIMIT);
        q.set_property(&node.id, "body", PropertyType::String, Some(&[Value::from(long.as_str())]), false)
            .unwrap();

        let record = q.property(&node.id, "body").unwrap().unwrap();
        let blob_id = record.tokens[0].blob_id().unwrap();
        let size = q.files().size(blob_id).unwrap().unwrap();
        // Two bytes per character in Shift_JIS
        assert_eq!(size as usize, long.chars().count() * 2);
        assert_eq!(q.decode_values(&record).unwrap(), vec![Value::String(long)]);
    }

    #[test]
    fn test_overwrite_releases_old_blob() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();
        q.set_property(&node.id, "data", PropertyType::Binary, Some(&[Value::from(vec![1u8; 10])]), false)
            .unwrap();
        let first = q.property(&node.id, "data").unwrap().unwrap();
        let first_blob = first.tokens[0].blob_id().unwrap().to_string();

        q.set_property(&node.id, "data", PropertyType::Binary, Some(&[Value::from(vec![2u8; 5])]), false)
            .unwrap();
        assert!(q.files().deleted().unwrap().contains(&first_blob));
        assert!(q.journal().property_is_new(&node.id, "data").unwrap());
    }

    #[test]
    fn test_references_resolve_and_count() {
        let f = fixture();
        let q = &f.query;
        let target = q.create_node(&NodeDefinition::new("/target", "nt:unstructured")).unwrap();
        let source = q.create_node(&NodeDefinition::new("/source", "nt:unstructured")).unwrap();

        q.set_property(&source.id, "ref", PropertyType::Reference, Some(&[Value::Reference("/target".into())]), false)
            .unwrap();
        q.set_property(&source.id, "weak", PropertyType::WeakReference, Some(&[Value::WeakReference(target.id.clone())]), false)
            .unwrap();
        q.set_property(&source.id, "rel", PropertyType::Path, Some(&[Value::Path("../target".into())]), false)
            .unwrap();

        let stored = q.property(&source.id, "ref").unwrap().unwrap();
        assert_eq!(stored.first_inline(), Some(target.id.as_str()));
        assert_eq!(q.property(&source.id, "rel").unwrap().unwrap().first_inline(), Some("/target"));
        assert_eq!(q.count_referenced(&target.id).unwrap(), 1);
        assert_eq!(q.references(&target.id, true).unwrap()[0].name, "weak");

        assert!(matches!(
            q.set_property(&source.id, "bad", PropertyType::Reference, Some(&[Value::Reference("/nowhere".into())]), false),
            Err(RepositoryError::ValueFormat(_))
        ));
    }

    #[test]
    fn test_remove_property_soft_then_purged() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();
        q.set_property(&node.id, "title", PropertyType::String, Some(&[Value::from("x")]), false)
            .unwrap();
        q.commit().unwrap();

        q.remove_property(&node.id, "title").unwrap();
        assert!(q.property(&node.id, "title").unwrap().is_none());
        assert!(q.property_row_exists(&node.id, "title").unwrap());
        q.commit().unwrap();
        assert!(!q.property_row_exists(&node.id, "title").unwrap());

        assert!(matches!(
            q.remove_property(&node.id, "title"),
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[test]
    fn test_single_valued_needs_one_value() {
        let f = fixture();
        let q = &f.query;
        let node = q.create_node(&NodeDefinition::new("/n", "nt:unstructured")).unwrap();
        assert!(matches!(
            q.set_property(&node.id, "p", PropertyType::Long, Some(&[Value::Long(1), Value::Long(2)]), false),
            Err(RepositoryError::ValueFormat(_))
        ));
        q.set_property(&node.id, "p", PropertyType::Long, Some(&[Value::Long(1), Value::Long(2)]), true)
            .unwrap();
        let record = q.property(&node.id, "p").unwrap().unwrap();
        assert_eq!(q.decode_values(&record).unwrap(), vec![Value::Long(1), Value::Long(2)]);
    }
}
