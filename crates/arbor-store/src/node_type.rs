//! Node type oracle
//!
//! The engine does not parse node type schemas. It asks an oracle whether a
//! type exists, whether it is abstract, a mixin or protected, and what a new
//! node of that type gets populated with.

use crate::value::PropertyType;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const NT_BASE: &str = "nt:base";
pub const NT_HIERARCHY_NODE: &str = "nt:hierarchyNode";
pub const NT_FOLDER: &str = "nt:folder";
pub const NT_FILE: &str = "nt:file";
pub const NT_RESOURCE: &str = "nt:resource";
pub const NT_UNSTRUCTURED: &str = "nt:unstructured";
pub const NT_VERSION_HISTORY: &str = "nt:versionHistory";
pub const NT_VERSION: &str = "nt:version";
pub const NT_FROZEN_NODE: &str = "nt:frozenNode";
pub const MI_ROOT: &str = "mi:root";
pub const MIX_CREATED: &str = "mix:created";
pub const MIX_LAST_MODIFIED: &str = "mix:lastModified";
pub const MIX_MIME_TYPE: &str = "mix:mimeType";
pub const MIX_REFERENCEABLE: &str = "mix:referenceable";
pub const MIX_LOCKABLE: &str = "mix:lockable";
pub const MIX_SIMPLE_VERSIONABLE: &str = "mix:simpleVersionable";
pub const MIX_VERSIONABLE: &str = "mix:versionable";

/// Property a node type declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub name: String,
    pub property_type: PropertyType,
    pub multiple: bool,
    pub autocreated: bool,
    pub protected: bool,
    /// Canonical string forms
    pub default_values: Vec<String>,
}

impl PropertyDefinition {
    pub fn new(name: &str, property_type: PropertyType) -> Self {
        Self {
            name: name.to_string(),
            property_type,
            multiple: false,
            autocreated: false,
            protected: false,
            default_values: Vec::new(),
        }
    }

    pub fn autocreated(mut self) -> Self {
        self.autocreated = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default_values.push(value.to_string());
        self
    }
}

/// Child node created together with its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNodeDefinition {
    pub name: String,
    pub primary_type: String,
}

/// Access control entry applied to every new node of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AceTemplate {
    pub principal: String,
    pub is_group: bool,
    pub privileges: Vec<String>,
    pub allow: bool,
}

/// What the oracle knows about one type
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeTypeDef {
    pub name: String,
    pub is_abstract: bool,
    pub is_mixin: bool,
    pub is_protected: bool,
    pub supertypes: Vec<String>,
    pub properties: Vec<PropertyDefinition>,
    pub children: Vec<ChildNodeDefinition>,
    pub access_control: Vec<AceTemplate>,
}

impl NodeTypeDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn mixin(name: &str) -> Self {
        Self {
            is_mixin: true,
            ..Self::new(name)
        }
    }

    pub fn with_abstract(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn with_protected(mut self) -> Self {
        self.is_protected = true;
        self
    }

    pub fn supertype(mut self, name: &str) -> Self {
        self.supertypes.push(name.to_string());
        self
    }

    pub fn property(mut self, def: PropertyDefinition) -> Self {
        self.properties.push(def);
        self
    }

    pub fn child(mut self, name: &str, primary_type: &str) -> Self {
        self.children.push(ChildNodeDefinition {
            name: name.to_string(),
            primary_type: primary_type.to_string(),
        });
        self
    }

    pub fn ace(mut self, principal: &str, is_group: bool, privileges: &[&str], allow: bool) -> Self {
        self.access_control.push(AceTemplate {
            principal: principal.to_string(),
            is_group,
            privileges: privileges.iter().map(|p| p.to_string()).collect(),
            allow,
        });
        self
    }
}

/// Answers type questions for the query engine
pub trait NodeTypeOracle: Send + Sync {
    fn node_type(&self, name: &str) -> Option<Arc<NodeTypeDef>>;

    /// The type and all of its supertypes, nearest first, without duplicates
    fn hierarchy(&self, name: &str) -> Vec<Arc<NodeTypeDef>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut queue = vec![name.to_string()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(def) = self.node_type(&current) {
                for s in def.supertypes.iter().rev() {
                    queue.push(s.clone());
                }
                out.push(def);
            }
        }
        out
    }

    /// Whether `actual` is `wanted` or inherits from it
    fn is_subtype(&self, actual: &str, wanted: &str) -> bool {
        let wanted = self
            .node_type(wanted)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| wanted.to_string());
        self.hierarchy(actual).iter().any(|d| d.name == wanted)
    }

    /// Whether a node with these types is of type `wanted`
    fn is_node_type(&self, primary: &str, mixins: &[String], wanted: &str) -> bool {
        self.is_subtype(primary, wanted) || mixins.iter().any(|m| self.is_subtype(m, wanted))
    }

    /// Every type definition in effect for a node
    fn effective_types(&self, primary: &str, mixins: &[String]) -> Vec<Arc<NodeTypeDef>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in std::iter::once(primary).chain(mixins.iter().map(String::as_str)) {
            for def in self.hierarchy(name) {
                if seen.insert(def.name.clone()) {
                    out.push(def);
                }
            }
        }
        out
    }

    fn property_definition(
        &self,
        primary: &str,
        mixins: &[String],
        property: &str,
    ) -> Option<PropertyDefinition> {
        self.effective_types(primary, mixins)
            .iter()
            .flat_map(|d| d.properties.iter())
            .find(|p| p.name == property)
            .cloned()
    }

    fn is_protected_property(&self, primary: &str, mixins: &[String], property: &str) -> bool {
        self.property_definition(primary, mixins, property)
            .map(|p| p.protected)
            .unwrap_or(false)
    }
}

/// In-memory oracle preloaded with the standard types
pub struct NodeTypeRegistry {
    types: RwLock<HashMap<String, Arc<NodeTypeDef>>>,
    aliases: HashMap<&'static str, &'static str>,
}

impl Default for NodeTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        let registry = Self {
            types: RwLock::new(HashMap::new()),
            aliases: HashMap::from([("folder", NT_FOLDER), ("file", NT_FILE)]),
        };
        for def in builtin_types() {
            registry.register(def);
        }
        registry
    }

    /// Add or replace a type definition
    pub fn register(&self, def: NodeTypeDef) {
        self.types.write().insert(def.name.clone(), Arc::new(def));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.types.write().remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl NodeTypeOracle for NodeTypeRegistry {
    fn node_type(&self, name: &str) -> Option<Arc<NodeTypeDef>> {
        let name = self.aliases.get(name).copied().unwrap_or(name);
        self.types.read().get(name).cloned()
    }
}

fn builtin_types() -> Vec<NodeTypeDef> {
    use PropertyType::*;
    vec![
        NodeTypeDef::new(NT_BASE)
            .with_abstract()
            .property(PropertyDefinition::new("jcr:primaryType", Name).protected())
            .property(PropertyDefinition::new("jcr:mixinTypes", Name).multiple().protected()),
        NodeTypeDef::new(NT_HIERARCHY_NODE)
            .with_abstract()
            .supertype(NT_BASE)
            .supertype(MIX_CREATED),
        NodeTypeDef::new(NT_FOLDER).supertype(NT_HIERARCHY_NODE),
        NodeTypeDef::new(NT_FILE).supertype(NT_HIERARCHY_NODE),
        NodeTypeDef::new(NT_RESOURCE)
            .supertype(NT_BASE)
            .supertype(MIX_MIME_TYPE)
            .supertype(MIX_LAST_MODIFIED)
            .property(PropertyDefinition::new("jcr:data", Binary)),
        NodeTypeDef::new(NT_UNSTRUCTURED).supertype(NT_BASE),
        NodeTypeDef::new(MI_ROOT)
            .supertype(NT_BASE)
            .ace("everyone", true, &["jcr:read"], true),
        NodeTypeDef::new(NT_VERSION_HISTORY)
            .with_protected()
            .supertype(NT_BASE)
            .supertype(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new("jcr:versionableUuid", String).protected()),
        NodeTypeDef::new(NT_VERSION)
            .with_protected()
            .supertype(NT_BASE)
            .supertype(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new("jcr:created", Date).autocreated().protected())
            .property(PropertyDefinition::new("jcr:createdBy", String).autocreated().protected())
            .property(PropertyDefinition::new("jcr:predecessors", Reference).multiple().protected())
            .property(PropertyDefinition::new("jcr:successors", Reference).multiple().protected()),
        NodeTypeDef::new(NT_FROZEN_NODE)
            .with_protected()
            .supertype(NT_BASE)
            .supertype(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new("jcr:frozenPrimaryType", Name).protected())
            .property(PropertyDefinition::new("jcr:frozenMixinTypes", Name).multiple().protected())
            .property(PropertyDefinition::new("jcr:frozenUuid", String).protected()),
        NodeTypeDef::mixin(MIX_CREATED)
            .property(PropertyDefinition::new("jcr:created", Date).autocreated().protected())
            .property(PropertyDefinition::new("jcr:createdBy", String).autocreated().protected()),
        NodeTypeDef::mixin(MIX_LAST_MODIFIED)
            .property(PropertyDefinition::new("jcr:lastModified", Date).autocreated())
            .property(PropertyDefinition::new("jcr:lastModifiedBy", String).autocreated()),
        NodeTypeDef::mixin(MIX_MIME_TYPE)
            .property(PropertyDefinition::new("jcr:mimeType", String).autocreated())
            .property(PropertyDefinition::new("jcr:encoding", String)),
        NodeTypeDef::mixin(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new("jcr:uuid", String).autocreated().protected()),
        NodeTypeDef::mixin(MIX_LOCKABLE)
            .property(PropertyDefinition::new("jcr:lockOwner", String).protected())
            .property(PropertyDefinition::new("jcr:lockIsDeep", Boolean).protected()),
        NodeTypeDef::mixin(MIX_SIMPLE_VERSIONABLE)
            .property(
                PropertyDefinition::new("jcr:isCheckedOut", Boolean)
                    .autocreated()
                    .protected()
                    .default_value("true"),
            )
            .property(PropertyDefinition::new("mi:checkedOutBy", String).protected()),
        NodeTypeDef::mixin(MIX_VERSIONABLE)
            .supertype(MIX_SIMPLE_VERSIONABLE)
            .supertype(MIX_REFERENCEABLE)
            .property(PropertyDefinition::new("jcr:versionHistory", Reference).protected())
            .property(PropertyDefinition::new("jcr:baseVersion", Reference).protected())
            .property(PropertyDefinition::new("jcr:predecessors", Reference).multiple().protected()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        let types = NodeTypeRegistry::new();
        assert!(types.is_subtype(NT_FOLDER, NT_HIERARCHY_NODE));
        assert!(types.is_subtype(NT_FOLDER, MIX_CREATED));
        assert!(types.is_subtype(MIX_VERSIONABLE, MIX_REFERENCEABLE));
        assert!(!types.is_subtype(NT_UNSTRUCTURED, MIX_CREATED));
        assert!(types.node_type(NT_BASE).unwrap().is_abstract);
    }

    #[test]
    fn test_short_aliases() {
        let types = NodeTypeRegistry::new();
        assert_eq!(types.node_type("folder").unwrap().name, NT_FOLDER);
        assert!(types.is_subtype("file", NT_FILE));
    }

    #[test]
    fn test_mixins_participate() {
        let types = NodeTypeRegistry::new();
        let mixins = vec![MIX_VERSIONABLE.to_string()];
        assert!(types.is_node_type(NT_UNSTRUCTURED, &mixins, MIX_REFERENCEABLE));
        assert!(types.is_protected_property(NT_UNSTRUCTURED, &mixins, "jcr:isCheckedOut"));
        assert!(!types.is_protected_property(NT_UNSTRUCTURED, &mixins, "title"));
    }

    #[test]
    fn test_register_custom_type() {
        let types = NodeTypeRegistry::new();
        types.register(
            NodeTypeDef::new("app:page")
                .supertype(NT_UNSTRUCTURED)
                .child("jcr:content", NT_UNSTRUCTURED),
        );
        let effective = types.effective_types("app:page", &[]);
        let names: Vec<&str> = effective.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["app:page", NT_UNSTRUCTURED, NT_BASE]);
        assert!(types.unregister("app:page"));
        assert!(types.node_type("app:page").is_none());
    }
}
