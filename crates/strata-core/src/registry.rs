//! # Type Registry
//!
//! A store keeps a set of *kinds*: named element views with a static
//! property table. Kinds are descriptors, not runtime reflection: each one
//! lists the fields it projects and their expected value type.
//!
//! Kinds may declare nested kinds. Removing a kind removes its nested kinds
//! as well.

use crate::element::{Element, ElementKind};
use crate::types::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Built-in kind of view definition vertices.
pub const VIEW_KIND: &str = "view";

/// Built-in kind of category vertices projected from views.
pub const CATEGORY_KIND: &str = "category";

/// Built-in kind of the partition information vertex.
pub const PARTITION_INFO_KIND: &str = "partition_info";

// =============================================================================
// KIND DESCRIPTORS
// =============================================================================

/// Expected value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Int,
    Bool,
    TextList,
}

impl FieldType {
    fn accepts(self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Text, FieldValue::Text(_))
                | (Self::Int, FieldValue::Int(_))
                | (Self::Bool, FieldValue::Bool(_))
                | (Self::TextList, FieldValue::TextList(_))
        )
    }
}

/// One row of a kind's property table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Name exposed to callers.
    pub name: String,
    /// Field read from the backing record.
    pub field: String,
    pub ty: FieldType,
}

/// A named element kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindDescriptor {
    name: String,
    element: ElementKind,
    properties: Vec<PropertyDescriptor>,
    nested: Vec<Arc<KindDescriptor>>,
}

impl KindDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, element: ElementKind) -> Self {
        Self {
            name: name.into(),
            element,
            properties: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// Builder: add a property mapped to a record field.
    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        field: impl Into<String>,
        ty: FieldType,
    ) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            field: field.into(),
            ty,
        });
        self
    }

    /// Builder: declare a nested kind.
    #[must_use]
    pub fn with_nested(mut self, nested: KindDescriptor) -> Self {
        self.nested.push(Arc::new(nested));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element_kind(&self) -> ElementKind {
        self.element
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    #[must_use]
    pub fn nested(&self) -> &[Arc<KindDescriptor>] {
        &self.nested
    }

    /// Read one property from an element. Values of the wrong type read as absent.
    #[must_use]
    pub fn read(&self, element: &Element, property: &str) -> Option<FieldValue> {
        let descriptor = self.properties.iter().find(|p| p.name == property)?;
        let value = field_of(element, &descriptor.field)?;
        descriptor.ty.accepts(&value).then_some(value)
    }

    /// Map of every declared property the element carries.
    #[must_use]
    pub fn project(&self, element: &Element) -> BTreeMap<String, FieldValue> {
        self.properties
            .iter()
            .filter_map(|p| {
                let value = field_of(element, &p.field)?;
                p.ty.accepts(&value).then(|| (p.name.clone(), value))
            })
            .collect()
    }
}

fn field_of(element: &Element, field: &str) -> Option<FieldValue> {
    match element {
        Element::Vertex(v) => v.property(field),
        Element::Proxy(p) => p
            .canonical()
            .and_then(|c| c.property(field))
            .or_else(|| p.shadow().property(field)),
        Element::Edge(e) => e.record().and_then(|r| r.get(field).cloned()),
        Element::Category(c) => c.values().get(field).cloned(),
    }
}

// =============================================================================
// TYPE REGISTRY
// =============================================================================

/// Kinds registered with one store, kept in registration order.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: Vec<Arc<KindDescriptor>>,
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in kinds.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in builtin_kinds() {
            registry.add(kind);
        }
        registry
    }

    /// Register a kind. Returns `false` if the name was already taken.
    pub fn add(&mut self, kind: Arc<KindDescriptor>) -> bool {
        if self.contains(kind.name()) {
            return false;
        }
        self.kinds.push(kind);
        true
    }

    /// Unregister a kind and, recursively, its nested kinds.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(index) = self.kinds.iter().position(|k| k.name() == name) else {
            return false;
        };
        let kind = self.kinds.remove(index);
        for nested in kind.nested() {
            self.remove(nested.name());
        }
        true
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.iter().any(|k| k.name() == name)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<KindDescriptor>> {
        self.kinds.iter().find(|k| k.name() == name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<KindDescriptor>> {
        self.kinds.clone()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.kinds.iter().map(|k| k.name().to_string()).collect()
    }
}

// =============================================================================
// KIND CATALOG
// =============================================================================

/// Resolves kind names back to descriptors when a store is restored.
pub trait KindCatalog {
    fn resolve(&self, name: &str) -> Option<Arc<KindDescriptor>>;
}

/// Catalog of built-in kinds plus any caller-registered ones.
#[derive(Debug, Clone)]
pub struct BuiltinCatalog {
    kinds: BTreeMap<String, Arc<KindDescriptor>>,
}

impl Default for BuiltinCatalog {
    fn default() -> Self {
        let kinds = builtin_kinds()
            .into_iter()
            .map(|k| (k.name().to_string(), k))
            .collect();
        Self { kinds }
    }
}

impl BuiltinCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a kind resolvable, nested kinds included.
    pub fn register(&mut self, kind: KindDescriptor) {
        let kind = Arc::new(kind);
        for nested in kind.nested() {
            self.kinds
                .insert(nested.name().to_string(), Arc::clone(nested));
        }
        self.kinds.insert(kind.name().to_string(), kind);
    }
}

impl KindCatalog for BuiltinCatalog {
    fn resolve(&self, name: &str) -> Option<Arc<KindDescriptor>> {
        self.kinds.get(name).cloned()
    }
}

fn builtin_kinds() -> Vec<Arc<KindDescriptor>> {
    vec![
        Arc::new(
            KindDescriptor::new(VIEW_KIND, ElementKind::Vertex)
                .with_property("title", "$Title", FieldType::Text)
                .with_property("index", "$Index", FieldType::Text)
                .with_property("collation", "$Collation", FieldType::Text),
        ),
        Arc::new(
            KindDescriptor::new(CATEGORY_KIND, ElementKind::Vertex)
                .with_property("value", "value", FieldType::Text)
                .with_property("position", "position", FieldType::Text)
                .with_property("noteid", "noteid", FieldType::Text),
        ),
        Arc::new(
            KindDescriptor::new(PARTITION_INFO_KIND, ElementKind::Vertex)
                .with_property("title", "$Title", FieldType::Text)
                .with_property("flags", "$Flags", FieldType::Text),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Vertex;
    use crate::types::{PartitionId, RawRecord};

    #[test]
    fn builtins_are_registered() {
        let registry = TypeRegistry::with_builtins();
        assert!(registry.contains(VIEW_KIND));
        assert!(registry.contains(CATEGORY_KIND));
        assert!(registry.contains(PARTITION_INFO_KIND));
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut registry = TypeRegistry::new();
        let kind = Arc::new(KindDescriptor::new("person", ElementKind::Vertex));
        assert!(registry.add(Arc::clone(&kind)));
        assert!(!registry.add(kind));
        assert_eq!(registry.names(), vec!["person"]);
    }

    #[test]
    fn kinds_keep_registration_order() {
        let mut registry = TypeRegistry::new();
        for name in ["zebra", "apple", "mango"] {
            registry.add(Arc::new(KindDescriptor::new(name, ElementKind::Vertex)));
        }
        assert_eq!(registry.names(), vec!["zebra", "apple", "mango"]);
        registry.remove("apple");
        registry.add(Arc::new(KindDescriptor::new("apple", ElementKind::Vertex)));
        assert_eq!(registry.names(), vec!["zebra", "mango", "apple"]);
    }

    #[test]
    fn remove_cascades_to_nested_kinds() {
        let mut registry = TypeRegistry::new();
        let outer = KindDescriptor::new("person", ElementKind::Vertex)
            .with_nested(KindDescriptor::new("address", ElementKind::Vertex));
        let nested = Arc::clone(&outer.nested()[0]);
        registry.add(Arc::new(outer));
        registry.add(nested);
        registry.add(Arc::new(KindDescriptor::new("other", ElementKind::Edge)));

        assert!(registry.remove("person"));
        assert!(!registry.contains("address"));
        assert!(registry.contains("other"));
    }

    #[test]
    fn projection_skips_mistyped_fields() {
        let kind = KindDescriptor::new("person", ElementKind::Vertex)
            .with_property("name", "name", FieldType::Text)
            .with_property("age", "age", FieldType::Int);
        let vertex = Element::Vertex(Vertex::new(
            RawRecord::new(PartitionId(1), "a")
                .with_field("name", "Alice")
                .with_field("age", "old"),
        ));
        let map = kind.project(&vertex);
        assert_eq!(map.get("name"), Some(&FieldValue::from("Alice")));
        assert!(!map.contains_key("age"));
        assert_eq!(kind.read(&vertex, "age"), None);
    }

    #[test]
    fn catalog_resolves_registered_nested_kinds() {
        let mut catalog = BuiltinCatalog::new();
        catalog.register(
            KindDescriptor::new("person", ElementKind::Vertex)
                .with_nested(KindDescriptor::new("address", ElementKind::Vertex)),
        );
        assert!(catalog.resolve("address").is_some());
        assert!(catalog.resolve(VIEW_KIND).is_some());
        assert!(catalog.resolve("ghost").is_none());
    }
}
