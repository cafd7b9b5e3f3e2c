//! # Elements
//!
//! Materialized graph elements. `Element` is a closed sum type; the
//! materializer is the only place that decides which variant a record becomes.
//!
//! Elements are cheap handles: cloning shares the underlying record, and two
//! handles are the *same instance* when [`Element::same_instance`] holds.
//! Elements compare equal when their keys are equal.

use crate::key::{CompositeKey, EntryRow};
use crate::primitives::{
    EDGE_TYPE_VALUE, EDGES_IN_FIELD, EDGES_OUT_FIELD, IN_FIELD, LABEL_FIELD, OUT_FIELD,
    PROXIED_ID_FIELD, TYPE_FIELD, VERTEX_TYPE_VALUE,
};
use crate::types::{Direction, FieldValue, RawRecord, StoreError, TabularEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind of element a caller asks the store to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Vertex,
    Edge,
}

impl ElementKind {
    /// Discriminator value written into new records of this kind.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Vertex => VERTEX_TYPE_VALUE,
            Self::Edge => EDGE_TYPE_VALUE,
        }
    }
}

// =============================================================================
// VERTEX
// =============================================================================

#[derive(Debug)]
struct RecordCell {
    key: CompositeKey,
    record: RwLock<RawRecord>,
}

/// A vertex backed by a generic record.
#[derive(Debug, Clone)]
pub struct Vertex(Arc<RecordCell>);

impl Vertex {
    #[must_use]
    pub fn new(record: RawRecord) -> Self {
        Self::with_key(record.key(), record)
    }

    /// Vertex addressed by `key` rather than by its record's own key.
    /// Synthetic records (icon, ACL, view) are reached this way.
    #[must_use]
    pub fn with_key(key: CompositeKey, record: RawRecord) -> Self {
        Self(Arc::new(RecordCell {
            key,
            record: RwLock::new(record),
        }))
    }

    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        &self.0.key
    }

    /// Snapshot of the backing record.
    #[must_use]
    pub fn record(&self) -> RawRecord {
        self.0.record.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&RawRecord) -> R) -> R {
        f(&self.0.record.read())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RawRecord) -> R) -> R {
        f(&mut self.0.record.write())
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<FieldValue> {
        self.0.record.read().get(name).cloned()
    }

    /// Set a user property. The discriminator is immutable.
    pub fn set_property(&self, name: &str, value: impl Into<FieldValue>) -> Result<(), StoreError> {
        if name == TYPE_FIELD {
            return Err(StoreError::IllegalState(format!(
                "discriminator of {} cannot be changed",
                self.key()
            )));
        }
        self.0.record.write().set(name, value);
        Ok(())
    }

    /// Global ids of incident edges in the given direction.
    #[must_use]
    pub fn edge_ids(&self, direction: Direction) -> Vec<String> {
        let record = self.0.record.read();
        match direction {
            Direction::Out => record.list(EDGES_OUT_FIELD),
            Direction::In => record.list(EDGES_IN_FIELD),
            Direction::Both => {
                let mut ids = record.list(EDGES_OUT_FIELD);
                for id in record.list(EDGES_IN_FIELD) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids
            }
        }
    }

    pub(crate) fn attach_edge(&self, direction: Direction, edge_id: &str) {
        let mut record = self.0.record.write();
        if matches!(direction, Direction::Out | Direction::Both) {
            record.push_unique(EDGES_OUT_FIELD, edge_id);
        }
        if matches!(direction, Direction::In | Direction::Both) {
            record.push_unique(EDGES_IN_FIELD, edge_id);
        }
    }

    /// Remove an edge id from both adjacency lists.
    pub(crate) fn detach_edge(&self, edge_id: &str) -> bool {
        let mut record = self.0.record.write();
        let out = record.remove_from_list(EDGES_OUT_FIELD, edge_id);
        let inc = record.remove_from_list(EDGES_IN_FIELD, edge_id);
        out || inc
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

// =============================================================================
// EDGE
// =============================================================================

/// What an edge is backed by.
#[derive(Debug)]
pub enum EdgeSource {
    /// Owned, mutable record.
    Record(RwLock<RawRecord>),
    /// Read-only projection of a tabular entry.
    Entry(TabularEntry),
}

#[derive(Debug)]
struct EdgeCell {
    key: CompositeKey,
    source: EdgeSource,
}

/// An edge between two vertices.
#[derive(Debug, Clone)]
pub struct Edge(Arc<EdgeCell>);

impl Edge {
    #[must_use]
    pub fn new(record: RawRecord) -> Self {
        Self(Arc::new(EdgeCell {
            key: record.key(),
            source: EdgeSource::Record(RwLock::new(record)),
        }))
    }

    /// Read-only edge projected from a tabular entry row.
    #[must_use]
    pub fn from_entry(key: CompositeKey, entry: TabularEntry) -> Self {
        Self(Arc::new(EdgeCell {
            key,
            source: EdgeSource::Entry(entry),
        }))
    }

    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        &self.0.key
    }

    /// Whether this edge is a derived view entry rather than owned data.
    #[must_use]
    pub fn is_projection(&self) -> bool {
        matches!(self.0.source, EdgeSource::Entry(_))
    }

    /// Snapshot of the backing record. `None` for projections.
    #[must_use]
    pub fn record(&self) -> Option<RawRecord> {
        match &self.0.source {
            EdgeSource::Record(record) => Some(record.read().clone()),
            EdgeSource::Entry(_) => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> Option<String> {
        match &self.0.source {
            EdgeSource::Record(record) => record.read().get(LABEL_FIELD).map(ToString::to_string),
            EdgeSource::Entry(_) => Some("entry".to_string()),
        }
    }

    /// Key of the endpoint on the `Out` or `In` side.
    ///
    /// Projections point from the view to the document behind the row.
    #[must_use]
    pub fn endpoint(&self, direction: Direction) -> Option<CompositeKey> {
        match &self.0.source {
            EdgeSource::Record(record) => {
                let field = match direction {
                    Direction::Out => OUT_FIELD,
                    Direction::In => IN_FIELD,
                    Direction::Both => return None,
                };
                let record = record.read();
                record
                    .get(field)
                    .and_then(FieldValue::as_text)
                    .and_then(CompositeKey::parse)
            }
            EdgeSource::Entry(entry) => match direction {
                Direction::Out => {
                    Some(CompositeKey::new(entry.partition, entry.view_local.clone()))
                }
                Direction::In => entry
                    .document_local
                    .as_ref()
                    .map(|local| CompositeKey::new(entry.partition, local.clone())),
                Direction::Both => None,
            },
        }
    }

    /// Point the edge at its endpoints.
    pub(crate) fn connect(
        &self,
        out: &CompositeKey,
        inc: &CompositeKey,
        label: &str,
    ) -> Result<(), StoreError> {
        self.update(|record| {
            record.set(OUT_FIELD, out.to_string());
            record.set(IN_FIELD, inc.to_string());
            record.set(LABEL_FIELD, label);
        })
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut RawRecord) -> R) -> Result<R, StoreError> {
        match &self.0.source {
            EdgeSource::Record(record) => Ok(f(&mut record.write())),
            EdgeSource::Entry(_) => Err(StoreError::UnsupportedOperation(format!(
                "view entry edge {} is read-only",
                self.key()
            ))),
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

// =============================================================================
// CATEGORY VERTEX
// =============================================================================

#[derive(Debug)]
struct CategoryCell {
    key: CompositeKey,
    view: CompositeKey,
    values: BTreeMap<String, FieldValue>,
}

/// Synthetic vertex assembled from a category row of a tabular source.
#[derive(Debug, Clone)]
pub struct CategoryVertex(Arc<CategoryCell>);

impl CategoryVertex {
    /// Build from a category row. Returns `None` for non-category rows.
    #[must_use]
    pub fn from_entry(key: CompositeKey, entry: &TabularEntry) -> Option<Self> {
        let value = entry.category_value.clone()?;
        let mut values = BTreeMap::new();
        values.insert("value".to_string(), value);
        values.insert("position".to_string(), FieldValue::Text(entry.position.clone()));
        if let Some(local) = &entry.document_local {
            values.insert("noteid".to_string(), FieldValue::Text(local.clone()));
        }
        Some(Self(Arc::new(CategoryCell {
            key,
            view: CompositeKey::new(entry.partition, entry.view_local.clone()),
            values,
        })))
    }

    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        &self.0.key
    }

    /// Key of the view definition the category belongs to.
    #[must_use]
    pub fn view(&self) -> &CompositeKey {
        &self.0.view
    }

    #[must_use]
    pub fn value(&self) -> Option<&FieldValue> {
        self.0.values.get("value")
    }

    #[must_use]
    pub fn position(&self) -> Option<&str> {
        self.0.values.get("position").and_then(FieldValue::as_text)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.0.values
    }

    /// Row kind this vertex was projected from.
    #[must_use]
    pub const fn row(&self) -> EntryRow {
        EntryRow::Category
    }
}

// =============================================================================
// PROXY VERTEX
// =============================================================================

#[derive(Debug)]
struct ProxyCell {
    shadow: Vertex,
    canonical: Option<Vertex>,
    proxied_id: RwLock<Option<CompositeKey>>,
}

/// A local shadow vertex standing in for a canonical vertex elsewhere.
#[derive(Debug, Clone)]
pub struct ProxyVertex(Arc<ProxyCell>);

impl ProxyVertex {
    /// Wrap a shadow record. The persisted canonical id is read eagerly.
    #[must_use]
    pub fn new(shadow: Vertex) -> Self {
        Self::build(shadow, None)
    }

    /// Proxy over both the shadow and its canonical vertex. A link already
    /// persisted on the shadow is kept as read.
    #[must_use]
    pub fn with_canonical(shadow: Vertex, canonical: Vertex) -> Self {
        Self::build(shadow, Some(canonical))
    }

    fn build(shadow: Vertex, canonical: Option<Vertex>) -> Self {
        let persisted = shadow.read(|record| {
            record
                .get(PROXIED_ID_FIELD)
                .and_then(FieldValue::as_text)
                .and_then(CompositeKey::parse)
        });
        Self(Arc::new(ProxyCell {
            shadow,
            canonical,
            proxied_id: RwLock::new(persisted),
        }))
    }

    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        self.0.shadow.key()
    }

    #[must_use]
    pub fn shadow(&self) -> &Vertex {
        &self.0.shadow
    }

    #[must_use]
    pub fn canonical(&self) -> Option<&Vertex> {
        self.0.canonical.as_ref()
    }

    /// Canonical id, if resolved.
    #[must_use]
    pub fn proxied_id(&self) -> Option<CompositeKey> {
        self.0.proxied_id.read().clone()
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.0.proxied_id.read().is_some()
    }

    /// Forget an id that no longer resolves.
    pub(crate) fn clear_proxied_id(&self) {
        *self.0.proxied_id.write() = None;
    }

    /// Record the canonical id in memory and on the shadow record.
    pub(crate) fn link(&self, canonical: &CompositeKey) {
        *self.0.proxied_id.write() = Some(canonical.clone());
        self.0
            .shadow
            .update(|record| record.set(PROXIED_ID_FIELD, canonical.to_string()));
    }
}

impl PartialEq for ProxyVertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

// =============================================================================
// ELEMENT
// =============================================================================

/// A materialized graph element.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
    Category(CategoryVertex),
    Proxy(ProxyVertex),
}

impl Element {
    #[must_use]
    pub fn key(&self) -> &CompositeKey {
        match self {
            Self::Vertex(v) => v.key(),
            Self::Edge(e) => e.key(),
            Self::Category(c) => c.key(),
            Self::Proxy(p) => p.key(),
        }
    }

    /// Short name of the variant, used in logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Vertex(_) => "vertex",
            Self::Edge(_) => "edge",
            Self::Category(_) => "category",
            Self::Proxy(_) => "proxy",
        }
    }

    /// Whether the element is compatible with the requested kind.
    #[must_use]
    pub fn is_kind(&self, kind: ElementKind) -> bool {
        match kind {
            ElementKind::Vertex => !matches!(self, Self::Edge(_)),
            ElementKind::Edge => matches!(self, Self::Edge(_)),
        }
    }

    #[must_use]
    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Self::Edge(e) => Some(e),
            _ => None,
        }
    }

    /// The record-backed vertex behind this element (the shadow for proxies).
    #[must_use]
    pub fn as_vertex(&self) -> Option<&Vertex> {
        match self {
            Self::Vertex(v) => Some(v),
            Self::Proxy(p) => Some(p.shadow()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_proxy(&self) -> Option<&ProxyVertex> {
        match self {
            Self::Proxy(p) => Some(p),
            _ => None,
        }
    }

    /// Snapshot of the owned record. `None` for projections.
    #[must_use]
    pub fn record(&self) -> Option<RawRecord> {
        match self {
            Self::Vertex(v) => Some(v.record()),
            Self::Edge(e) => e.record(),
            Self::Proxy(p) => Some(p.shadow().record()),
            Self::Category(_) => None,
        }
    }

    /// Pointer identity: both handles share one materialization.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Vertex(a), Self::Vertex(b)) => a.ptr_eq(b),
            (Self::Edge(a), Self::Edge(b)) => a.ptr_eq(b),
            (Self::Category(a), Self::Category(b)) => Arc::ptr_eq(&a.0, &b.0),
            (Self::Proxy(a), Self::Proxy(b)) => Arc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

impl PartialEq for CategoryVertex {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
