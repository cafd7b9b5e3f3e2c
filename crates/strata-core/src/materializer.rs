//! # Element Materializer
//!
//! Turns a fetched delegate into the correct `Element` variant.
//!
//! ## Rules (first match wins)
//!
//! 1. An already-built element passes through unchanged.
//! 2. A record from the canonical side of a proxied store is a plain vertex.
//! 3. View definitions, icons and ACLs are vertices.
//! 4. A record tagged `edge` is an edge; anything else is a vertex.
//! 5. An entry addressed with the edge marker is a read-only edge.
//! 6. An entry addressed with the vertex marker is a category vertex when it
//!    is a category row; other rows yield no element.

use crate::element::{CategoryVertex, Edge, Element, Vertex};
use crate::key::{CompositeKey, EntryMarker};
use crate::primitives::{EDGE_TYPE_VALUE, VIEW_MARKER_FIELDS};
use crate::types::{RawRecord, RecordClass, StoreError, TabularEntry};
use tracing::debug;

/// What the backing adapter produced for a key.
#[derive(Debug, Clone)]
pub enum Delegate {
    Element(Element),
    Record(RawRecord),
    Entry(TabularEntry),
}

/// Whether a record is a view definition.
#[must_use]
pub fn is_view_definition(record: &RawRecord) -> bool {
    record.class() == RecordClass::ViewDesign
        || VIEW_MARKER_FIELDS.iter().all(|field| record.has(field))
}

/// Build the element for `delegate` fetched under `key`.
///
/// `proxied_source` marks records read from the canonical partition of a
/// proxied store.
pub fn materialize(
    delegate: Delegate,
    key: &CompositeKey,
    proxied_source: bool,
) -> Result<Option<Element>, StoreError> {
    match delegate {
        Delegate::Element(element) => Ok(Some(element)),
        Delegate::Record(record) => Ok(Some(from_record(record, key, proxied_source))),
        Delegate::Entry(entry) => from_entry(entry, key),
    }
}

fn from_record(record: RawRecord, key: &CompositeKey, proxied_source: bool) -> Element {
    // Synthetic records stay addressed by the key they were requested under.
    if key.synthetic_kind().is_some() {
        return Element::Vertex(Vertex::with_key(key.clone(), record));
    }
    if proxied_source
        || is_view_definition(&record)
        || matches!(record.class(), RecordClass::Icon | RecordClass::Acl)
    {
        return Element::Vertex(Vertex::new(record));
    }
    if record.discriminator().as_deref() == Some(EDGE_TYPE_VALUE) {
        Element::Edge(Edge::new(record))
    } else {
        Element::Vertex(Vertex::new(record))
    }
}

fn from_entry(entry: TabularEntry, key: &CompositeKey) -> Result<Option<Element>, StoreError> {
    let hint = key.entry_hint().ok_or_else(|| {
        StoreError::IllegalState(format!("tabular entry fetched for non-entry key {key}"))
    })?;
    match hint.marker {
        EntryMarker::Edge => Ok(Some(Element::Edge(Edge::from_entry(key.clone(), entry)))),
        EntryMarker::Vertex => {
            let category = CategoryVertex::from_entry(key.clone(), &entry);
            if category.is_none() {
                debug!(key = %key, row = ?hint.row, "entry row is not a category");
            }
            Ok(category.map(Element::Category))
        }
    }
}
