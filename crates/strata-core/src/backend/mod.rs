//! # Backing Store Adapter
//!
//! The element store never talks to a repository directly. It opens a
//! `PartitionHandle` through a `BackingStore` and performs every fetch,
//! allocation and deletion through that handle.
//!
//! Handles are reference counted (`Arc<dyn PartitionHandle>`): a handle lives
//! as long as some store or caller still holds it, and releases its
//! resources when the last owner drops it.
//!
//! Two adapters ship with the crate:
//! - `MemoryBackend`: volatile, for tests and embedding
//! - `RedbBackend` (in `storage`): disk-backed, ACID

mod memory;

pub use memory::{BackendStats, MemoryBackend};

use crate::element::ElementKind;
use crate::key::{CompositeKey, SyntheticKind};
use crate::primitives::{EDGE_TYPE_VALUE, VERTEX_TYPE_VALUE};
use crate::types::{FieldValue, PartitionId, RawRecord, StoreError, TabularEntry};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// PARTITION LOCATOR
// =============================================================================

/// How a store names the partition it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionLocator {
    /// A concrete partition id.
    Id(PartitionId),
    /// A provisional name the adapter resolves to an id on first open.
    Named(String),
}

impl PartitionLocator {
    /// Parse a configured locator: a 16 character prefix is an id, anything
    /// else is a provisional name.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        PartitionId::parse_prefix(text).map_or_else(|| Self::Named(text.to_string()), Self::Id)
    }

    /// The id, when it is already known without opening the partition.
    #[must_use]
    pub fn known_id(&self) -> Option<PartitionId> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Named(_) => None,
        }
    }
}

impl fmt::Display for PartitionLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => id.fmt(f),
            Self::Named(name) => f.write_str(name),
        }
    }
}

// =============================================================================
// SELECTION
// =============================================================================

/// A selection predicate adapters evaluate to enumerate records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Records tagged with the given kind.
    Kind(ElementKind),
    /// Records tagged as vertex or edge.
    AnyElement,
    /// Records with `field == value`, optionally restricted to a kind.
    FieldEquals {
        kind: Option<ElementKind>,
        field: String,
        value: FieldValue,
    },
    Or(Vec<Selection>),
    And(Vec<Selection>),
}

impl Selection {
    #[must_use]
    pub fn vertices() -> Self {
        Self::Kind(ElementKind::Vertex)
    }

    #[must_use]
    pub fn edges() -> Self {
        Self::Kind(ElementKind::Edge)
    }

    #[must_use]
    pub fn elements() -> Self {
        Self::AnyElement
    }

    /// Key/value filter restricted to one kind.
    #[must_use]
    pub fn field_equals(
        kind: Option<ElementKind>,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self::FieldEquals {
            kind,
            field: field.into(),
            value: value.into(),
        }
    }

    /// Evaluate the predicate against a record.
    #[must_use]
    pub fn matches(&self, record: &RawRecord) -> bool {
        match self {
            Self::Kind(kind) => record.discriminator().as_deref() == Some(kind.tag()),
            Self::AnyElement => matches!(
                record.discriminator().as_deref(),
                Some(VERTEX_TYPE_VALUE | EDGE_TYPE_VALUE)
            ),
            Self::FieldEquals { kind, field, value } => {
                kind.is_none_or(|k| Self::Kind(k).matches(record))
                    && record.get(field) == Some(value)
            }
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Self::And(parts) => parts.iter().all(|p| p.matches(record)),
        }
    }
}

// =============================================================================
// ADAPTER TRAITS
// =============================================================================

/// Opens partition handles of one backing repository.
pub trait BackingStore: Send + Sync {
    /// Open (or attach to) a partition.
    fn open(&self, locator: &PartitionLocator) -> Result<Arc<dyn PartitionHandle>, StoreError>;
}

/// An open partition of the backing repository.
///
/// All methods may block on I/O. Timeouts, if any, are the adapter's concern.
pub trait PartitionHandle: Send + Sync {
    /// Id of the partition behind this handle.
    fn partition_id(&self) -> PartitionId;

    /// Fetch a record by local id.
    fn fetch(&self, local: &str) -> Result<Option<RawRecord>, StoreError>;

    /// Fetch a singleton design record (icon, ACL, view definition).
    fn fetch_synthetic(&self, kind: SyntheticKind) -> Result<Option<RawRecord>, StoreError>;

    /// Fetch a row of a tabular source addressed by an entry key.
    fn fetch_entry(&self, key: &CompositeKey) -> Result<Option<TabularEntry>, StoreError>;

    /// Local ids of records matching the selection, in a stable order.
    fn select(&self, selection: &Selection) -> Result<Vec<String>, StoreError>;

    /// Allocate a record. An existing record with the same local id is
    /// returned instead; `None` lets the adapter assign a fresh id.
    fn create(&self, local: Option<&str>) -> Result<RawRecord, StoreError>;

    /// Persist a record.
    fn save(&self, record: &RawRecord) -> Result<(), StoreError>;

    /// Delete a record. Deleting an absent record is not an error.
    fn delete(&self, record: &RawRecord) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::TYPE_FIELD;

    fn tagged(tag: &str) -> RawRecord {
        RawRecord::new(PartitionId(1), "a").with_field(TYPE_FIELD, tag)
    }

    #[test]
    fn locator_parse() {
        assert_eq!(
            PartitionLocator::parse("AAAA000000000000"),
            PartitionLocator::Id(PartitionId(0xAAAA_0000_0000_0000))
        );
        assert_eq!(
            PartitionLocator::parse("people"),
            PartitionLocator::Named("people".to_string())
        );
    }

    #[test]
    fn default_selections_follow_discriminator() {
        assert!(Selection::vertices().matches(&tagged("vertex")));
        assert!(!Selection::vertices().matches(&tagged("edge")));
        assert!(Selection::edges().matches(&tagged("edge")));
        assert!(Selection::elements().matches(&tagged("edge")));
        assert!(!Selection::elements().matches(&RawRecord::new(PartitionId(1), "b")));
    }

    #[test]
    fn field_selection() {
        let record = tagged("vertex").with_field("name", "Alice");
        let sel = Selection::field_equals(Some(ElementKind::Vertex), "name", "Alice");
        assert!(sel.matches(&record));
        let sel = Selection::field_equals(Some(ElementKind::Edge), "name", "Alice");
        assert!(!sel.matches(&record));
        let sel = Selection::Or(vec![
            Selection::edges(),
            Selection::field_equals(None, "name", "Alice"),
        ]);
        assert!(sel.matches(&record));
    }
}
