//! # Core Type Definitions
//!
//! This module contains the raw data types shared by every layer of the store:
//! - Partition identifiers (`PartitionId`)
//! - Raw record representation (`RawRecord`, `FieldValue`, `RecordClass`)
//! - Tabular entries served by indexed sources (`TabularEntry`)
//! - Error types (`StoreError`)
//!
//! Raw records are partition-agnostic: the store decides what element a
//! record becomes, the record itself only carries fields.

use crate::key::CompositeKey;
use crate::primitives::{PARTITION_PREFIX_LEN, TYPE_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

// =============================================================================
// PARTITION IDENTIFIER
// =============================================================================

/// Identifier of one logical partition of the backing repository.
///
/// The textual form is the 16 character uppercase hex "partition prefix".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u64);

impl PartitionId {
    /// Create a partition id from its raw 64-bit value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw 64-bit value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The 16 character textual prefix of this partition.
    #[must_use]
    pub fn prefix(self) -> String {
        format!("{:016X}", self.0)
    }

    /// Parse a 16 character hex prefix. Returns `None` for anything else.
    #[must_use]
    pub fn parse_prefix(text: &str) -> Option<Self> {
        if text.len() != PARTITION_PREFIX_LEN || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u64::from_str_radix(text, 16).ok().map(Self)
    }

    /// Check whether `text` is a well-formed partition prefix.
    #[must_use]
    pub fn is_valid_prefix(text: &str) -> bool {
        Self::parse_prefix(text).is_some()
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

// =============================================================================
// FIELD VALUES
// =============================================================================

/// Value of a single record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Int(i64),
    Bool(bool),
    TextList(Vec<String>),
}

impl FieldValue {
    /// Borrow the value as text, if it is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the value as a list of strings, if it is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::TextList(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::TextList(items) => f.write_str(&items.join(", ")),
        }
    }
}

// =============================================================================
// RAW RECORD
// =============================================================================

/// Structural class of a raw record.
///
/// Design records (view definitions, icons, access control lists) live next
/// to data records in the same partition but are never graph edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordClass {
    #[default]
    Data,
    ViewDesign,
    Icon,
    Acl,
}

/// A raw key/value record held by the backing repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    partition: PartitionId,
    local_id: String,
    class: RecordClass,
    fields: BTreeMap<String, FieldValue>,
    /// Set for records allocated but never saved.
    #[serde(skip)]
    is_new: bool,
}

impl RawRecord {
    /// Create a new, unsaved data record.
    #[must_use]
    pub fn new(partition: PartitionId, local_id: impl Into<String>) -> Self {
        Self {
            partition,
            local_id: local_id.into(),
            class: RecordClass::Data,
            fields: BTreeMap::new(),
            is_new: true,
        }
    }

    /// Builder: set the structural class.
    #[must_use]
    pub fn with_class(mut self, class: RecordClass) -> Self {
        self.class = class;
        self
    }

    /// Builder: set a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    #[must_use]
    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    #[must_use]
    pub fn class(&self) -> RecordClass {
        self.class
    }

    /// The composite key addressing this record.
    #[must_use]
    pub fn key(&self) -> CompositeKey {
        CompositeKey::new(self.partition, self.local_id.clone())
    }

    /// Partition prefix followed by the local id.
    #[must_use]
    pub fn global_id(&self) -> String {
        format!("{}{}", self.partition, self.local_id)
    }

    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Mark the record as persisted by its backing handle.
    pub fn mark_saved(&mut self) {
        self.is_new = false;
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Set a field, returning the previous value.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning the previous value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// All fields in deterministic order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Discriminator tag rendered as text. Blank tags count as absent.
    #[must_use]
    pub fn discriminator(&self) -> Option<String> {
        self.fields
            .get(TYPE_FIELD)
            .map(ToString::to_string)
            .filter(|tag| !tag.trim().is_empty())
    }

    /// Append `item` to a list field unless already present.
    pub fn push_unique(&mut self, name: &str, item: &str) {
        let entry = self
            .fields
            .entry(name.to_string())
            .or_insert_with(|| FieldValue::TextList(Vec::new()));
        match entry {
            FieldValue::TextList(items) => {
                if !items.iter().any(|i| i == item) {
                    items.push(item.to_string());
                }
            }
            other => *other = FieldValue::TextList(vec![item.to_string()]),
        }
    }

    /// Remove `item` from a list field. Returns whether it was present.
    pub fn remove_from_list(&mut self, name: &str, item: &str) -> bool {
        match self.fields.get_mut(name) {
            Some(FieldValue::TextList(items)) => {
                let before = items.len();
                items.retain(|i| i != item);
                before != items.len()
            }
            _ => false,
        }
    }

    /// List field as owned strings (empty when absent).
    #[must_use]
    pub fn list(&self, name: &str) -> Vec<String> {
        self.fields
            .get(name)
            .and_then(FieldValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }
}

// =============================================================================
// TABULAR ENTRY
// =============================================================================

/// A row of an indexed/tabular source (a view).
///
/// Tabular entries are projections: they are never owned data and are
/// never deleted through the element store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabularEntry {
    /// Partition holding the view.
    pub partition: PartitionId,
    /// Local id of the view definition record.
    pub view_local: String,
    /// Hierarchical position of the row, e.g. `1.2`.
    pub position: String,
    /// Category value. `Some` only for category rows.
    pub category_value: Option<FieldValue>,
    /// Local id of the data record behind a document row.
    pub document_local: Option<String>,
    /// Column values of the row.
    pub columns: BTreeMap<String, FieldValue>,
}

impl TabularEntry {
    #[must_use]
    pub fn is_category(&self) -> bool {
        self.category_value.is_some()
    }
}

// =============================================================================
// DIRECTION
// =============================================================================

/// Direction of incident edges relative to a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the element store.
///
/// - `NotFound` is an empty result, not a failure; it is never logged as an error
/// - Errors are `Clone` so a single-flight load can hand the same fault to every waiter
/// - Library code never panics; every failure is a `StoreError`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing fetch legitimately yielded nothing.
    #[error("Element not found: {0}")]
    NotFound(String),

    /// The backing repository refused access.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A proxy shadow could not be resolved to its canonical record.
    #[error("Unresolved proxy: {0}")]
    UnresolvedProxy(String),

    /// An existing record's discriminator disagrees with the requested kind.
    #[error("Type conflict on {key}: requested {requested}, record is tagged {found}")]
    TypeConflict {
        key: String,
        requested: String,
        found: String,
    },

    /// The element is a read-only projection.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An adapter-level fetch/create/save/delete error.
    #[error("Backing I/O failure in partition {partition} for {key}: {message}")]
    BackingIo {
        partition: String,
        key: String,
        message: String,
    },

    /// The store reached a state it cannot handle.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The key text could not be parsed.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// A kind name could not be resolved through the kind catalog.
    #[error("Unknown kind: {0}")]
    UnknownKind(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl StoreError {
    /// Build a `BackingIo` error with partition and key context.
    pub fn backing(
        partition: impl fmt::Display,
        key: impl fmt::Display,
        message: impl fmt::Display,
    ) -> Self {
        Self::BackingIo {
            partition: partition.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_prefix_roundtrip() {
        let id = PartitionId::new(0xAAAA_0000_0000_0000);
        assert_eq!(id.prefix(), "AAAA000000000000");
        assert_eq!(PartitionId::parse_prefix("aaaa000000000000"), Some(id));
    }

    #[test]
    fn partition_prefix_rejects_malformed() {
        assert!(!PartitionId::is_valid_prefix("AAAA00000000000"));
        assert!(!PartitionId::is_valid_prefix("AAAA00000000000G"));
        assert!(!PartitionId::is_valid_prefix("+AAA000000000000"));
    }

    #[test]
    fn blank_discriminator_counts_as_absent() {
        let record = RawRecord::new(PartitionId(1), "a").with_field(TYPE_FIELD, "  ");
        assert_eq!(record.discriminator(), None);

        let record = RawRecord::new(PartitionId(1), "a").with_field(TYPE_FIELD, "edge");
        assert_eq!(record.discriminator().as_deref(), Some("edge"));
    }

    #[test]
    fn list_fields_stay_unique() {
        let mut record = RawRecord::new(PartitionId(1), "a");
        record.push_unique("$edges_out", "e1");
        record.push_unique("$edges_out", "e1");
        record.push_unique("$edges_out", "e2");
        assert_eq!(record.list("$edges_out"), vec!["e1", "e2"]);

        assert!(record.remove_from_list("$edges_out", "e1"));
        assert!(!record.remove_from_list("$edges_out", "e1"));
        assert_eq!(record.list("$edges_out"), vec!["e2"]);
    }

    #[test]
    fn new_records_are_unsaved() {
        let mut record = RawRecord::new(PartitionId(1), "a");
        assert!(record.is_new());
        record.mark_saved();
        assert!(!record.is_new());
    }
}
