//! # Composite Keys
//!
//! Structured element identifiers and the parsing rules for their text forms.
//!
//! ## Text Forms
//!
//! | Form      | Layout                                              |
//! |-----------|-----------------------------------------------------|
//! | Global id | `{partition:16}{local:32}`                          |
//! | Synthetic | `{partition:16}~{icon,acl,view}`                    |
//! | Entry     | `{E,V}{C,D,T,U}{partition:16}{view:32}{position}`  |
//!
//! Anything else is a flat caller id. Flat ids are localized against a
//! partition and mapped to a local id with [`to_local_id`].

use crate::primitives::{
    ENTRY_KEY_MIN_LEN, GLOBAL_ID_LEN, LOCAL_ID_LEN, PARTITION_PREFIX_LEN, SYNTHETIC_SEPARATOR,
};
use crate::types::PartitionId;
use std::fmt;

// =============================================================================
// KIND HINTS
// =============================================================================

/// Whether a tabular entry is presented as an edge or as a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryMarker {
    Edge,
    Vertex,
}

/// Row kind of a tabular entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryRow {
    Category,
    Document,
    Total,
    Unknown,
}

/// Hint carried by keys that address a tabular entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHint {
    pub marker: EntryMarker,
    pub row: EntryRow,
    pub position: String,
}

impl EntryHint {
    fn code(&self) -> [char; 2] {
        let marker = match self.marker {
            EntryMarker::Edge => 'E',
            EntryMarker::Vertex => 'V',
        };
        let row = match self.row {
            EntryRow::Category => 'C',
            EntryRow::Document => 'D',
            EntryRow::Total => 'T',
            EntryRow::Unknown => 'U',
        };
        [marker, row]
    }

    fn from_code(code: &str) -> Option<(EntryMarker, EntryRow)> {
        let mut chars = code.chars();
        let marker = match chars.next()? {
            'E' => EntryMarker::Edge,
            'V' => EntryMarker::Vertex,
            _ => return None,
        };
        let row = match chars.next()? {
            'C' => EntryRow::Category,
            'D' => EntryRow::Document,
            'T' => EntryRow::Total,
            'U' => EntryRow::Unknown,
            _ => return None,
        };
        Some((marker, row))
    }
}

/// Singleton design records a partition may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyntheticKind {
    Icon,
    Acl,
    ViewDefinition,
}

impl SyntheticKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Icon => "icon",
            Self::Acl => "acl",
            Self::ViewDefinition => "view",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "icon" => Some(Self::Icon),
            "acl" => Some(Self::Acl),
            "view" => Some(Self::ViewDefinition),
            _ => None,
        }
    }
}

/// Optional kind discriminator of a composite key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindHint {
    Entry(EntryHint),
    Synthetic(SyntheticKind),
}

// =============================================================================
// COMPOSITE KEY
// =============================================================================

/// Partition id + local id, optionally carrying a kind hint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeKey {
    partition: PartitionId,
    local: String,
    hint: Option<KindHint>,
}

impl CompositeKey {
    /// Plain key of a generic record.
    #[must_use]
    pub fn new(partition: PartitionId, local: impl Into<String>) -> Self {
        Self {
            partition,
            local: local.into(),
            hint: None,
        }
    }

    /// Key of a tabular entry inside the view `view_local`.
    #[must_use]
    pub fn entry(
        partition: PartitionId,
        view_local: impl Into<String>,
        marker: EntryMarker,
        row: EntryRow,
        position: impl Into<String>,
    ) -> Self {
        Self {
            partition,
            local: view_local.into(),
            hint: Some(KindHint::Entry(EntryHint {
                marker,
                row,
                position: position.into(),
            })),
        }
    }

    /// Key of a singleton design record.
    #[must_use]
    pub fn synthetic(partition: PartitionId, kind: SyntheticKind) -> Self {
        Self {
            partition,
            local: String::new(),
            hint: Some(KindHint::Synthetic(kind)),
        }
    }

    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    #[must_use]
    pub fn local(&self) -> &str {
        &self.local
    }

    #[must_use]
    pub fn hint(&self) -> Option<&KindHint> {
        self.hint.as_ref()
    }

    #[must_use]
    pub fn entry_hint(&self) -> Option<&EntryHint> {
        match &self.hint {
            Some(KindHint::Entry(hint)) => Some(hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn synthetic_kind(&self) -> Option<SyntheticKind> {
        match self.hint {
            Some(KindHint::Synthetic(kind)) => Some(kind),
            _ => None,
        }
    }

    /// Same key re-addressed to another partition.
    #[must_use]
    pub fn with_partition(&self, partition: PartitionId) -> Self {
        Self {
            partition,
            ..self.clone()
        }
    }

    /// Parse one of the structured text forms.
    ///
    /// Returns `None` for flat ids; those are resolved by the store.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        if !text.is_ascii() {
            return None;
        }
        if text.len() >= ENTRY_KEY_MIN_LEN
            && let Some((marker, row)) = EntryHint::from_code(&text[..2])
            && is_global_id(&text[2..2 + GLOBAL_ID_LEN])
        {
            let partition = PartitionId::parse_prefix(&text[2..2 + PARTITION_PREFIX_LEN])?;
            let view = text[2 + PARTITION_PREFIX_LEN..2 + GLOBAL_ID_LEN].to_ascii_lowercase();
            let position = &text[2 + GLOBAL_ID_LEN..];
            return Some(Self::entry(partition, view, marker, row, position));
        }
        if text.len() > PARTITION_PREFIX_LEN + 1
            && text[PARTITION_PREFIX_LEN..].starts_with(SYNTHETIC_SEPARATOR)
        {
            let partition = PartitionId::parse_prefix(&text[..PARTITION_PREFIX_LEN])?;
            let kind = SyntheticKind::from_name(&text[PARTITION_PREFIX_LEN + 1..])?;
            return Some(Self::synthetic(partition, kind));
        }
        if is_global_id(text) {
            let partition = PartitionId::parse_prefix(&text[..PARTITION_PREFIX_LEN])?;
            return Some(Self::new(
                partition,
                text[PARTITION_PREFIX_LEN..].to_ascii_lowercase(),
            ));
        }
        None
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hint {
            None => write!(f, "{}{}", self.partition, self.local),
            Some(KindHint::Synthetic(kind)) => {
                write!(f, "{}{}{}", self.partition, SYNTHETIC_SEPARATOR, kind.name())
            }
            Some(KindHint::Entry(hint)) => {
                let [marker, row] = hint.code();
                write!(
                    f,
                    "{marker}{row}{}{}{}",
                    self.partition, self.local, hint.position
                )
            }
        }
    }
}

// =============================================================================
// ELEMENT KEY (caller-supplied ids)
// =============================================================================

/// An id as supplied by a caller: either structured or a flat string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementKey {
    Key(CompositeKey),
    Text(String),
}

impl From<CompositeKey> for ElementKey {
    fn from(key: CompositeKey) -> Self {
        Self::Key(key)
    }
}

impl From<&CompositeKey> for ElementKey {
    fn from(key: &CompositeKey) -> Self {
        Self::Key(key.clone())
    }
}

impl From<&str> for ElementKey {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ElementKey {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => key.fmt(f),
            Self::Text(text) => f.write_str(text),
        }
    }
}

// =============================================================================
// ID HELPERS
// =============================================================================

/// Check whether `text` is a 32 character hex local id.
#[must_use]
pub fn is_local_id(text: &str) -> bool {
    text.len() == LOCAL_ID_LEN && text.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Check whether `text` is a partition prefix followed by a local id.
#[must_use]
pub fn is_global_id(text: &str) -> bool {
    text.len() == GLOBAL_ID_LEN
        && text.is_ascii()
        && PartitionId::is_valid_prefix(&text[..PARTITION_PREFIX_LEN])
        && is_local_id(&text[PARTITION_PREFIX_LEN..])
}

/// Map an arbitrary caller id to a local record id.
///
/// Ids that already are local ids are lower-cased; anything else is hashed.
#[must_use]
pub fn to_local_id(text: &str) -> String {
    if is_local_id(text) {
        return text.to_ascii_lowercase();
    }
    blake3::hash(text.as_bytes()).to_hex()[..LOCAL_ID_LEN].to_string()
}

/// Strip this partition's prefix from `text` if it carries it.
///
/// A mismatching prefix leaves the id unchanged: it is a foreign id.
#[must_use]
pub fn localize(text: &str, partition: PartitionId) -> &str {
    if text.len() > PARTITION_PREFIX_LEN
        && text.is_char_boundary(PARTITION_PREFIX_LEN)
        && text[..PARTITION_PREFIX_LEN].eq_ignore_ascii_case(&partition.prefix())
    {
        &text[PARTITION_PREFIX_LEN..]
    } else {
        text
    }
}

/// Partition prefix carried by a flat id, if it carries a valid one.
///
/// A bare 16 character id names a partition; a 32 character id is a local
/// id and carries no partition.
#[must_use]
pub fn typed_id(id: &str) -> Option<PartitionId> {
    if !id.is_ascii() {
        return None;
    }
    match id.len() {
        PARTITION_PREFIX_LEN => PartitionId::parse_prefix(id),
        LOCAL_ID_LEN => None,
        len if len > PARTITION_PREFIX_LEN => PartitionId::parse_prefix(&id[..PARTITION_PREFIX_LEN]),
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PartitionId = PartitionId(0xAAAA_0000_0000_0000);
    const LOCAL: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn localize_strips_own_prefix() {
        let id = format!("AAAA000000000000{LOCAL}");
        assert_eq!(localize(&id, P1), LOCAL);
        assert_eq!(localize(&id.to_lowercase(), P1), LOCAL);
    }

    #[test]
    fn localize_keeps_foreign_ids() {
        let id = format!("BBBB000000000000{LOCAL}");
        assert_eq!(localize(&id, P1), id);
        assert_eq!(localize("short", P1), "short");
        assert_eq!(localize("AAAA000000000000", P1), "AAAA000000000000");
    }

    #[test]
    fn typed_id_rules() {
        assert_eq!(typed_id("AAAA000000000000"), Some(P1));
        assert_eq!(typed_id(LOCAL), None);
        assert_eq!(typed_id(&format!("AAAA000000000000{LOCAL}")), Some(P1));
        assert_eq!(typed_id("AAAA00000000000Zsomething"), None);
        assert_eq!(typed_id("vertex-1"), None);
    }

    #[test]
    fn global_key_text_roundtrip() {
        let key = CompositeKey::new(P1, LOCAL);
        let text = key.to_string();
        assert_eq!(text, format!("AAAA000000000000{LOCAL}"));
        assert_eq!(CompositeKey::parse(&text), Some(key));
    }

    #[test]
    fn entry_key_parses_hint_and_position() {
        let text = format!("VCAAAA000000000000{LOCAL}1.2");
        let key = CompositeKey::parse(&text).expect("entry key");
        let hint = key.entry_hint().expect("hint");
        assert_eq!(hint.marker, EntryMarker::Vertex);
        assert_eq!(hint.row, EntryRow::Category);
        assert_eq!(hint.position, "1.2");
        assert_eq!(key.local(), LOCAL);
        assert_eq!(key.to_string(), text);
    }

    #[test]
    fn synthetic_key_parses() {
        let key = CompositeKey::parse("AAAA000000000000~icon").expect("synthetic");
        assert_eq!(key.synthetic_kind(), Some(SyntheticKind::Icon));
        assert_eq!(key.to_string(), "AAAA000000000000~icon");
    }

    #[test]
    fn flat_ids_do_not_parse() {
        assert_eq!(CompositeKey::parse("vertex-1"), None);
        assert_eq!(CompositeKey::parse(LOCAL), None);
        assert_eq!(CompositeKey::parse("AAAA000000000000notalocalid"), None);
    }

    #[test]
    fn local_id_mapping_is_stable() {
        assert_eq!(to_local_id(&LOCAL.to_uppercase()), LOCAL);
        let hashed = to_local_id("vertex-1");
        assert!(is_local_id(&hashed));
        assert_eq!(hashed, to_local_id("vertex-1"));
        assert_ne!(hashed, to_local_id("vertex-2"));
    }
}
