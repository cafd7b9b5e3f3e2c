//! # Store Primitives
//!
//! Fixed constants shared by the element store, the materializer and the
//! backing adapters.
//!
//! ## Reserved Fields
//!
//! Raw records are partition-agnostic bags of fields. A handful of field
//! names are reserved by the store and never carry user data:
//!
//! 1. **Discriminator**: `TYPE_FIELD` tags a record as vertex or edge.
//! 2. **Endpoints**: `OUT_FIELD` / `IN_FIELD` / `LABEL_FIELD` on edge records.
//! 3. **Adjacency**: `EDGES_OUT_FIELD` / `EDGES_IN_FIELD` on vertex records.
//! 4. **Proxy link**: `PROXIED_ID_FIELD` on shadow records.

use std::time::Duration;

/// Reserved discriminator field holding the element kind tag.
pub const TYPE_FIELD: &str = "$graph_type";

/// Discriminator value of vertex records.
pub const VERTEX_TYPE_VALUE: &str = "vertex";

/// Discriminator value of edge records.
pub const EDGE_TYPE_VALUE: &str = "edge";

/// Global id of the outgoing endpoint of an edge record.
pub const OUT_FIELD: &str = "$out";

/// Global id of the incoming endpoint of an edge record.
pub const IN_FIELD: &str = "$in";

/// Label of an edge record.
pub const LABEL_FIELD: &str = "$label";

/// Outgoing adjacency list of a vertex record (edge global ids).
pub const EDGES_OUT_FIELD: &str = "$edges_out";

/// Incoming adjacency list of a vertex record (edge global ids).
pub const EDGES_IN_FIELD: &str = "$edges_in";

/// Persisted canonical id of a proxy shadow record.
pub const PROXIED_ID_FIELD: &str = "$proxied_id";

/// Structural markers of a view definition record.
pub const VIEW_MARKER_FIELDS: [&str; 2] = ["$Index", "$Collation"];

/// Length of the textual partition prefix (16 hex characters).
pub const PARTITION_PREFIX_LEN: usize = 16;

/// Length of a local record id (32 hex characters).
pub const LOCAL_ID_LEN: usize = 32;

/// Length of a global id: partition prefix followed by a local id.
pub const GLOBAL_ID_LEN: usize = PARTITION_PREFIX_LEN + LOCAL_ID_LEN;

/// Entry keys are a two character hint followed by a global id and a position.
pub const ENTRY_KEY_MIN_LEN: usize = 2 + GLOBAL_ID_LEN + 1;

/// Separator between the partition prefix and a synthetic record name.
pub const SYNTHETIC_SEPARATOR: char = '~';

// =============================================================================
// CACHE DEFAULTS
// =============================================================================

/// Default bound on the number of cached elements per store.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 25_000;

/// Default time an element stays cached after it was written.
pub const DEFAULT_EXPIRE_AFTER_WRITE: Duration = Duration::from_secs(10 * 60);

// =============================================================================
// PARTITION DESCRIPTOR FORMAT
// =============================================================================

/// Magic bytes for the partition descriptor header.
pub const MAGIC_BYTES: &[u8; 4] = b"STPD";

/// Current partition descriptor format version.
///
/// Increment this when making breaking changes to the descriptor payload.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum accepted descriptor size. Descriptors only hold kind names.
pub const MAX_DESCRIPTOR_SIZE: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_id_is_prefix_plus_local() {
        assert_eq!(GLOBAL_ID_LEN, 48);
        assert!(ENTRY_KEY_MIN_LEN > 50);
    }

    #[test]
    fn cache_defaults() {
        assert_eq!(DEFAULT_CACHE_MAX_ENTRIES, 25_000);
        assert_eq!(DEFAULT_EXPIRE_AFTER_WRITE.as_secs(), 600);
    }
}
