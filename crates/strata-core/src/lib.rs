//! # strata-core
//!
//! The element store of Strata - THE LOGIC.
//!
//! This crate maps graph elements (vertices and edges) onto records held by
//! a partitioned, document-oriented backing repository:
//! - caller ids are resolved to composite keys (`key`)
//! - raw records are materialized into typed elements (`materializer`)
//! - materialized elements are cached per store with single-flight loading (`cache`)
//! - shadow records stand in for canonical records elsewhere (`proxy`)
//! - mutations keep cache, secondary index and adjacency lists consistent (`store`)
//!
//! ## Architectural Constraints
//!
//! - Synchronous: NO async runtime, loads run on the calling thread
//! - No ambient state: every store operation receives a `GraphContext`
//! - Backing repositories are reached only through `BackingStore` adapters

// =============================================================================
// MODULES
// =============================================================================

pub mod backend;
pub mod cache;
pub mod element;
pub mod formats;
pub mod graph;
pub mod key;
pub mod materializer;
pub mod primitives;
pub mod proxy;
pub mod registry;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Direction, FieldValue, PartitionId, RawRecord, RecordClass, StoreError, TabularEntry,
};

// =============================================================================
// RE-EXPORTS: Keys & Elements
// =============================================================================

pub use element::{CategoryVertex, Edge, EdgeSource, Element, ElementKind, ProxyVertex, Vertex};
pub use key::{
    CompositeKey, ElementKey, EntryHint, EntryMarker, EntryRow, KindHint, SyntheticKind, localize,
    to_local_id, typed_id,
};

// =============================================================================
// RE-EXPORTS: Element Store
// =============================================================================

pub use backend::{
    BackendStats, BackingStore, MemoryBackend, PartitionHandle, PartitionLocator, Selection,
};
pub use cache::{CacheConfig, CacheStats, LoadingCache};
pub use graph::{Graph, GraphContext, IntentLog, TransactionCoordinator};
pub use materializer::{Delegate, materialize};
pub use proxy::{MirrorResolver, ProxyResolver};
pub use registry::{BuiltinCatalog, FieldType, KindCatalog, KindDescriptor, TypeRegistry};
pub use storage::RedbBackend;
pub use store::{ElementIter, ElementSeq, ElementStore, StoreConfig};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{
    DescriptorHeader, PartitionDescriptor, descriptor_from_bytes, descriptor_to_bytes,
};
