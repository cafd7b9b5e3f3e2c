//! # Storage
//!
//! Disk-backed adapters.

mod redb_backend;

pub use redb_backend::RedbBackend;
