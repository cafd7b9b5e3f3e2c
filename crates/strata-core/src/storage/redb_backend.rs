//! # redb-backed Backing Store
//!
//! A disk-backed `BackingStore` using the redb embedded database, providing:
//! - ACID transactions (every save/delete commits on its own)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! All partitions share one database file; records are keyed by their global
//! id. Provisional partition names are resolved to ids on first open and the
//! assignment is persisted.

use crate::backend::{BackingStore, PartitionHandle, PartitionLocator, Selection};
use crate::key::{CompositeKey, SyntheticKind, to_local_id};
use crate::primitives::SYNTHETIC_SEPARATOR;
use crate::types::{PartitionId, RawRecord, StoreError, TabularEntry};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Table for records: global id -> serialized RawRecord bytes
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Table for design records: "{prefix}~{kind}" -> serialized RawRecord bytes
const SYNTHETIC: TableDefinition<&str, &[u8]> = TableDefinition::new("synthetic");

/// Table for tabular entries: "{prefix}{view}/{position}" -> serialized TabularEntry bytes
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

/// Table for provisional partition names: name -> partition id
const PARTITIONS: TableDefinition<&str, u64> = TableDefinition::new("partitions");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

type BytesTable = TableDefinition<'static, &'static str, &'static [u8]>;

fn io_err<E: fmt::Display>(
    partition: impl fmt::Display,
    key: impl fmt::Display,
) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::backing(partition, key, e)
}

fn entry_key(partition: PartitionId, view_local: &str, position: &str) -> String {
    format!("{partition}{view_local}/{position}")
}

fn synthetic_key(partition: PartitionId, kind: SyntheticKind) -> String {
    format!("{partition}{SYNTHETIC_SEPARATOR}{}", kind.name())
}

/// Disk-backed repository shared by every partition handle it opens.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let location = path.as_ref().display().to_string();
        let db = Database::create(path.as_ref())
            .map_err(io_err(&location, "-"))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(io_err(&location, "-"))?;
            for table in [RECORDS, SYNTHETIC, ENTRIES] {
                let _ = write_txn
                    .open_table(table)
                    .map_err(io_err(&location, "-"))?;
            }
            for table in [PARTITIONS, METADATA] {
                let _ = write_txn
                    .open_table(table)
                    .map_err(io_err(&location, "-"))?;
            }
            write_txn
                .commit()
                .map_err(io_err(&location, "-"))?;
        }
        debug!(path = %location, "redb backend opened");
        Ok(Self { db: Arc::new(db) })
    }

    /// Store a singleton design record.
    pub fn put_synthetic(&self, kind: SyntheticKind, record: &RawRecord) -> Result<(), StoreError> {
        let key = synthetic_key(record.partition(), kind);
        self.put(SYNTHETIC, &key, record.partition(), record)
    }

    /// Store a tabular entry row.
    pub fn put_entry(&self, entry: &TabularEntry) -> Result<(), StoreError> {
        let key = entry_key(entry.partition, &entry.view_local, &entry.position);
        self.put(ENTRIES, &key, entry.partition, entry)
    }

    /// Names of provisional partitions resolved so far, with their ids.
    pub fn named_partitions(&self) -> Result<Vec<(String, PartitionId)>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(io_err("-", "partitions"))?;
        let table = read_txn
            .open_table(PARTITIONS)
            .map_err(io_err("-", "partitions"))?;
        let mut result = Vec::new();
        for entry in table
            .iter()
            .map_err(io_err("-", "partitions"))?
        {
            let (name, id) = entry.map_err(io_err("-", "partitions"))?;
            result.push((name.value().to_string(), PartitionId(id.value())));
        }
        Ok(result)
    }

    fn put<T: serde::Serialize>(
        &self,
        table: BytesTable,
        key: &str,
        partition: PartitionId,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = postcard::to_stdvec(value)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(io_err(partition, key))?;
        {
            let mut table = write_txn
                .open_table(table)
                .map_err(io_err(partition, key))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(io_err(partition, key))?;
        }
        write_txn
            .commit()
            .map_err(io_err(partition, key))
    }

    /// Resolve a provisional name, assigning a stable id on first use.
    fn resolve_name(&self, name: &str) -> Result<PartitionId, StoreError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(io_err(name, "-"))?;
        let id = {
            let mut table = write_txn
                .open_table(PARTITIONS)
                .map_err(io_err(name, "-"))?;
            let existing = table
                .get(name)
                .map_err(io_err(name, "-"))?
                .map(|v| v.value());
            match existing {
                Some(id) => id,
                None => {
                    let hash = blake3::hash(name.as_bytes());
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(&hash.as_bytes()[..8]);
                    let id = u64::from_be_bytes(raw);
                    table
                        .insert(name, id)
                        .map_err(io_err(name, "-"))?;
                    debug!(name, partition = %PartitionId(id), "provisional partition resolved");
                    id
                }
            }
        };
        write_txn
            .commit()
            .map_err(io_err(name, "-"))?;
        Ok(PartitionId(id))
    }
}

impl BackingStore for RedbBackend {
    fn open(&self, locator: &PartitionLocator) -> Result<Arc<dyn PartitionHandle>, StoreError> {
        let partition = match locator {
            PartitionLocator::Id(id) => *id,
            PartitionLocator::Named(name) => self.resolve_name(name)?,
        };
        Ok(Arc::new(RedbHandle {
            db: Arc::clone(&self.db),
            partition,
        }))
    }
}

// =============================================================================
// PARTITION HANDLE
// =============================================================================

struct RedbHandle {
    db: Arc<Database>,
    partition: PartitionId,
}

impl RedbHandle {
    fn read<T: serde::de::DeserializeOwned>(
        &self,
        table: BytesTable,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(io_err(self.partition, key))?;
        let table = read_txn
            .open_table(table)
            .map_err(io_err(self.partition, key))?;
        let Some(bytes) = table
            .get(key)
            .map_err(io_err(self.partition, key))?
        else {
            return Ok(None);
        };
        postcard::from_bytes(bytes.value())
            .map(Some)
            .map_err(|e| StoreError::SerializationError(format!("{key}: {e}")))
    }
}

impl PartitionHandle for RedbHandle {
    fn partition_id(&self) -> PartitionId {
        self.partition
    }

    fn fetch(&self, local: &str) -> Result<Option<RawRecord>, StoreError> {
        self.read(RECORDS, &format!("{}{local}", self.partition))
    }

    fn fetch_synthetic(&self, kind: SyntheticKind) -> Result<Option<RawRecord>, StoreError> {
        self.read(SYNTHETIC, &synthetic_key(self.partition, kind))
    }

    fn fetch_entry(&self, key: &CompositeKey) -> Result<Option<TabularEntry>, StoreError> {
        let Some(hint) = key.entry_hint() else {
            return Ok(None);
        };
        self.read(ENTRIES, &entry_key(self.partition, key.local(), &hint.position))
    }

    fn select(&self, selection: &Selection) -> Result<Vec<String>, StoreError> {
        let prefix = self.partition.prefix();
        let read_txn = self
            .db
            .begin_read()
            .map_err(io_err(self.partition, "select"))?;
        let table = read_txn
            .open_table(RECORDS)
            .map_err(io_err(self.partition, "select"))?;
        let mut result = Vec::new();
        // Keys are sorted, so the partition's records form one contiguous run.
        for entry in table
            .range::<&str>(prefix.as_str()..)
            .map_err(io_err(self.partition, "select"))?
        {
            let (key, value) = entry.map_err(io_err(self.partition, "select"))?;
            let Some(local) = key.value().strip_prefix(prefix.as_str()) else {
                break;
            };
            let record: RawRecord = postcard::from_bytes(value.value())
                .map_err(|e| StoreError::SerializationError(format!("{}: {e}", key.value())))?;
            if selection.matches(&record) {
                result.push(local.to_string());
            }
        }
        Ok(result)
    }

    fn create(&self, local: Option<&str>) -> Result<RawRecord, StoreError> {
        if let Some(local) = local {
            return Ok(self
                .fetch(local)?
                .unwrap_or_else(|| RawRecord::new(self.partition, local)));
        }
        let counter = format!("next_local:{}", self.partition);
        let write_txn = self
            .db
            .begin_write()
            .map_err(io_err(self.partition, &counter))?;
        let local = {
            let records = write_txn
                .open_table(RECORDS)
                .map_err(io_err(self.partition, &counter))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(io_err(self.partition, &counter))?;
            let mut next = meta
                .get(counter.as_str())
                .map_err(io_err(self.partition, &counter))?
                .map(|v| v.value())
                .unwrap_or(0);
            let local = loop {
                next += 1;
                let candidate = to_local_id(&format!("{}:{next}", self.partition));
                let taken = records
                    .get(format!("{}{candidate}", self.partition).as_str())
                    .map_err(io_err(self.partition, &counter))?
                    .is_some();
                if !taken {
                    break candidate;
                }
            };
            meta.insert(counter.as_str(), next)
                .map_err(io_err(self.partition, &counter))?;
            local
        };
        write_txn
            .commit()
            .map_err(io_err(self.partition, &counter))?;
        Ok(RawRecord::new(self.partition, local))
    }

    fn save(&self, record: &RawRecord) -> Result<(), StoreError> {
        if record.partition() != self.partition {
            return Err(StoreError::backing(
                self.partition,
                record.global_id(),
                "record belongs to another partition",
            ));
        }
        let key = record.global_id();
        let bytes = postcard::to_stdvec(record)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(io_err(self.partition, &key))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(io_err(self.partition, &key))?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(io_err(self.partition, &key))?;
        }
        write_txn
            .commit()
            .map_err(io_err(self.partition, &key))
    }

    fn delete(&self, record: &RawRecord) -> Result<(), StoreError> {
        let key = record.global_id();
        let write_txn = self
            .db
            .begin_write()
            .map_err(io_err(self.partition, &key))?;
        {
            let mut table = write_txn
                .open_table(RECORDS)
                .map_err(io_err(self.partition, &key))?;
            table
                .remove(key.as_str())
                .map_err(io_err(self.partition, &key))?;
        }
        write_txn
            .commit()
            .map_err(io_err(self.partition, &key))
    }
}

// =============================================================================
// TESTS
// =============================================================================
