//! # In-Memory Backend
//!
//! Volatile `BackingStore` used for tests and embedding. Counts every
//! adapter call so callers can assert how often the store reached the
//! backing repository.

use super::{BackingStore, PartitionHandle, PartitionLocator, Selection};
use crate::key::{CompositeKey, SyntheticKind, to_local_id};
use crate::types::{PartitionId, RawRecord, StoreError, TabularEntry};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Snapshot of adapter call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub opens: u64,
    pub fetches: u64,
    pub creates: u64,
    pub saves: u64,
    pub deletes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicU64,
    fetches: AtomicU64,
    creates: AtomicU64,
    saves: AtomicU64,
    deletes: AtomicU64,
}

#[derive(Debug, Default)]
struct MemoryPartition {
    records: BTreeMap<String, RawRecord>,
    synthetic: BTreeMap<SyntheticKind, RawRecord>,
    entries: BTreeMap<(String, String), TabularEntry>,
    denied: bool,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Shared {
    partitions: RwLock<BTreeMap<PartitionId, MemoryPartition>>,
    names: RwLock<BTreeMap<String, PartitionId>>,
    counters: Counters,
    fetch_delay: Mutex<Duration>,
}

/// Volatile backing repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provisional partition name.
    pub fn name_partition(&self, name: impl Into<String>, partition: PartitionId) {
        self.shared.names.write().insert(name.into(), partition);
        self.shared.partitions.write().entry(partition).or_default();
    }

    /// Seed a saved record.
    pub fn insert(&self, mut record: RawRecord) {
        record.mark_saved();
        self.shared
            .partitions
            .write()
            .entry(record.partition())
            .or_default()
            .records
            .insert(record.local_id().to_string(), record);
    }

    /// Seed a singleton design record.
    pub fn insert_synthetic(&self, kind: SyntheticKind, mut record: RawRecord) {
        record.mark_saved();
        self.shared
            .partitions
            .write()
            .entry(record.partition())
            .or_default()
            .synthetic
            .insert(kind, record);
    }

    /// Seed a tabular entry row.
    pub fn insert_entry(&self, entry: TabularEntry) {
        self.shared
            .partitions
            .write()
            .entry(entry.partition)
            .or_default()
            .entries
            .insert((entry.view_local.clone(), entry.position.clone()), entry);
    }

    /// Make every subsequent read or write of `partition` fail with `PermissionDenied`.
    pub fn deny(&self, partition: PartitionId) {
        self.shared
            .partitions
            .write()
            .entry(partition)
            .or_default()
            .denied = true;
    }

    /// Slow down record fetches, to widen race windows in tests.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.shared.fetch_delay.lock() = delay;
    }

    /// Current persisted state of a record.
    #[must_use]
    pub fn record(&self, key: &CompositeKey) -> Option<RawRecord> {
        self.shared
            .partitions
            .read()
            .get(&key.partition())
            .and_then(|p| p.records.get(key.local()).cloned())
    }

    /// Number of persisted records in a partition.
    #[must_use]
    pub fn len(&self, partition: PartitionId) -> usize {
        self.shared
            .partitions
            .read()
            .get(&partition)
            .map_or(0, |p| p.records.len())
    }

    #[must_use]
    pub fn is_empty(&self, partition: PartitionId) -> bool {
        self.len(partition) == 0
    }

    #[must_use]
    pub fn stats(&self) -> BackendStats {
        let c = &self.shared.counters;
        BackendStats {
            opens: c.opens.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            creates: c.creates.load(Ordering::Relaxed),
            saves: c.saves.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
        }
    }
}

impl BackingStore for MemoryBackend {
    fn open(&self, locator: &PartitionLocator) -> Result<Arc<dyn PartitionHandle>, StoreError> {
        let partition = match locator {
            PartitionLocator::Id(id) => *id,
            PartitionLocator::Named(name) => {
                self.shared.names.read().get(name).copied().ok_or_else(|| {
                    StoreError::backing(name, "-", "no partition registered under this name")
                })?
            }
        };
        self.shared.partitions.write().entry(partition).or_default();
        self.shared.counters.opens.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryHandle {
            partition,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryHandle {
    partition: PartitionId,
    shared: Arc<Shared>,
}

impl MemoryHandle {
    fn read<R>(&self, f: impl FnOnce(&MemoryPartition) -> R) -> Result<R, StoreError> {
        let partitions = self.shared.partitions.read();
        let partition = partitions.get(&self.partition).ok_or_else(|| {
            StoreError::backing(self.partition, "-", "partition has been dropped")
        })?;
        if partition.denied {
            return Err(StoreError::PermissionDenied(format!(
                "partition {}",
                self.partition
            )));
        }
        Ok(f(partition))
    }

    fn write<R>(&self, f: impl FnOnce(&mut MemoryPartition) -> R) -> Result<R, StoreError> {
        let mut partitions = self.shared.partitions.write();
        let partition = partitions.entry(self.partition).or_default();
        if partition.denied {
            return Err(StoreError::PermissionDenied(format!(
                "partition {}",
                self.partition
            )));
        }
        Ok(f(partition))
    }
}

impl PartitionHandle for MemoryHandle {
    fn partition_id(&self) -> PartitionId {
        self.partition
    }

    fn fetch(&self, local: &str) -> Result<Option<RawRecord>, StoreError> {
        let delay = *self.shared.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.shared.counters.fetches.fetch_add(1, Ordering::Relaxed);
        self.read(|p| p.records.get(local).cloned())
    }

    fn fetch_synthetic(&self, kind: SyntheticKind) -> Result<Option<RawRecord>, StoreError> {
        self.shared.counters.fetches.fetch_add(1, Ordering::Relaxed);
        self.read(|p| p.synthetic.get(&kind).cloned())
    }

    fn fetch_entry(&self, key: &CompositeKey) -> Result<Option<TabularEntry>, StoreError> {
        let Some(hint) = key.entry_hint() else {
            return Ok(None);
        };
        self.shared.counters.fetches.fetch_add(1, Ordering::Relaxed);
        self.read(|p| {
            p.entries
                .get(&(key.local().to_string(), hint.position.clone()))
                .cloned()
        })
    }

    fn select(&self, selection: &Selection) -> Result<Vec<String>, StoreError> {
        self.read(|p| {
            p.records
                .iter()
                .filter(|(_, record)| selection.matches(record))
                .map(|(local, _)| local.clone())
                .collect()
        })
    }

    fn create(&self, local: Option<&str>) -> Result<RawRecord, StoreError> {
        if let Some(local) = local
            && let Some(existing) = self.read(|p| p.records.get(local).cloned())?
        {
            return Ok(existing);
        }
        self.shared.counters.creates.fetch_add(1, Ordering::Relaxed);
        let local = match local {
            Some(local) => local.to_string(),
            None => self.write(|p| loop {
                p.next_id += 1;
                let candidate = to_local_id(&format!("{}:{}", self.partition, p.next_id));
                if !p.records.contains_key(&candidate) {
                    break candidate;
                }
            })?,
        };
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
        let mut saved = record.clone();
        saved.mark_saved();
        self.write(|p| p.records.insert(saved.local_id().to_string(), saved))?;
        self.shared.counters.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn delete(&self, record: &RawRecord) -> Result<(), StoreError> {
        self.write(|p| p.records.remove(record.local_id()))?;
        self.shared.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: PartitionId = PartitionId(0xAAAA_0000_0000_0000);

    fn open(backend: &MemoryBackend) -> Arc<dyn PartitionHandle> {
        backend.open(&PartitionLocator::Id(P)).expect("open")
    }

    #[test]
    fn create_returns_existing_record() {
        let backend = MemoryBackend::new();
        let local = "a".repeat(32);
        backend.insert(RawRecord::new(P, local.clone()).with_field("name", "Alice"));
        let handle = open(&backend);

        let record = handle.create(Some(&local)).expect("create");
        assert!(!record.is_new());
        assert_eq!(record.get("name").map(ToString::to_string).as_deref(), Some("Alice"));
        assert_eq!(backend.stats().creates, 0);
    }

    #[test]
    fn create_assigns_fresh_local_ids() {
        let backend = MemoryBackend::new();
        let handle = open(&backend);
        let a = handle.create(None).expect("create");
        handle.save(&a).expect("save");
        let b = handle.create(None).expect("create");
        assert_ne!(a.local_id(), b.local_id());
        assert!(b.is_new());
        assert_eq!(a.local_id().len(), 32);
    }

    #[test]
    fn named_partitions_resolve_on_open() {
        let backend = MemoryBackend::new();
        backend.name_partition("people", P);
        let handle = backend
            .open(&PartitionLocator::Named("people".into()))
            .expect("open");
        assert_eq!(handle.partition_id(), P);
        assert!(
            backend
                .open(&PartitionLocator::Named("nobody".into()))
                .is_err()
        );
    }

    #[test]
    fn denied_partition_refuses_fetches() {
        let backend = MemoryBackend::new();
        let handle = open(&backend);
        backend.deny(P);
        assert!(matches!(
            handle.fetch("x"),
            Err(StoreError::PermissionDenied(_))
        ));
    }

    #[test]
    fn denied_partition_refuses_writes() {
        let backend = MemoryBackend::new();
        let handle = open(&backend);
        let record = handle.create(None).expect("create");
        handle.save(&record).expect("save");
        backend.deny(P);
        assert!(matches!(handle.create(None), Err(StoreError::PermissionDenied(_))));
        assert!(matches!(handle.save(&record), Err(StoreError::PermissionDenied(_))));
        assert!(matches!(handle.delete(&record), Err(StoreError::PermissionDenied(_))));
        assert_eq!(backend.len(P), 1);
        assert_eq!(backend.stats().deletes, 0);
    }

    #[test]
    fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        let handle = open(&backend);
        let record = handle.create(None).expect("create");
        handle.save(&record).expect("save");
        handle.delete(&record).expect("delete");
        handle.delete(&record).expect("delete again");
        assert!(backend.is_empty(P));
    }
}
