//! # Proxy Resolution
//!
//! A proxied store keeps *shadow* records in its proxy partition. Each shadow
//! stands in for a canonical record elsewhere; the store links the two by
//! persisting the canonical id on the shadow (`PROXIED_ID_FIELD`).
//!
//! Finding the canonical record for a shadow that has no link yet is
//! application policy. The store asks a `ProxyResolver` and fails with
//! `UnresolvedProxy` when none is installed.

use crate::backend::{BackingStore, PartitionHandle, PartitionLocator};
use crate::key::CompositeKey;
use crate::types::{RawRecord, StoreError};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// Resolves the canonical record a shadow stands in for.
pub trait ProxyResolver: Send + Sync {
    /// Canonical record for the element requested under `original_key`.
    ///
    /// `Ok(None)` leaves the shadow unlinked; it will be retried on next load.
    fn resolve_original(&self, original_key: &CompositeKey)
    -> Result<Option<RawRecord>, StoreError>;
}

impl<F> ProxyResolver for F
where
    F: Fn(&CompositeKey) -> Result<Option<RawRecord>, StoreError> + Send + Sync,
{
    fn resolve_original(
        &self,
        original_key: &CompositeKey,
    ) -> Result<Option<RawRecord>, StoreError> {
        self(original_key)
    }
}

/// Resolves a shadow to the record with the same local id in a canonical
/// partition.
pub struct MirrorResolver {
    backend: Arc<dyn BackingStore>,
    canonical: PartitionLocator,
    handle: OnceCell<Arc<dyn PartitionHandle>>,
}

impl fmt::Debug for MirrorResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorResolver")
            .field("canonical", &self.canonical)
            .field("opened", &self.handle.get().is_some())
            .finish()
    }
}

impl MirrorResolver {
    #[must_use]
    pub fn new(backend: Arc<dyn BackingStore>, canonical: PartitionLocator) -> Self {
        Self {
            backend,
            canonical,
            handle: OnceCell::new(),
        }
    }
}

impl ProxyResolver for MirrorResolver {
    fn resolve_original(
        &self,
        original_key: &CompositeKey,
    ) -> Result<Option<RawRecord>, StoreError> {
        let handle = self
            .handle
            .get_or_try_init(|| self.backend.open(&self.canonical))?;
        handle.fetch(original_key.local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::types::PartitionId;

    const CANONICAL: PartitionId = PartitionId(0xAAAA_0000_0000_0000);
    const SHADOWS: PartitionId = PartitionId(0xBBBB_0000_0000_0000);

    #[test]
    fn mirror_resolves_same_local_id() {
        let backend = MemoryBackend::new();
        let local = "1".repeat(32);
        backend.insert(RawRecord::new(CANONICAL, local.clone()));
        let resolver = MirrorResolver::new(Arc::new(backend), PartitionLocator::Id(CANONICAL));

        let found = resolver
            .resolve_original(&CompositeKey::new(SHADOWS, local))
            .expect("resolve")
            .expect("record");
        assert_eq!(found.partition(), CANONICAL);
        assert!(
            resolver
                .resolve_original(&CompositeKey::new(SHADOWS, "2".repeat(32)))
                .expect("resolve")
                .is_none()
        );
    }

    #[test]
    fn closures_are_resolvers() {
        let resolver = |_: &CompositeKey| -> Result<Option<RawRecord>, StoreError> {
            Ok(Some(RawRecord::new(CANONICAL, "x")))
        };
        let found = resolver
            .resolve_original(&CompositeKey::new(SHADOWS, "y"))
            .expect("resolve");
        assert!(found.is_some());
    }
}
