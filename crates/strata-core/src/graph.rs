//! # Graph
//!
//! A `Graph` owns one element store per partition and routes every request
//! to the store serving the key's partition. It is also the `GraphContext`
//! stores receive: cross-store lookups, edge removal and saves go back
//! through the graph.
//!
//! ## Routing
//!
//! 1. Composite keys route by partition (own or proxy partition of a store).
//! 2. Text ids route by the partition prefix they carry (`typed_id`).
//! 3. Otherwise a kind name routes to the first store registering that kind.
//! 4. Otherwise the first store serves the request.

use crate::backend::Selection;
use crate::element::{Edge, Element, ProxyVertex};
use crate::key::{CompositeKey, ElementKey, typed_id};
use crate::store::ElementStore;
use crate::types::{PartitionId, StoreError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// CONTEXT TRAITS
// =============================================================================

/// Receives every element touched by a mutation.
pub trait TransactionCoordinator: Send + Sync {
    fn notify(&self, element: &Element);
}

/// What a store may ask of the graph it belongs to.
pub trait GraphContext: Send + Sync {
    /// Resolve a key in whichever store serves it. `Ok(None)` when absent.
    fn element(&self, key: &CompositeKey) -> Result<Option<Element>, StoreError>;

    /// Remove an edge through the store owning it.
    fn remove_edge(&self, edge: &Edge, excluding: Option<&CompositeKey>) -> Result<(), StoreError>;

    /// Save an element through the store owning it.
    fn save(&self, element: &Element) -> Result<(), StoreError>;

    fn coordinator(&self) -> &dyn TransactionCoordinator;
}

// =============================================================================
// INTENT LOG
// =============================================================================

/// Coordinator that remembers touched elements until commit.
///
/// Intents are independent of cache residency: an evicted element stays in
/// the log and is still saved on commit.
#[derive(Debug, Default)]
pub struct IntentLog {
    pending: Mutex<Vec<Element>>,
}

impl IntentLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys of pending elements, in notification order.
    #[must_use]
    pub fn pending(&self) -> Vec<CompositeKey> {
        self.pending.lock().iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop every pending intent without saving.
    pub fn rollback(&self) {
        self.pending.lock().clear();
    }

    /// Save every pending element that still exists. Returns how many were saved.
    pub fn commit(&self, graph: &Graph) -> Result<usize, StoreError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut saved = 0;
        for element in &pending {
            if element.record().is_none() {
                continue;
            }
            if graph.element(element.key())?.is_none() {
                debug!(key = %element.key(), "skipping removed element");
                continue;
            }
            graph.save(element)?;
            saved += 1;
        }
        debug!(saved, pending = pending.len(), "intent log committed");
        Ok(saved)
    }
}

impl TransactionCoordinator for IntentLog {
    fn notify(&self, element: &Element) {
        let mut pending = self.pending.lock();
        if let Some(slot) = pending.iter_mut().find(|e| e.key() == element.key()) {
            *slot = element.clone();
        } else {
            pending.push(element.clone());
        }
    }
}

// =============================================================================
// GRAPH
// =============================================================================

pub struct Graph {
    stores: Vec<Arc<ElementStore>>,
    coordinator: Arc<dyn TransactionCoordinator>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Graph whose mutations are recorded in a fresh `IntentLog`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_coordinator(Arc::new(IntentLog::new()))
    }

    #[must_use]
    pub fn with_coordinator(coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self {
            stores: Vec::new(),
            coordinator,
        }
    }

    /// Add a store. The first store added is the default store.
    pub fn add_store(&mut self, store: ElementStore) -> Arc<ElementStore> {
        let store = Arc::new(store);
        self.stores.push(Arc::clone(&store));
        store
    }

    #[must_use]
    pub fn stores(&self) -> &[Arc<ElementStore>] {
        &self.stores
    }

    #[must_use]
    pub fn default_store(&self) -> Option<&Arc<ElementStore>> {
        self.stores.first()
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Store serving `partition` as own or proxy partition.
    pub fn store_for_partition(
        &self,
        partition: PartitionId,
    ) -> Result<Option<&Arc<ElementStore>>, StoreError> {
        for store in &self.stores {
            if store.serves(partition)? {
                return Ok(Some(store));
            }
        }
        Ok(None)
    }

    /// First store registering `kind`.
    #[must_use]
    pub fn store_for_kind(&self, kind: &str) -> Option<&Arc<ElementStore>> {
        self.stores.iter().find(|s| s.accepts_kind(kind))
    }

    /// Pick the store for a caller id, optionally hinted by a kind name.
    pub fn route(
        &self,
        id: Option<&ElementKey>,
        kind: Option<&str>,
    ) -> Result<&Arc<ElementStore>, StoreError> {
        let partition = match id {
            Some(ElementKey::Key(key)) => Some(key.partition()),
            Some(ElementKey::Text(text)) => typed_id(text),
            None => None,
        };
        if let Some(partition) = partition
            && let Some(store) = self.store_for_partition(partition)?
        {
            return Ok(store);
        }
        if let Some(ElementKey::Key(key)) = id {
            return Err(StoreError::InvalidKey(format!(
                "no store serves partition {}",
                key.partition()
            )));
        }
        if let Some(store) = kind.and_then(|k| self.store_for_kind(k)) {
            return Ok(store);
        }
        self.default_store()
            .ok_or_else(|| StoreError::IllegalState("graph has no element store".to_string()))
    }

    fn store_for_key(&self, key: &CompositeKey) -> Result<&Arc<ElementStore>, StoreError> {
        self.route(Some(&ElementKey::Key(key.clone())), None)
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Get-or-load through the routed store.
    pub fn get(&self, id: impl Into<ElementKey>) -> Result<Element, StoreError> {
        let id = id.into();
        self.route(Some(&id), None)?.get(self, id)
    }

    pub fn add_vertex(
        &self,
        id: Option<ElementKey>,
        kind: Option<&str>,
    ) -> Result<Element, StoreError> {
        self.route(id.as_ref(), kind)?.add_vertex(self, id)
    }

    pub fn add_vertex_temporary(
        &self,
        id: Option<ElementKey>,
        kind: Option<&str>,
    ) -> Result<Element, StoreError> {
        self.route(id.as_ref(), kind)?.add_vertex_temporary(self, id)
    }

    /// Create an edge `out -[label]-> inc` in the store of `out`.
    pub fn add_edge(&self, label: &str, out: &Element, inc: &Element) -> Result<Edge, StoreError> {
        let store = self.store_for_key(out.key())?;
        let edge = store.add_edge(self, None)?;
        store.connect(&edge, label, out, inc)?;
        self.save(out)?;
        if !inc.same_instance(out) {
            self.save(inc)?;
        }
        self.coordinator.notify(out);
        self.coordinator.notify(inc);
        self.coordinator.notify(&Element::Edge(edge.clone()));
        Ok(edge)
    }

    pub fn remove_vertex(&self, vertex: &Element) -> Result<(), StoreError> {
        self.store_for_key(vertex.key())?.remove_vertex(self, vertex)
    }

    /// Remove an element of either kind.
    pub fn remove(&self, element: &Element) -> Result<(), StoreError> {
        match element {
            Element::Edge(edge) => GraphContext::remove_edge(self, edge, None),
            other => self.remove_vertex(other),
        }
    }

    /// Proxy over the canonical record behind `original`.
    pub fn proxy_vertex(&self, original: &CompositeKey) -> Result<ProxyVertex, StoreError> {
        let store = self.store_for_key(original)?;
        let record = match store.get(self, original)? {
            Element::Proxy(proxy) => return Ok(proxy),
            other => other.record().ok_or_else(|| {
                StoreError::UnsupportedOperation(format!("{original} is a projection"))
            })?,
        };
        store.wrap_proxied_vertex(record)
    }

    /// All vertices across stores, optionally filtered.
    pub fn vertices(&self, filter: Option<&Selection>) -> Result<Vec<Element>, StoreError> {
        let mut result = Vec::new();
        for store in &self.stores {
            for element in &store.vertices(self, filter.cloned())? {
                result.push(element?);
            }
        }
        Ok(result)
    }

    /// All edges across stores, optionally filtered.
    pub fn edges(&self, filter: Option<&Selection>) -> Result<Vec<Element>, StoreError> {
        let mut result = Vec::new();
        for store in &self.stores {
            for element in &store.edges(self, filter.cloned())? {
                result.push(element?);
            }
        }
        Ok(result)
    }

    /// Discard every store's cache and secondary index.
    pub fn flush_caches(&self) {
        for store in &self.stores {
            store.flush_cache();
        }
    }
}

impl GraphContext for Graph {
    fn element(&self, key: &CompositeKey) -> Result<Option<Element>, StoreError> {
        match self.store_for_key(key)?.get(self, key) {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove_edge(&self, edge: &Edge, excluding: Option<&CompositeKey>) -> Result<(), StoreError> {
        self.store_for_key(edge.key())?
            .remove_edge(self, edge, excluding)
    }

    fn save(&self, element: &Element) -> Result<(), StoreError> {
        self.store_for_key(element.key())?.save(element)
    }

    fn coordinator(&self) -> &dyn TransactionCoordinator {
        self.coordinator.as_ref()
    }
}
