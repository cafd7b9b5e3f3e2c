//! # Element Store
//!
//! One `ElementStore` serves one partition of the backing repository. It
//! resolves caller ids to composite keys, materializes elements on cache
//! misses, keeps the cache and the secondary id index consistent across
//! mutations, and applies proxy indirection when a proxy partition is
//! configured.
//!
//! Every operation that may reach other stores takes a `GraphContext`; the
//! store holds no ambient session state.
//!
//! ## Key Resolution
//!
//! | Caller id                                | Resolved key                           |
//! |------------------------------------------|----------------------------------------|
//! | `CompositeKey` of a served partition     | itself                                 |
//! | text registered in the secondary index   | the indexed key                        |
//! | text parsing as a key of a served part.  | the parsed key                         |
//! | any other text                           | default partition + `to_local_id(..)`  |
//!
//! The default partition is the proxy partition of a proxied store and the
//! own partition otherwise.

use crate::backend::{BackingStore, PartitionHandle, PartitionLocator, Selection};
use crate::cache::{CacheConfig, CacheStats, LoadingCache};
use crate::element::{Edge, Element, ElementKind, ProxyVertex, Vertex};
use crate::formats::PartitionDescriptor;
use crate::graph::GraphContext;
use crate::key::{CompositeKey, ElementKey, KindHint, SyntheticKind, localize, to_local_id};
use crate::materializer::{Delegate, materialize};
use crate::primitives::{EDGE_TYPE_VALUE, TYPE_FIELD};
use crate::proxy::ProxyResolver;
use crate::registry::{KindCatalog, KindDescriptor, TypeRegistry};
use crate::types::{Direction, PartitionId, RawRecord, RecordClass, StoreError};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Stripes of the per-key lock taken while adding caller-identified elements.
const ADD_LOCK_STRIPES: usize = 64;

/// Per-store settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub cache: CacheConfig,
    /// Field of canonical records whose value keys their shadow records.
    /// Falls back to the canonical global id.
    pub proxy_key_field: Option<String>,
}

// =============================================================================
// ELEMENT STORE
// =============================================================================

pub struct ElementStore {
    backend: Arc<dyn BackingStore>,
    locator: PartitionLocator,
    proxy_locator: Option<PartitionLocator>,
    handle: OnceCell<Arc<dyn PartitionHandle>>,
    proxy_handle: OnceCell<Arc<dyn PartitionHandle>>,
    cache: LoadingCache<CompositeKey, Element>,
    key_index: RwLock<BTreeMap<String, CompositeKey>>,
    registry: RwLock<TypeRegistry>,
    resolver: RwLock<Option<Arc<dyn ProxyResolver>>>,
    /// Serializes check-create-insert for caller-supplied ids.
    add_locks: Box<[Mutex<()>]>,
    config: StoreConfig,
}

impl fmt::Debug for ElementStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementStore")
            .field("locator", &self.locator)
            .field("proxy_locator", &self.proxy_locator)
            .field("cache", &self.cache)
            .field("kinds", &self.registry.read().names())
            .finish_non_exhaustive()
    }
}

impl ElementStore {
    /// Store over `locator`. The partition is opened on first access.
    #[must_use]
    pub fn new(
        backend: Arc<dyn BackingStore>,
        locator: PartitionLocator,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            locator,
            proxy_locator: None,
            handle: OnceCell::new(),
            proxy_handle: OnceCell::new(),
            cache: LoadingCache::new(&config.cache),
            key_index: RwLock::new(BTreeMap::new()),
            registry: RwLock::new(TypeRegistry::with_builtins()),
            resolver: RwLock::new(None),
            add_locks: (0..ADD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            config,
        }
    }

    /// Builder: keep shadow records in a proxy partition.
    #[must_use]
    pub fn with_proxy(mut self, locator: PartitionLocator) -> Self {
        self.proxy_locator = Some(locator);
        self
    }

    /// Rebuild a store from a persisted descriptor.
    pub fn from_descriptor(
        backend: Arc<dyn BackingStore>,
        descriptor: &PartitionDescriptor,
        catalog: &dyn KindCatalog,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let registry = descriptor.restore(catalog)?;
        let store = Self::new(
            backend,
            PartitionLocator::Id(PartitionId(descriptor.partition)),
            config,
        );
        *store.registry.write() = registry;
        Ok(store)
    }

    /// Descriptor of this store: partition id plus registered kind names.
    pub fn descriptor(&self) -> Result<PartitionDescriptor, StoreError> {
        Ok(PartitionDescriptor::new(
            self.partition_id()?,
            self.registry.read().names(),
        ))
    }

    pub fn set_proxy_resolver(&self, resolver: Arc<dyn ProxyResolver>) {
        *self.resolver.write() = Some(resolver);
    }

    #[must_use]
    pub fn locator(&self) -> &PartitionLocator {
        &self.locator
    }

    #[must_use]
    pub fn proxy_locator(&self) -> Option<&PartitionLocator> {
        self.proxy_locator.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn is_proxied(&self) -> bool {
        self.proxy_locator.is_some()
    }

    // =========================================================================
    // HANDLES
    // =========================================================================

    fn handle(&self) -> Result<&Arc<dyn PartitionHandle>, StoreError> {
        self.handle.get_or_try_init(|| self.open(&self.locator))
    }

    fn proxy_handle(&self) -> Result<Option<&Arc<dyn PartitionHandle>>, StoreError> {
        match &self.proxy_locator {
            None => Ok(None),
            Some(locator) => self
                .proxy_handle
                .get_or_try_init(|| self.open(locator))
                .map(Some),
        }
    }

    fn open(&self, locator: &PartitionLocator) -> Result<Arc<dyn PartitionHandle>, StoreError> {
        let handle = self.backend.open(locator)?;
        if let Some(expected) = locator.known_id()
            && handle.partition_id() != expected
        {
            return Err(StoreError::backing(
                locator,
                "-",
                format!("adapter opened partition {}", handle.partition_id()),
            ));
        }
        debug!(locator = %locator, partition = %handle.partition_id(), "partition opened");
        Ok(handle)
    }

    /// Own partition id. Provisional locators are resolved on first call.
    pub fn partition_id(&self) -> Result<PartitionId, StoreError> {
        match self.locator.known_id() {
            Some(id) => Ok(id),
            None => Ok(self.handle()?.partition_id()),
        }
    }

    /// Proxy partition id, if the store is proxied.
    pub fn proxy_partition_id(&self) -> Result<Option<PartitionId>, StoreError> {
        match &self.proxy_locator {
            None => Ok(None),
            Some(locator) => match locator.known_id() {
                Some(id) => Ok(Some(id)),
                None => Ok(self.proxy_handle()?.map(|h| h.partition_id())),
            },
        }
    }

    /// Whether keys of `partition` are served by this store.
    pub fn serves(&self, partition: PartitionId) -> Result<bool, StoreError> {
        Ok(self.partition_id()? == partition || self.proxy_partition_id()? == Some(partition))
    }

    /// Partition new records are allocated in.
    fn default_partition(&self) -> Result<PartitionId, StoreError> {
        Ok(self.proxy_partition_id()?.unwrap_or(self.partition_id()?))
    }

    fn allocation_handle(&self) -> Result<&Arc<dyn PartitionHandle>, StoreError> {
        match self.proxy_handle()? {
            Some(handle) => Ok(handle),
            None => self.handle(),
        }
    }

    fn handle_for(&self, key: &CompositeKey) -> Result<&Arc<dyn PartitionHandle>, StoreError> {
        if self.proxy_partition_id()? == Some(key.partition())
            && let Some(handle) = self.proxy_handle()?
        {
            return Ok(handle);
        }
        if self.partition_id()? == key.partition() {
            return self.handle();
        }
        Err(StoreError::InvalidKey(format!(
            "{key} is not served by partition {}",
            self.locator
        )))
    }

    // =========================================================================
    // KEY RESOLUTION
    // =========================================================================

    /// Strip this store's partition prefix from a text id.
    pub fn localize<'a>(&self, text: &'a str) -> Result<&'a str, StoreError> {
        Ok(localize(text, self.partition_id()?))
    }

    /// Canonical key a caller id resolves to.
    pub fn resolve_key(&self, id: &ElementKey) -> Result<CompositeKey, StoreError> {
        match id {
            ElementKey::Key(key) => {
                if self.serves(key.partition())? {
                    Ok(key.clone())
                } else {
                    Err(StoreError::InvalidKey(format!(
                        "{key} is not served by partition {}",
                        self.locator
                    )))
                }
            }
            ElementKey::Text(text) => {
                if let Some(key) = self.key_index.read().get(text) {
                    return Ok(key.clone());
                }
                if let Some(key) = CompositeKey::parse(text)
                    && self.serves(key.partition())?
                {
                    return Ok(key);
                }
                let local = to_local_id(self.localize(text)?);
                Ok(CompositeKey::new(self.default_partition()?, local))
            }
        }
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    /// Get-or-load. Fails with `NotFound` when nothing exists under `id`.
    pub fn get(
        &self,
        ctx: &dyn GraphContext,
        id: impl Into<ElementKey>,
    ) -> Result<Element, StoreError> {
        let key = self.resolve_key(&id.into())?;
        self.cache.get_with(&key, || self.load(ctx, &key))
    }

    /// Cached element for `key`, without loading.
    #[must_use]
    pub fn get_if_cached(&self, key: &CompositeKey) -> Option<Element> {
        self.cache.get_if_present(key)
    }

    fn load(
        &self,
        ctx: &dyn GraphContext,
        key: &CompositeKey,
    ) -> Result<Option<Element>, StoreError> {
        let own = self.partition_id()?;
        if self.is_proxied() && key.partition() == own && key.hint().is_none() {
            debug!(key = %key, "loading canonical record of proxied store");
            return match self.handle()?.fetch(key.local())? {
                Some(record) => materialize(Delegate::Record(record), key, true),
                None => Ok(None),
            };
        }

        let via_proxy = self.is_proxied() && self.proxy_partition_id()? == Some(key.partition());
        let handle = self.handle_for(key)?;
        let Some(delegate) = Self::fetch_delegate(handle.as_ref(), key)? else {
            debug!(key = %key, "no backing record");
            return Ok(None);
        };

        match delegate {
            Delegate::Record(record)
                if via_proxy
                    && record.class() == RecordClass::Data
                    && record.discriminator().as_deref() != Some(EDGE_TYPE_VALUE) =>
            {
                self.setup_proxy(ctx, record, key)
                    .map(|proxy| Some(Element::Proxy(proxy)))
            }
            other => materialize(other, key, false),
        }
    }

    fn fetch_delegate(
        handle: &dyn PartitionHandle,
        key: &CompositeKey,
    ) -> Result<Option<Delegate>, StoreError> {
        match key.hint() {
            Some(KindHint::Synthetic(kind)) => {
                let record = match handle.fetch_synthetic(*kind)? {
                    None if *kind == SyntheticKind::Icon => {
                        handle.fetch_synthetic(SyntheticKind::Acl)?
                    }
                    other => other,
                };
                Ok(record.map(Delegate::Record))
            }
            Some(KindHint::Entry(_)) => Ok(handle.fetch_entry(key)?.map(Delegate::Entry)),
            None => Ok(handle.fetch(key.local())?.map(Delegate::Record)),
        }
    }

    // =========================================================================
    // PROXY INDIRECTION
    // =========================================================================

    /// Wrap a shadow record and link it to its canonical record.
    pub fn setup_proxy(
        &self,
        ctx: &dyn GraphContext,
        shadow: RawRecord,
        original_key: &CompositeKey,
    ) -> Result<ProxyVertex, StoreError> {
        let proxy = ProxyVertex::new(Vertex::new(shadow));
        if let Some(linked) = proxy.proxied_id() {
            if linked != *proxy.key() && ctx.element(&linked)?.is_some() {
                return Ok(proxy);
            }
            debug!(shadow = %proxy.key(), canonical = %linked, "stale proxy link");
            proxy.clear_proxied_id();
        }

        let resolver = self.resolver.read().clone().ok_or_else(|| {
            StoreError::UnresolvedProxy(format!(
                "no default resolution strategy for {original_key}"
            ))
        })?;
        match resolver.resolve_original(original_key)? {
            Some(canonical) => {
                proxy.link(&canonical.key());
                if proxy.shadow().read(RawRecord::is_new) {
                    return Ok(proxy);
                }
                let shadow = proxy.shadow().record();
                if let Err(e) = self.handle_for(proxy.key()).and_then(|h| h.save(&shadow)) {
                    warn!(shadow = %proxy.key(), error = %e, "failed to persist proxy link");
                }
            }
            None => debug!(key = %original_key, "proxy left unresolved"),
        }
        Ok(proxy)
    }

    /// Proxy over a canonical record, creating its shadow if needed.
    pub fn wrap_proxied_vertex(&self, original: RawRecord) -> Result<ProxyVertex, StoreError> {
        let handle = self.proxy_handle()?.ok_or_else(|| {
            StoreError::IllegalState(format!("store {} has no proxy partition", self.locator))
        })?;
        let key_value = self
            .config
            .proxy_key_field
            .as_deref()
            .and_then(|field| original.get(field))
            .map_or_else(|| original.global_id(), ToString::to_string);

        let mut shadow = handle.create(Some(&to_local_id(&key_value)))?;
        let mut dirty = shadow.is_new();
        if shadow.discriminator().is_none() {
            shadow.set(TYPE_FIELD, ElementKind::Vertex.tag());
            dirty = true;
        }
        let canonical = original.key();
        let proxy = ProxyVertex::with_canonical(Vertex::new(shadow), Vertex::new(original));
        let linked = match proxy.proxied_id() {
            Some(existing) => existing != *proxy.key() && self.link_resolves(&existing)?,
            None => false,
        };
        if !linked {
            proxy.link(&canonical);
            dirty = true;
        }
        if dirty {
            handle.save(&proxy.shadow().record())?;
            proxy.shadow().update(RawRecord::mark_saved);
        }
        Ok(proxy)
    }

    /// Whether a persisted proxy link still points at a canonical record.
    /// Links into partitions this store does not own are taken as valid.
    fn link_resolves(&self, linked: &CompositeKey) -> Result<bool, StoreError> {
        if linked.partition() != self.partition_id()? {
            return Ok(true);
        }
        Ok(self.handle()?.fetch(linked.local())?.is_some())
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    pub fn add_vertex(
        &self,
        ctx: &dyn GraphContext,
        id: Option<ElementKey>,
    ) -> Result<Element, StoreError> {
        self.add(ctx, id, ElementKind::Vertex, false)
    }

    /// Allocate a vertex that is never cached, indexed, saved or notified.
    pub fn add_vertex_temporary(
        &self,
        ctx: &dyn GraphContext,
        id: Option<ElementKey>,
    ) -> Result<Element, StoreError> {
        self.add(ctx, id, ElementKind::Vertex, true)
    }

    pub fn add_edge(
        &self,
        ctx: &dyn GraphContext,
        id: Option<ElementKey>,
    ) -> Result<Edge, StoreError> {
        match self.add(ctx, id, ElementKind::Edge, false)? {
            Element::Edge(edge) => Ok(edge),
            other => Err(StoreError::IllegalState(format!(
                "allocated {} for edge request",
                other.kind_name()
            ))),
        }
    }

    fn add(
        &self,
        ctx: &dyn GraphContext,
        id: Option<ElementKey>,
        kind: ElementKind,
        temporary: bool,
    ) -> Result<Element, StoreError> {
        let Some(id) = id else {
            return self.allocate(ctx, None, kind, temporary);
        };
        let key = self.resolve_key(&id)?;
        let _guard = self.add_lock(&key).lock();
        match self.get(ctx, ElementKey::Key(key)) {
            Ok(existing) if existing.is_kind(kind) => return Ok(existing),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.allocate(ctx, Some(id), kind, temporary)
    }

    fn add_lock(&self, key: &CompositeKey) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.add_locks[(hasher.finish() % ADD_LOCK_STRIPES as u64) as usize]
    }

    fn allocate(
        &self,
        ctx: &dyn GraphContext,
        id: Option<ElementKey>,
        kind: ElementKind,
        temporary: bool,
    ) -> Result<Element, StoreError> {
        let local = id.as_ref().map(|id| self.allocation_local(id)).transpose()?;
        let handle = self.allocation_handle()?;
        let mut record = handle.create(local.as_deref())?;
        match record.discriminator() {
            None => {
                record.set(TYPE_FIELD, kind.tag());
            }
            Some(tag) if tag == kind.tag() => {}
            Some(tag) => {
                return Err(StoreError::TypeConflict {
                    key: record.global_id(),
                    requested: kind.tag().to_string(),
                    found: tag,
                });
            }
        }
        if !temporary {
            handle.save(&record)?;
            record.mark_saved();
        }

        let key = record.key();
        let element = match kind {
            ElementKind::Edge => Element::Edge(Edge::new(record)),
            ElementKind::Vertex if self.is_proxied() => {
                let original = match &id {
                    Some(ElementKey::Key(k)) => k.clone(),
                    _ => key.clone(),
                };
                Element::Proxy(self.setup_proxy(ctx, record, &original)?)
            }
            ElementKind::Vertex => Element::Vertex(Vertex::new(record)),
        };

        let element = if temporary {
            element
        } else {
            let element = self.cache.insert_if_absent(key.clone(), element);
            if let Some(id) = id {
                self.key_index.write().insert(id.to_string(), key);
            }
            ctx.coordinator().notify(&element);
            element
        };
        debug!(key = %element.key(), kind = element.kind_name(), temporary, "element added");
        Ok(element)
    }

    fn allocation_local(&self, id: &ElementKey) -> Result<String, StoreError> {
        match id {
            ElementKey::Key(key) if key.hint().is_some() => Err(StoreError::InvalidKey(format!(
                "{key} addresses a projection and cannot be allocated"
            ))),
            ElementKey::Key(key) => Ok(key.local().to_string()),
            ElementKey::Text(text) => match CompositeKey::parse(text) {
                Some(key) if key.hint().is_none() && self.serves(key.partition())? => {
                    Ok(key.local().to_string())
                }
                _ => Ok(to_local_id(self.localize(text)?)),
            },
        }
    }

    /// Remove a vertex, detaching its edges first.
    pub fn remove_vertex(
        &self,
        ctx: &dyn GraphContext,
        vertex: &Element,
    ) -> Result<(), StoreError> {
        let Some(target) = vertex.as_vertex() else {
            return Err(StoreError::UnsupportedOperation(format!(
                "{} {} cannot be removed",
                vertex.kind_name(),
                vertex.key()
            )));
        };
        ctx.coordinator().notify(vertex);

        for (index, edge_id) in target.edge_ids(Direction::Both).iter().enumerate() {
            let outcome = CompositeKey::parse(edge_id)
                .ok_or_else(|| StoreError::InvalidKey(edge_id.clone()))
                .and_then(|key| ctx.element(&key))
                .and_then(|found| match found {
                    Some(Element::Edge(edge)) => ctx.remove_edge(&edge, Some(target.key())),
                    Some(other) => Err(StoreError::IllegalState(format!(
                        "adjacency entry {edge_id} is a {}",
                        other.kind_name()
                    ))),
                    None => Ok(()),
                });
            if let Err(e) = outcome {
                warn!(
                    vertex_kind = vertex.kind_name(),
                    vertex = %vertex.key(),
                    direction = "both",
                    index,
                    error = %e,
                    "failed to detach edge, continuing"
                );
            }
        }

        self.forget(vertex.key());
        self.handle_for(target.key())?.delete(&target.record())
    }

    /// Remove an edge and detach it from its endpoints.
    pub fn remove_edge(
        &self,
        ctx: &dyn GraphContext,
        edge: &Edge,
        excluding: Option<&CompositeKey>,
    ) -> Result<(), StoreError> {
        let Some(record) = edge.record() else {
            return Err(StoreError::UnsupportedOperation(format!(
                "view entry edge {} cannot be removed",
                edge.key()
            )));
        };
        let element = Element::Edge(edge.clone());
        ctx.coordinator().notify(&element);

        let edge_id = edge.key().to_string();
        for direction in [Direction::In, Direction::Out] {
            let Some(endpoint) = edge.endpoint(direction) else {
                continue;
            };
            if excluding == Some(&endpoint) {
                continue;
            }
            let detached = ctx.element(&endpoint).and_then(|found| {
                let Some(found) = found else {
                    return Ok(());
                };
                if found.as_vertex().is_some_and(|v| v.detach_edge(&edge_id)) {
                    ctx.save(&found)
                } else {
                    Ok(())
                }
            });
            if let Err(e) = detached {
                warn!(
                    edge = %edge.key(),
                    endpoint = %endpoint,
                    direction = ?direction,
                    error = %e,
                    "failed to detach edge from endpoint, continuing"
                );
            }
        }

        self.forget(edge.key());
        self.handle_for(edge.key())?.delete(&record)
    }

    /// Write an element's record back to its partition.
    pub fn save(&self, element: &Element) -> Result<(), StoreError> {
        let Some(record) = element.record() else {
            return Err(StoreError::UnsupportedOperation(format!(
                "{} {} is a projection",
                element.kind_name(),
                element.key()
            )));
        };
        self.handle_for(element.key())?.save(&record)?;
        match element {
            Element::Edge(edge) => {
                edge.update(RawRecord::mark_saved)?;
            }
            other => {
                if let Some(vertex) = other.as_vertex() {
                    vertex.update(RawRecord::mark_saved);
                }
            }
        }
        Ok(())
    }

    /// Link `edge` to its endpoints and record it in both adjacency lists.
    pub(crate) fn connect(
        &self,
        edge: &Edge,
        label: &str,
        out: &Element,
        inc: &Element,
    ) -> Result<(), StoreError> {
        let (Some(out_vertex), Some(in_vertex)) = (out.as_vertex(), inc.as_vertex()) else {
            return Err(StoreError::UnsupportedOperation(
                "edges can only link record-backed vertices".to_string(),
            ));
        };
        edge.connect(out.key(), inc.key(), label)?;
        let edge_id = edge.key().to_string();
        out_vertex.attach_edge(Direction::Out, &edge_id);
        in_vertex.attach_edge(Direction::In, &edge_id);
        self.save(&Element::Edge(edge.clone()))
    }

    // =========================================================================
    // CACHE
    // =========================================================================

    /// Drop an element from the cache and the secondary index only.
    pub fn uncache(&self, element: &Element) {
        self.forget(element.key());
    }

    /// Discard the whole cache and secondary index.
    pub fn flush_cache(&self) {
        self.cache.flush();
        self.key_index.write().clear();
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    fn forget(&self, key: &CompositeKey) {
        self.cache.invalidate(key);
        self.key_index.write().retain(|_, indexed| indexed != key);
    }

    // =========================================================================
    // ENUMERATION
    // =========================================================================

    pub fn vertices<'a>(
        &'a self,
        ctx: &'a dyn GraphContext,
        filter: Option<Selection>,
    ) -> Result<ElementSeq<'a>, StoreError> {
        self.select(ctx, filter.unwrap_or_else(Selection::vertices), Some(ElementKind::Vertex))
    }

    pub fn edges<'a>(
        &'a self,
        ctx: &'a dyn GraphContext,
        filter: Option<Selection>,
    ) -> Result<ElementSeq<'a>, StoreError> {
        self.select(ctx, filter.unwrap_or_else(Selection::edges), Some(ElementKind::Edge))
    }

    pub fn elements<'a>(
        &'a self,
        ctx: &'a dyn GraphContext,
        filter: Option<Selection>,
    ) -> Result<ElementSeq<'a>, StoreError> {
        self.select(ctx, filter.unwrap_or_else(Selection::elements), None)
    }

    fn select<'a>(
        &'a self,
        ctx: &'a dyn GraphContext,
        selection: Selection,
        kind: Option<ElementKind>,
    ) -> Result<ElementSeq<'a>, StoreError> {
        let partition = self.partition_id()?;
        let keys: Arc<[CompositeKey]> = self
            .handle()?
            .select(&selection)?
            .into_iter()
            .map(|local| CompositeKey::new(partition, local))
            .collect();
        Ok(ElementSeq {
            store: self,
            ctx,
            keys,
            kind,
        })
    }

    // =========================================================================
    // KINDS
    // =========================================================================

    /// Register a kind. Returns `false` if the name was already taken.
    pub fn add_kind(&self, kind: KindDescriptor) -> bool {
        self.registry.write().add(Arc::new(kind))
    }

    /// Unregister a kind and its nested kinds.
    pub fn remove_kind(&self, name: &str) -> bool {
        self.registry.write().remove(name)
    }

    #[must_use]
    pub fn accepts_kind(&self, name: &str) -> bool {
        self.registry.read().contains(name)
    }

    #[must_use]
    pub fn kind(&self, name: &str) -> Option<Arc<KindDescriptor>> {
        self.registry.read().get(name)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<Arc<KindDescriptor>> {
        self.registry.read().list()
    }
}

// =============================================================================
// ENUMERATION SEQUENCE
// =============================================================================

/// Restartable sequence of elements selected from one store.
///
/// Elements are resolved through the cache while iterating; ids that no
/// longer resolve are skipped.
pub struct ElementSeq<'a> {
    store: &'a ElementStore,
    ctx: &'a dyn GraphContext,
    keys: Arc<[CompositeKey]>,
    kind: Option<ElementKind>,
}

impl<'a> ElementSeq<'a> {
    /// Number of selected ids. Iteration may yield fewer elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[CompositeKey] {
        &self.keys
    }

    /// Start a fresh pass over the sequence.
    #[must_use]
    pub fn iter(&self) -> ElementIter<'a> {
        ElementIter {
            store: self.store,
            ctx: self.ctx,
            keys: Arc::clone(&self.keys),
            kind: self.kind,
            index: 0,
        }
    }
}

impl<'a> IntoIterator for &ElementSeq<'a> {
    type Item = Result<Element, StoreError>;
    type IntoIter = ElementIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ElementIter<'a> {
    store: &'a ElementStore,
    ctx: &'a dyn GraphContext,
    keys: Arc<[CompositeKey]>,
    kind: Option<ElementKind>,
    index: usize,
}

impl Iterator for ElementIter<'_> {
    type Item = Result<Element, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(key) = self.keys.get(self.index) {
            self.index += 1;
            match self.store.get(self.ctx, key) {
                Ok(element) if self.kind.is_none_or(|k| element.is_kind(k)) => {
                    return Some(Ok(element));
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => debug!(key = %key, "selected element vanished"),
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::graph::Graph;

    const P: PartitionId = PartitionId(0xAAAA_0000_0000_0000);
    const PROXY: PartitionId = PartitionId(0xBBBB_0000_0000_0000);

    fn graph() -> (Graph, MemoryBackend) {
        let backend = MemoryBackend::new();
        let mut graph = Graph::new();
        graph.add_store(ElementStore::new(
            Arc::new(backend.clone()),
            PartitionLocator::Id(P),
            StoreConfig::default(),
        ));
        (graph, backend)
    }

    #[test]
    fn flat_ids_resolve_into_own_partition() {
        let (graph, _) = graph();
        let store = graph.default_store().expect("store");
        let key = store.resolve_key(&"alice".into()).expect("key");
        assert_eq!(key.partition(), P);
        assert_eq!(key.local(), to_local_id("alice"));

        let prefixed = format!("{P}alice");
        assert_eq!(store.resolve_key(&prefixed.into()).expect("key"), key);
    }

    #[test]
    fn foreign_keys_are_rejected() {
        let (graph, _) = graph();
        let store = graph.default_store().expect("store");
        let foreign = CompositeKey::new(PROXY, "1".repeat(32));
        assert!(matches!(
            store.resolve_key(&foreign.into()),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn add_indexes_caller_id() {
        let (graph, backend) = graph();
        let store = graph.default_store().expect("store");
        let vertex = store.add_vertex(&graph, Some("alice".into())).expect("add");
        assert_eq!(
            store.resolve_key(&"alice".into()).expect("key"),
            *vertex.key()
        );
        assert!(backend.record(vertex.key()).is_some());

        store.uncache(&vertex);
        assert!(store.get_if_cached(vertex.key()).is_none());
    }

    #[test]
    fn temporary_vertices_are_not_kept() {
        let (graph, backend) = graph();
        let store = graph.default_store().expect("store");
        let vertex = store.add_vertex_temporary(&graph, None).expect("add");
        assert!(store.get_if_cached(vertex.key()).is_none());
        assert!(backend.record(vertex.key()).is_none());
    }

    #[test]
    fn entry_edges_cannot_be_removed() {
        let (graph, _) = graph();
        let store = graph.default_store().expect("store");
        let entry = crate::types::TabularEntry {
            partition: P,
            view_local: "b".repeat(32),
            position: "1".into(),
            category_value: None,
            document_local: None,
            columns: BTreeMap::new(),
        };
        let edge = Edge::from_entry(CompositeKey::new(P, "b".repeat(32)), entry);
        assert!(matches!(
            store.remove_edge(&graph, &edge, None),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn icon_falls_back_to_acl() {
        let (graph, backend) = graph();
        backend.insert_synthetic(
            SyntheticKind::Acl,
            RawRecord::new(P, "acl").with_class(RecordClass::Acl),
        );
        let store = graph.default_store().expect("store");
        let icon = store
            .get(&graph, CompositeKey::synthetic(P, SyntheticKind::Icon))
            .expect("icon");
        assert!(matches!(icon, Element::Vertex(_)));
    }

    #[test]
    fn proxied_store_without_resolver_fails_to_add() {
        let backend = MemoryBackend::new();
        let mut graph = Graph::new();
        graph.add_store(
            ElementStore::new(
                Arc::new(backend),
                PartitionLocator::Id(P),
                StoreConfig::default(),
            )
            .with_proxy(PartitionLocator::Id(PROXY)),
        );
        let store = graph.default_store().expect("store");
        assert!(matches!(
            store.add_vertex(&graph, None),
            Err(StoreError::UnresolvedProxy(_))
        ));
    }
}
