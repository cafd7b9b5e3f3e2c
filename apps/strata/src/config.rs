//! # Graph Configuration
//!
//! TOML description of a graph: the redb database it lives in and the
//! partitions it serves.
//!
//! ```toml
//! database = "strata.redb"
//!
//! [[partitions]]
//! partition = "people"
//! proxy = "people-shadows"
//! proxy_key_field = "email"
//!
//! [partitions.cache]
//! max_entries = 10000
//!
//! [[partitions.kinds]]
//! name = "person"
//! element = "vertex"
//! properties = [{ name = "name", field = "name", ty = "text" }]
//! ```

use crate::cli::CliError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{
    BackingStore, BuiltinCatalog, CacheConfig, ElementKind, ElementStore, FieldType, Graph,
    KindDescriptor, MirrorResolver, PartitionLocator, StoreConfig,
};

/// Partition used when the configuration names none.
pub const DEFAULT_PARTITION: &str = "default";

/// Database path used when neither the CLI nor the file names one.
pub const DEFAULT_DATABASE: &str = "strata.redb";

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// CONFIGURATION TYPES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub database: Option<PathBuf>,
    pub partitions: Vec<PartitionConfig>,
}

/// One element store of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// A 16 character partition id, or a provisional name.
    pub partition: String,
    /// Proxy partition holding shadow records, id or name.
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub proxy_key_field: Option<String>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub kinds: Vec<KindConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindConfig {
    pub name: String,
    #[serde(default = "default_element")]
    pub element: ElementKind,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    /// Backing field; defaults to the property name.
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default = "default_field_type")]
    pub ty: FieldType,
}

fn default_element() -> ElementKind {
    ElementKind::Vertex
}

fn default_field_type() -> FieldType {
    FieldType::Text
}

// =============================================================================
// LOADING
// =============================================================================

impl GraphConfig {
    /// Read a configuration file.
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            CliError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CliError::Config(format!(
                "Config size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("Read config: {}", e)))?;
        Self::parse(&text)
    }

    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, CliError> {
        toml::from_str(text).map_err(|e| CliError::Config(e.to_string()))
    }

    /// Configured partitions, or the single default partition.
    #[must_use]
    pub fn effective_partitions(&self) -> Vec<PartitionConfig> {
        if self.partitions.is_empty() {
            vec![PartitionConfig::named(DEFAULT_PARTITION)]
        } else {
            self.partitions.clone()
        }
    }

    /// Database path: CLI override, then file setting, then the default.
    #[must_use]
    pub fn database_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    /// Build a graph with one element store per configured partition.
    ///
    /// Proxied stores resolve shadows by mirroring the local id into their
    /// own partition.
    pub fn build_graph(&self, backend: &Arc<dyn BackingStore>) -> Result<Graph, CliError> {
        let mut graph = Graph::new();
        for partition in self.effective_partitions() {
            let store = graph.add_store(partition.build_store(backend)?);
            if store.is_proxied() {
                store.set_proxy_resolver(Arc::new(MirrorResolver::new(
                    Arc::clone(backend),
                    store.locator().clone(),
                )));
            }
        }
        Ok(graph)
    }

    /// Catalog of every configured kind, used to restore descriptors.
    #[must_use]
    pub fn catalog(&self) -> BuiltinCatalog {
        let mut catalog = BuiltinCatalog::new();
        for partition in &self.partitions {
            for kind in &partition.kinds {
                catalog.register(kind.descriptor());
            }
        }
        catalog
    }
}

impl PartitionConfig {
    #[must_use]
    pub fn named(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            proxy: None,
            proxy_key_field: None,
            cache: CacheConfig::default(),
            kinds: Vec::new(),
        }
    }

    #[must_use]
    pub fn locator(&self) -> PartitionLocator {
        PartitionLocator::parse(&self.partition)
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            cache: self.cache.clone(),
            proxy_key_field: self.proxy_key_field.clone(),
        }
    }

    fn build_store(&self, backend: &Arc<dyn BackingStore>) -> Result<ElementStore, CliError> {
        if self.cache.max_entries == 0 {
            return Err(CliError::Config(format!(
                "partition '{}': cache.max_entries must be positive",
                self.partition
            )));
        }
        let mut store = ElementStore::new(Arc::clone(backend), self.locator(), self.store_config());
        if let Some(proxy) = &self.proxy {
            store = store.with_proxy(PartitionLocator::parse(proxy));
        }
        for kind in &self.kinds {
            if !store.add_kind(kind.descriptor()) {
                return Err(CliError::Config(format!(
                    "partition '{}': kind '{}' declared twice",
                    self.partition, kind.name
                )));
            }
        }
        Ok(store)
    }
}

impl KindConfig {
    #[must_use]
    pub fn descriptor(&self) -> KindDescriptor {
        self.properties
            .iter()
            .fold(KindDescriptor::new(&self.name, self.element), |kind, p| {
                kind.with_property(&p.name, p.field.as_deref().unwrap_or(&p.name), p.ty)
            })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database = "graph.redb"

[[partitions]]
partition = "AAAA000000000000"

[[partitions]]
partition = "people"
proxy = "people-shadows"
proxy_key_field = "email"

[partitions.cache]
max_entries = 100

[[partitions.kinds]]
name = "person"
properties = [{ name = "name", ty = "text" }, { name = "age", field = "years", ty = "int" }]
"#;

    #[test]
    fn parses_partitions_and_kinds() {
        let config = GraphConfig::parse(SAMPLE).expect("parse");
        assert_eq!(config.database, Some(PathBuf::from("graph.redb")));
        assert_eq!(config.partitions.len(), 2);

        let first = &config.partitions[0];
        assert!(matches!(first.locator(), PartitionLocator::Id(_)));
        assert_eq!(first.cache, CacheConfig::default());

        let people = &config.partitions[1];
        assert_eq!(people.locator(), PartitionLocator::Named("people".into()));
        assert_eq!(people.cache.max_entries, 100);
        let person = people.kinds[0].descriptor();
        assert_eq!(person.element_kind(), ElementKind::Vertex);
        assert_eq!(person.properties()[1].field, "years");
    }

    #[test]
    fn empty_config_has_default_partition() {
        let config = GraphConfig::parse("").expect("parse");
        let partitions = config.effective_partitions();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].partition, DEFAULT_PARTITION);
        assert_eq!(config.database_path(None), PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(
            config.database_path(Some(Path::new("other.redb"))),
            PathBuf::from("other.redb")
        );
    }

    #[test]
    fn rejects_unknown_field_types() {
        let text = r#"
[[partitions]]
partition = "p"
kinds = [{ name = "k", properties = [{ name = "x", ty = "float" }] }]
"#;
        assert!(matches!(GraphConfig::parse(text), Err(CliError::Config(_))));
    }

    #[test]
    fn rejects_zero_capacity_cache() {
        let text = r#"
[[partitions]]
partition = "p"
cache = { max_entries = 0 }
"#;
        let config = GraphConfig::parse(text).expect("parse");
        let backend: Arc<dyn BackingStore> = Arc::new(strata_core::MemoryBackend::new());
        assert!(matches!(config.build_graph(&backend), Err(CliError::Config(_))));
    }
}
