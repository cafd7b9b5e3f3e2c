//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands. Every
//! command returns a [`Report`]; printing is left to the caller.

use super::{CliError, ListTarget};
use crate::config::GraphConfig;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::primitives::MAX_DESCRIPTOR_SIZE;
use strata_core::{
    BackingStore, Element, ElementKey, ElementKind, ElementStore, FieldValue, Graph,
    GraphContext, PartitionId, RedbBackend, Selection, StoreConfig, descriptor_from_bytes,
    descriptor_to_bytes,
};
use tracing::{debug, info};

// =============================================================================
// FILE VALIDATION
// =============================================================================

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CliError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CliError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CliError::InvalidArgument(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CliError> {
    let canonical = path.canonicalize().map_err(|e| {
        CliError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CliError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, CliError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CliError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CliError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CliError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// SESSION
// =============================================================================

/// An opened database plus the graph configured over it.
pub struct Session {
    pub config: GraphConfig,
    pub backend: Arc<dyn BackingStore>,
    pub graph: Graph,
}

impl Session {
    /// Open an existing database.
    pub fn open(config: &GraphConfig, db_path: &Path) -> Result<Self, CliError> {
        if !db_path.exists() {
            return Err(CliError::Io(format!(
                "Database {} does not exist. Run `strata init` first.",
                db_path.display()
            )));
        }
        Self::create(config, db_path)
    }

    fn create(config: &GraphConfig, db_path: &Path) -> Result<Self, CliError> {
        let backend: Arc<dyn BackingStore> = Arc::new(RedbBackend::open(db_path)?);
        let graph = config.build_graph(&backend)?;
        debug!(database = %db_path.display(), stores = graph.stores().len(), "session opened");
        Ok(Self {
            config: config.clone(),
            backend,
            graph,
        })
    }

    /// Store whose locator or partition id matches `partition`.
    fn store(&self, partition: &str) -> Result<&Arc<ElementStore>, CliError> {
        let wanted = PartitionId::parse_prefix(partition);
        for store in self.graph.stores() {
            if store.locator().to_string() == partition {
                return Ok(store);
            }
            if let Some(id) = wanted
                && store.serves(id)?
            {
                return Ok(store);
            }
        }
        Err(CliError::InvalidArgument(format!(
            "no configured partition '{partition}'"
        )))
    }
}

/// Load the configuration file, or the default configuration.
pub fn load_config(path: Option<&Path>) -> Result<GraphConfig, CliError> {
    match path {
        Some(path) => GraphConfig::load(&validate_file_path(path)?),
        None => Ok(GraphConfig::default()),
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Outcome of a command, in both output formats.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub json: Value,
    pub text: String,
}

impl Report {
    fn new(json: Value, text: impl Into<String>) -> Self {
        Self {
            json,
            text: text.into(),
        }
    }

    pub fn print(&self, json_mode: bool) {
        if json_mode {
            println!(
                "{}",
                serde_json::to_string_pretty(&self.json).unwrap_or_default()
            );
        } else {
            println!("{}", self.text);
        }
    }
}

fn field_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(text) => json!(text),
        FieldValue::Int(n) => json!(n),
        FieldValue::Bool(b) => json!(b),
        FieldValue::TextList(items) => json!(items),
    }
}

/// JSON view of an element: key, variant and its fields.
pub fn element_json(element: &Element) -> Value {
    let mut view = json!({
        "key": element.key().to_string(),
        "kind": element.kind_name(),
    });
    match element {
        Element::Edge(edge) => {
            view["label"] = json!(edge.label());
            view["out"] = json!(edge.endpoint(strata_core::Direction::Out).map(|k| k.to_string()));
            view["in"] = json!(edge.endpoint(strata_core::Direction::In).map(|k| k.to_string()));
            view["projection"] = json!(edge.is_projection());
        }
        Element::Proxy(proxy) => {
            view["proxied_id"] = json!(proxy.proxied_id().map(|k| k.to_string()));
        }
        Element::Category(category) => {
            view["view"] = json!(category.view().to_string());
            view["fields"] = category
                .values()
                .iter()
                .map(|(name, value)| (name.clone(), field_json(value)))
                .collect();
        }
        Element::Vertex(_) => {}
    }
    if let Some(record) = element.record() {
        view["fields"] = record
            .fields()
            .map(|(name, value)| (name.to_string(), field_json(value)))
            .collect();
    }
    view
}

fn element_line(element: &Element) -> String {
    match element {
        Element::Edge(edge) => format!(
            "{} edge {} -[{}]-> {}",
            element.key(),
            edge.endpoint(strata_core::Direction::Out)
                .map_or_else(|| "?".to_string(), |k| k.to_string()),
            edge.label().unwrap_or_default(),
            edge.endpoint(strata_core::Direction::In)
                .map_or_else(|| "?".to_string(), |k| k.to_string()),
        ),
        Element::Proxy(proxy) => format!(
            "{} proxy -> {}",
            element.key(),
            proxy
                .proxied_id()
                .map_or_else(|| "(unresolved)".to_string(), |k| k.to_string())
        ),
        other => format!("{} {}", other.key(), other.kind_name()),
    }
}

fn element_report(element: &Element) -> Report {
    let mut text = element_line(element);
    if let Some(record) = element.record() {
        for (name, value) in record.fields() {
            if !name.starts_with('$') {
                text.push_str(&format!("\n  {} = {}", name, value));
            }
        }
    }
    Report::new(element_json(element), text)
}

/// Parse `name=value`. Integers and booleans keep their type.
pub fn parse_assignment(text: &str) -> Result<(String, FieldValue), CliError> {
    let (name, value) = text
        .split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| CliError::InvalidArgument(format!("expected NAME=VALUE, got '{text}'")))?;
    let value = if let Ok(n) = value.parse::<i64>() {
        FieldValue::Int(n)
    } else if let Ok(b) = value.parse::<bool>() {
        FieldValue::Bool(b)
    } else {
        FieldValue::from(value)
    };
    Ok((name.to_string(), value))
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create the database and resolve every configured partition.
pub fn cmd_init(config: &GraphConfig, db_path: &Path, force: bool) -> Result<Report, CliError> {
    if db_path.exists() {
        if !force {
            return Err(CliError::InvalidArgument(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| CliError::Io(format!("Remove database: {}", e)))?;
    }

    let session = Session::create(config, db_path)?;
    let mut partitions = Vec::new();
    let mut text = format!("Initialized new database at {}", db_path.display());
    for store in session.graph.stores() {
        let id = store.partition_id()?;
        let proxy = store.proxy_partition_id()?;
        text.push_str(&format!("\n  {} -> {}", store.locator(), id));
        if let Some(proxy) = proxy {
            text.push_str(&format!(" (proxy {})", proxy));
        }
        partitions.push(json!({
            "partition": store.locator().to_string(),
            "id": id.to_string(),
            "proxy": proxy.map(|p| p.to_string()),
        }));
    }
    info!(database = %db_path.display(), partitions = partitions.len(), "database initialized");

    Ok(Report::new(
        json!({ "database": db_path.to_string_lossy(), "partitions": partitions }),
        text,
    ))
}

// =============================================================================
// MUTATION COMMANDS
// =============================================================================

/// Add (or find) a vertex and apply property assignments.
pub fn cmd_add_vertex(
    session: &Session,
    id: Option<String>,
    partition: Option<&str>,
    kind: Option<&str>,
    properties: &[String],
) -> Result<Report, CliError> {
    let assignments = properties
        .iter()
        .map(|p| parse_assignment(p))
        .collect::<Result<Vec<_>, _>>()?;
    let id = id.map(ElementKey::from);

    let element = match partition {
        Some(partition) => session.store(partition)?.add_vertex(&session.graph, id)?,
        None => session.graph.add_vertex(id, kind)?,
    };

    if !assignments.is_empty() {
        let vertex = element.as_vertex().ok_or_else(|| {
            CliError::InvalidArgument(format!("{} has no settable properties", element.key()))
        })?;
        for (name, value) in assignments {
            vertex.set_property(&name, value)?;
        }
        session.graph.save(&element)?;
    }
    info!(key = %element.key(), "vertex added");
    Ok(element_report(&element))
}

pub fn cmd_add_edge(
    session: &Session,
    label: &str,
    out: &str,
    inc: &str,
) -> Result<Report, CliError> {
    let out = session.graph.get(out)?;
    let inc = session.graph.get(inc)?;
    let edge = session.graph.add_edge(label, &out, &inc)?;
    info!(key = %edge.key(), label, "edge added");
    Ok(element_report(&Element::Edge(edge)))
}

/// Remove an element; vertices take their edges with them.
pub fn cmd_remove(session: &Session, id: &str) -> Result<Report, CliError> {
    let element = session.graph.get(id)?;
    session.graph.remove(&element)?;
    info!(key = %element.key(), kind = element.kind_name(), "element removed");
    Ok(Report::new(
        json!({ "removed": element.key().to_string(), "kind": element.kind_name() }),
        format!("Removed {} {}", element.kind_name(), element.key()),
    ))
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

pub fn cmd_get(session: &Session, id: &str) -> Result<Report, CliError> {
    let element = session.graph.get(id)?;
    Ok(element_report(&element))
}

/// Enumerate elements across every store.
pub fn cmd_list(
    session: &Session,
    target: ListTarget,
    filter: Option<&str>,
) -> Result<Report, CliError> {
    let filter = filter.map(parse_assignment).transpose()?;
    let selection = |kind: ElementKind| {
        filter
            .as_ref()
            .map(|(name, value)| Selection::field_equals(Some(kind), name.as_str(), value.clone()))
    };

    let mut elements = Vec::new();
    if matches!(target, ListTarget::Vertices | ListTarget::All) {
        elements.extend(session.graph.vertices(selection(ElementKind::Vertex).as_ref())?);
    }
    if matches!(target, ListTarget::Edges | ListTarget::All) {
        elements.extend(session.graph.edges(selection(ElementKind::Edge).as_ref())?);
    }

    let lines: Vec<String> = elements.iter().map(element_line).collect();
    let text = if lines.is_empty() {
        "No elements".to_string()
    } else {
        lines.join("\n")
    };
    Ok(Report::new(
        json!({
            "count": elements.len(),
            "elements": elements.iter().map(element_json).collect::<Vec<_>>(),
        }),
        text,
    ))
}

/// Partitions, kinds, element counts and cache counters of every store.
pub fn cmd_stats(session: &Session) -> Result<Report, CliError> {
    let graph = &session.graph;
    let mut stores = Vec::new();
    let mut text = String::from("Strata Graph Status\n===================");

    for store in graph.stores() {
        let id = store.partition_id()?;
        let vertices = store.vertices(graph, None)?.len();
        let edges = store.edges(graph, None)?.len();
        let kinds: Vec<String> = store.kinds().iter().map(|k| k.name().to_string()).collect();
        let cache = store.cache_stats();

        text.push_str(&format!(
            "\n{} ({})\n  Vertices: {}\n  Edges:    {}\n  Kinds:    {}\n  Cache:    {} entries, {} hits, {} misses",
            store.locator(),
            id,
            vertices,
            edges,
            kinds.join(", "),
            cache.entries,
            cache.hits,
            cache.misses,
        ));
        stores.push(json!({
            "partition": store.locator().to_string(),
            "id": id.to_string(),
            "proxy": store.proxy_partition_id()?.map(|p| p.to_string()),
            "vertices": vertices,
            "edges": edges,
            "kinds": kinds,
            "cache": cache,
        }));
    }

    Ok(Report::new(json!({ "stores": stores }), text))
}

// =============================================================================
// DESCRIPTOR COMMANDS
// =============================================================================

pub fn cmd_descriptor_export(
    session: &Session,
    output: &Path,
    partition: Option<&str>,
) -> Result<Report, CliError> {
    let validated_output = validate_output_path(output)?;
    let store = match partition {
        Some(partition) => session.store(partition)?,
        None => session
            .graph
            .default_store()
            .ok_or_else(|| CliError::Config("no partitions configured".to_string()))?,
    };

    let descriptor = store.descriptor()?;
    let data = descriptor_to_bytes(&descriptor)?;
    std::fs::write(&validated_output, &data)
        .map_err(|e| CliError::Io(format!("Write file: {}", e)))?;

    Ok(Report::new(
        json!({
            "partition": descriptor.partition_id().to_string(),
            "kinds": descriptor.kinds,
            "bytes": data.len(),
            "output": validated_output.to_string_lossy(),
        }),
        format!(
            "Exported {} bytes to {}",
            data.len(),
            validated_output.display()
        ),
    ))
}

/// Validate a descriptor and resolve its kinds through the configured catalog.
pub fn cmd_descriptor_import(session: &Session, input: &Path) -> Result<Report, CliError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_DESCRIPTOR_SIZE as u64)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| CliError::Io(format!("Read file: {}", e)))?;
    let descriptor = descriptor_from_bytes(&data)?;
    let restored = ElementStore::from_descriptor(
        Arc::clone(&session.backend),
        &descriptor,
        &session.config.catalog(),
        StoreConfig::default(),
    )?;

    let partition = descriptor.partition_id();
    let served = session.graph.store_for_partition(partition)?.is_some();
    let kinds: Vec<String> = restored.kinds().iter().map(|k| k.name().to_string()).collect();

    Ok(Report::new(
        json!({
            "partition": partition.to_string(),
            "kinds": kinds,
            "served": served,
        }),
        format!(
            "Descriptor of partition {} ({} kinds: {}){}",
            partition,
            kinds.len(),
            kinds.join(", "),
            if served { "" } else { " - not served by this configuration" }
        ),
    ))
}
