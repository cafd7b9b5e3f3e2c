//! # Strata CLI Module
//!
//! This module implements the CLI interface for Strata.
//!
//! ## Available Commands
//!
//! - `init` - Initialize a new database and resolve the configured partitions
//! - `add-vertex` - Add a vertex
//! - `add-edge` - Link two vertices
//! - `get` - Load one element
//! - `list` - Enumerate vertices, edges or both
//! - `remove` - Remove an element
//! - `stats` - Show partitions, kinds and cache counters
//! - `descriptor` - Export or import a partition descriptor

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use strata_core::StoreError;
use thiserror::Error;

pub use commands::*;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Strata - element store over partitioned record repositories
///
/// Maps graph vertices and edges onto the records of a redb database.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the graph configuration (TOML)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the graph database (overrides the configuration)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Which elements `list` enumerates.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListTarget {
    #[default]
    Vertices,
    Edges,
    All,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new database
    Init {
        /// Force initialization even if the database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Add a vertex
    AddVertex {
        /// Caller id; a fresh id is allocated when omitted
        #[arg(long)]
        id: Option<String>,

        /// Partition (id or configured name) to add the vertex to
        #[arg(short, long)]
        partition: Option<String>,

        /// Kind used to route the vertex to a store
        #[arg(short, long)]
        kind: Option<String>,

        /// Properties as name=value pairs
        #[arg(short = 's', long = "set", value_name = "NAME=VALUE")]
        properties: Vec<String>,
    },

    /// Link two vertices with a labeled edge
    AddEdge {
        #[arg(short, long)]
        label: String,

        /// Id of the out vertex
        #[arg(long)]
        out: String,

        /// Id of the in vertex
        #[arg(long = "in")]
        inc: String,
    },

    /// Load one element
    Get { id: String },

    /// Enumerate elements of every partition
    List {
        #[arg(value_enum, default_value_t)]
        target: ListTarget,

        /// Keep only elements whose field equals a value (NAME=VALUE)
        #[arg(short, long, value_name = "NAME=VALUE")]
        filter: Option<String>,
    },

    /// Remove an element; removing a vertex removes its edges
    Remove { id: String },

    /// Show partitions, kinds and cache counters
    Stats,

    /// Partition descriptor files
    Descriptor {
        #[command(subcommand)]
        action: DescriptorAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum DescriptorAction {
    /// Write a partition's descriptor to a file
    Export {
        #[arg(short, long)]
        output: PathBuf,

        /// Partition (id or configured name); the first store by default
        #[arg(short, long)]
        partition: Option<String>,
    },

    /// Validate a descriptor file and restore its kinds
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CliError> {
    let json = cli.json;
    let report = run(cli)?;
    report.print(json);
    Ok(())
}

/// Execute the CLI and return its report without printing.
pub fn run(cli: Cli) -> Result<Report, CliError> {
    let config = load_config(cli.config.as_deref())?;
    let db_path = config.database_path(cli.database.as_deref());

    match cli.command {
        Commands::Init { force } => cmd_init(&config, &db_path, force),
        Commands::AddVertex {
            id,
            partition,
            kind,
            properties,
        } => cmd_add_vertex(
            &Session::open(&config, &db_path)?,
            id,
            partition.as_deref(),
            kind.as_deref(),
            &properties,
        ),
        Commands::AddEdge { label, out, inc } => {
            cmd_add_edge(&Session::open(&config, &db_path)?, &label, &out, &inc)
        }
        Commands::Get { id } => cmd_get(&Session::open(&config, &db_path)?, &id),
        Commands::List { target, filter } => {
            cmd_list(&Session::open(&config, &db_path)?, target, filter.as_deref())
        }
        Commands::Remove { id } => cmd_remove(&Session::open(&config, &db_path)?, &id),
        Commands::Stats => cmd_stats(&Session::open(&config, &db_path)?),
        Commands::Descriptor { action } => {
            let session = Session::open(&config, &db_path)?;
            match action {
                DescriptorAction::Export { output, partition } => {
                    cmd_descriptor_export(&session, &output, partition.as_deref())
                }
                DescriptorAction::Import { input } => cmd_descriptor_import(&session, &input),
            }
        }
    }
}
