//! Integration tests for the CLI commands over a temporary redb database.

// Allow panic in tests - standard for test code
#![allow(clippy::panic)]

use clap::Parser;
use std::path::Path;
use strata::cli::{Cli, CliError, Report, parse_assignment, run};
use strata_core::{FieldValue, StoreError};
use tempfile::tempdir;

const CONFIG: &str = r#"
[[partitions]]
partition = "AAAA000000000000"

[[partitions.kinds]]
name = "person"
properties = [{ name = "name", ty = "text" }]

[[partitions]]
partition = "places"
"#;

fn strata(db: &Path, config: Option<&Path>, args: &[&str]) -> Result<Report, CliError> {
    let mut argv = vec!["strata".to_string(), "--database".to_string(), db.display().to_string()];
    if let Some(config) = config {
        argv.push("--config".to_string());
        argv.push(config.display().to_string());
    }
    argv.extend(args.iter().map(ToString::to_string));
    run(Cli::try_parse_from(argv).expect("parse arguments"))
}

// =============================================================================
// ARGUMENT PARSING
// =============================================================================

#[test]
fn test_parse_add_edge_arguments() {
    let cli = Cli::try_parse_from([
        "strata", "--json", "add-edge", "--label", "knows", "--out", "a", "--in", "b",
    ])
    .expect("parse");
    assert!(cli.json);
    match cli.command {
        strata::cli::Commands::AddEdge { label, out, inc } => {
            assert_eq!((label.as_str(), out.as_str(), inc.as_str()), ("knows", "a", "b"));
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_parse_assignment_types() {
    assert_eq!(
        parse_assignment("age=42").expect("int"),
        ("age".to_string(), FieldValue::Int(42))
    );
    assert_eq!(
        parse_assignment("admin=true").expect("bool"),
        ("admin".to_string(), FieldValue::Bool(true))
    );
    assert_eq!(
        parse_assignment("name=a=b").expect("text"),
        ("name".to_string(), FieldValue::from("a=b"))
    );
    assert!(parse_assignment("=x").is_err());
    assert!(parse_assignment("novalue").is_err());
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn test_commands_require_init() {
    let temp = tempdir().expect("temp dir");
    let db = temp.path().join("graph.redb");
    assert!(matches!(strata(&db, None, &["stats"]), Err(CliError::Io(_))));

    strata(&db, None, &["init"]).expect("init");
    assert!(matches!(
        strata(&db, None, &["init"]),
        Err(CliError::InvalidArgument(_))
    ));
    strata(&db, None, &["init", "--force"]).expect("forced init");
}

#[test]
fn test_vertex_edge_lifecycle() {
    let temp = tempdir().expect("temp dir");
    let db = temp.path().join("graph.redb");
    strata(&db, None, &["init"]).expect("init");

    let alice = strata(&db, None, &["add-vertex", "--id", "alice", "--set", "name=Alice"])
        .expect("add alice");
    assert_eq!(alice.json["kind"], "vertex");
    assert_eq!(alice.json["fields"]["name"], "Alice");
    strata(&db, None, &["add-vertex", "--id", "bob"]).expect("add bob");

    let edge = strata(
        &db,
        None,
        &["add-edge", "--label", "knows", "--out", "alice", "--in", "bob"],
    )
    .expect("add edge");
    assert_eq!(edge.json["label"], "knows");
    assert_eq!(edge.json["out"], alice.json["key"]);

    let fetched = strata(&db, None, &["get", "alice"]).expect("get");
    assert_eq!(fetched.json["key"], alice.json["key"]);

    let all = strata(&db, None, &["list", "all"]).expect("list");
    assert_eq!(all.json["count"], 3);
    let named = strata(&db, None, &["list", "--filter", "name=Alice"]).expect("filter");
    assert_eq!(named.json["count"], 1);

    strata(&db, None, &["remove", "alice"]).expect("remove");
    let edges = strata(&db, None, &["list", "edges"]).expect("list edges");
    assert_eq!(edges.json["count"], 0);
    assert!(matches!(
        strata(&db, None, &["get", "alice"]),
        Err(CliError::Store(StoreError::NotFound(_)))
    ));
}

#[test]
fn test_configured_partitions_and_stats() {
    let temp = tempdir().expect("temp dir");
    let db = temp.path().join("graph.redb");
    let config = temp.path().join("strata.toml");
    std::fs::write(&config, CONFIG).expect("write config");

    let init = strata(&db, Some(&config), &["init"]).expect("init");
    assert_eq!(init.json["partitions"].as_array().map(Vec::len), Some(2));

    let person = strata(&db, Some(&config), &["add-vertex", "--kind", "person"]).expect("person");
    assert!(
        person.json["key"]
            .as_str()
            .is_some_and(|k| k.starts_with("AAAA000000000000"))
    );
    let place =
        strata(&db, Some(&config), &["add-vertex", "--partition", "places"]).expect("place");
    assert!(
        place.json["key"]
            .as_str()
            .is_some_and(|k| !k.starts_with("AAAA000000000000"))
    );

    let stats = strata(&db, Some(&config), &["stats"]).expect("stats");
    let stores = stats.json["stores"].as_array().expect("stores");
    assert_eq!(stores.len(), 2);
    assert_eq!(stores[0]["vertices"], 1);
    assert_eq!(stores[1]["vertices"], 1);
    assert!(
        stores[0]["kinds"]
            .as_array()
            .is_some_and(|kinds| kinds.iter().any(|k| k == "person"))
    );

    assert!(matches!(
        strata(&db, Some(&config), &["add-vertex", "--partition", "nowhere"]),
        Err(CliError::InvalidArgument(_))
    ));
}

#[test]
fn test_descriptor_export_import() {
    let temp = tempdir().expect("temp dir");
    let db = temp.path().join("graph.redb");
    let config = temp.path().join("strata.toml");
    let descriptor = temp.path().join("people.stpd");
    std::fs::write(&config, CONFIG).expect("write config");
    strata(&db, Some(&config), &["init"]).expect("init");

    let exported = strata(
        &db,
        Some(&config),
        &["descriptor", "export", "--output", &descriptor.display().to_string()],
    )
    .expect("export");
    assert_eq!(exported.json["partition"], "AAAA000000000000");

    let imported = strata(
        &db,
        Some(&config),
        &["descriptor", "import", "--input", &descriptor.display().to_string()],
    )
    .expect("import");
    assert_eq!(imported.json["served"], true);
    assert!(
        imported.json["kinds"]
            .as_array()
            .is_some_and(|kinds| kinds.iter().any(|k| k == "person"))
    );

    // Without the configuration the person kind cannot be resolved.
    assert!(matches!(
        strata(
            &db,
            None,
            &["descriptor", "import", "--input", &descriptor.display().to_string()],
        ),
        Err(CliError::Store(StoreError::UnknownKind(_)))
    ));
}
