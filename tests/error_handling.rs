// tests/error_handling.rs

use std::io::Write;

use tempfile::NamedTempFile;

use flowdag::config::load_and_validate;
use flowdag::errors::FlowdagError;

fn write_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

const NODES: &str = r#"
flows = ["main"]

[[tasks]]
name = "A"
import = "app.tasks"
"#;

const FLOWS: &str = r#"
[[flow-definitions]]
name = "main"

[[flow-definitions.edges]]
from = []
to = "A"
"#;

#[test]
fn loads_documents_from_disk() {
    let nodes = write_file(NODES);
    let flows = write_file(FLOWS);

    let config = load_and_validate(nodes.path(), &[flows.path()]).unwrap();
    assert_eq!(config.flow_definitions().len(), 1);
    assert_eq!(config.nodes().tasks[0].name, "A");
}

#[test]
fn missing_file_is_io_error() {
    let flows = write_file(FLOWS);
    let missing = flows.path().with_extension("missing");

    let result = load_and_validate(missing.as_path(), &[flows.path()]);
    match result {
        Err(e @ FlowdagError::IoError(_)) => assert!(e.is_configuration_error()),
        Err(e) => panic!("Expected IoError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_key_is_toml_error() {
    let nodes = write_file(
        r#"
flows = ["main"]

[[tasks]]
name = "A"
import = "app.tasks"
retries = 3
"#,
    );
    let flows = write_file(FLOWS);

    match load_and_validate(nodes.path(), &[flows.path()]) {
        Err(FlowdagError::TomlError(e)) => assert!(e.to_string().contains("retries")),
        Err(e) => panic!("Expected TomlError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn invalid_node_name_returns_config_error() {
    let nodes = write_file(
        r#"
flows = ["main"]

[[tasks]]
name = "1st"
import = "app.tasks"
"#,
    );
    let flows = write_file(FLOWS);

    match load_and_validate(nodes.path(), &[flows.path()]) {
        Err(FlowdagError::ConfigError(msg)) => {
            assert!(msg.contains("invalid task name '1st'"), "{msg}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn shared_namespace_collision_returns_config_error() {
    let nodes = write_file(
        r#"
flows = ["main", "A"]

[[tasks]]
name = "A"
import = "app.tasks"
"#,
    );
    let flows = write_file(FLOWS);

    match load_and_validate(nodes.path(), &[flows.path()]) {
        Err(FlowdagError::ConfigError(msg)) => {
            assert!(msg.contains("used by both a task and a flow"), "{msg}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn declared_flow_without_definition() {
    let nodes = write_file(
        r#"
flows = ["main", "extra"]

[[tasks]]
name = "A"
import = "app.tasks"
"#,
    );
    let flows = write_file(FLOWS);

    match load_and_validate(nodes.path(), &[flows.path()]) {
        Err(FlowdagError::ConfigError(msg)) => {
            assert!(msg.contains("'extra' is declared but has no definition"), "{msg}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn flow_defined_twice_across_documents() {
    let nodes = write_file(NODES);
    let first = write_file(FLOWS);
    let second = write_file(FLOWS);

    match load_and_validate(nodes.path(), &[first.path(), second.path()]) {
        Err(FlowdagError::ConfigError(msg)) => {
            assert!(msg.contains("defined multiple times"), "{msg}");
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}
