#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for the Hakkero client.
//!
//! These tests verify that `Cargo.toml` keeps the agreed-upon lints,
//! features and example wiring. If any test fails, the manifest has drifted
//! from project policy.
//!
//! All checks are synchronous filesystem reads.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    text.parse::<toml::Table>()
        .unwrap_or_else(|e| panic!("Cargo.toml is not valid TOML: {e}"))
}

fn table<'a>(parent: &'a toml::Table, key: &str) -> &'a toml::Table {
    parent
        .get(key)
        .and_then(toml::Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing the [{key}] table"))
}

#[test]
fn panicking_lints_are_denied() {
    let manifest = manifest();
    let clippy = table(table(&manifest, "lints"), "clippy");
    for lint in [
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ] {
        assert_eq!(
            clippy.get(lint).and_then(toml::Value::as_str),
            Some("deny"),
            "clippy::{lint} must be denied"
        );
    }
}

#[test]
fn websocket_transport_is_a_default_feature() {
    let manifest = manifest();
    let features = table(&manifest, "features");
    let default = features["default"].as_array().unwrap();
    assert!(default
        .iter()
        .any(|f| f.as_str() == Some("transport-websocket")));

    let deps = table(&manifest, "dependencies");
    for optional in ["tokio-tungstenite", "futures-util"] {
        let dep = deps[optional].as_table().unwrap();
        assert_eq!(
            dep.get("optional").and_then(toml::Value::as_bool),
            Some(true),
            "{optional} must stay optional"
        );
    }
}

#[test]
fn demos_exist_and_are_registered() {
    let manifest = manifest();
    let examples = manifest["example"].as_array().unwrap();
    assert!(!examples.is_empty());
    for example in examples {
        let path = example["path"].as_str().unwrap();
        assert!(path.starts_with("demos/"), "{path} must live under demos/");
        assert!(
            project_root().join(path).is_file(),
            "{path} is registered but missing"
        );
    }
}

#[test]
fn fuzz_crate_depends_on_this_crate() {
    let path = project_root().join("fuzz/Cargo.toml");
    let fuzz: toml::Table = std::fs::read_to_string(path).unwrap().parse().unwrap();
    let deps = table(&fuzz, "dependencies");
    let this = deps["hakkero-client"].as_table().unwrap();
    assert_eq!(this["path"].as_str(), Some(".."));
}
