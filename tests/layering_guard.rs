//! Layering guardrails keeping the protocol crate free of process plumbing.
//!
//! `jasmine_protocol` holds the wire types, the tree parser and the
//! synchronizer. It must not depend on `jasmine-bridge`, and nothing in it may
//! spawn or talk to processes; producers plug in through `EventSource`.

const PROTOCOL_MANIFEST: &str = include_str!("../crates/jasmine_protocol/Cargo.toml");

const PROTOCOL_SOURCES: &[(&str, &str)] = &[
    ("lib.rs", include_str!("../crates/jasmine_protocol/src/lib.rs")),
    ("sync.rs", include_str!("../crates/jasmine_protocol/src/sync.rs")),
    ("tree.rs", include_str!("../crates/jasmine_protocol/src/tree.rs")),
    ("wire.rs", include_str!("../crates/jasmine_protocol/src/wire.rs")),
];

/// Names of the crates listed in a `[dependencies]` table.
fn main_dependencies(manifest: &str) -> Vec<String> {
    let mut in_dependencies = false;
    let mut names = Vec::new();

    for raw_line in manifest.lines() {
        let line = raw_line.trim();
        if line.starts_with('[') {
            in_dependencies = line == "[dependencies]";
            continue;
        }
        if !in_dependencies || line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line_no_comment = line.split('#').next().unwrap_or("").trim();
        if let Some((name, _)) = line_no_comment.split_once('=') {
            names.push(name.trim().to_string());
        }
    }
    names
}

#[test]
fn protocol_does_not_depend_on_bridge() {
    let dependencies = main_dependencies(PROTOCOL_MANIFEST);
    assert!(dependencies.iter().any(|name| name == "serde_json"), "scan found {dependencies:?}");
    for name in &dependencies {
        assert!(
            !name.starts_with("jasmine-bridge") && !name.starts_with("jasmine_bridge"),
            "`{name}` must not appear in jasmine_protocol's [dependencies]"
        );
    }
}

#[test]
fn protocol_does_not_touch_processes() {
    for (file, source) in PROTOCOL_SOURCES {
        for forbidden in ["std::process", "Command::new", "jasmine_bridge"] {
            assert!(!source.contains(forbidden), "{file} mentions `{forbidden}`");
        }
    }
}

#[test]
fn manifest_scan_stops_at_next_table() {
    let manifest = "[dependencies]\nserde = \"1\" # wire\n\n[dev-dependencies]\njasmine-bridge = { path = \"..\" }\n";
    assert_eq!(main_dependencies(manifest), ["serde"]);
}
