//! End-to-end provisioning against temp directories and an in-memory store.

use std::path::Path;

use hftoken::models::{DEFAULT_SERVER_NAME, SERVERS_KEY, SERVER_COMMENT, TOKEN_ENV_VAR, TOKEN_PLACEHOLDER};
use hftoken::{
    migrate_config, ConfigRewriter, CredentialStore, MemoryStore, NameMatcher, Platform,
    ProvisionStage, Provisioner, RewriteOutcome,
};
use serde_json::{json, Value};

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn provisioner(store: &MemoryStore) -> Provisioner<'_> {
    Provisioner::new(store, ConfigRewriter::default()).with_platform(Platform::Linux)
}

#[test]
fn fresh_install_synthesizes_default_entry() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    let store = MemoryStore::with_secret("hf_secret_value");

    let report = provisioner(&store).provision(&config).unwrap();
    assert_eq!(report.outcome, RewriteOutcome::Synthesized(DEFAULT_SERVER_NAME.to_string()));
    assert!(report.script_path.exists());

    let doc = read_json(&config);
    let servers = doc[SERVERS_KEY].as_object().unwrap();
    assert_eq!(servers.len(), 1);
    let entry = &servers[DEFAULT_SERVER_NAME];
    assert_eq!(entry["command"], report.script_path.to_str().unwrap());
    assert_eq!(entry["args"], json!([]));
    assert_eq!(entry["env"][TOKEN_ENV_VAR], TOKEN_PLACEHOLDER);
    assert_eq!(entry["comment"], SERVER_COMMENT);
}

#[test]
fn secret_never_reaches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    std::fs::write(
        &config,
        r#"{"mcpServers":{"hf-models":{"command":"npx","args":["hf-mcp"]}}}"#,
    )
    .unwrap();
    let store = MemoryStore::with_secret("hf_super_secret_value");

    provisioner(&store).provision(&config).unwrap();

    for entry in std::fs::read_dir(dir.path()).unwrap() {
        let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        assert!(!content.contains("hf_super_secret_value"));
    }
}

#[test]
fn existing_entries_are_annotated_and_others_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    let original = json!({
        "mcpServers": {
            "web-search": {"command": "node", "args": ["search.js"], "env": {"API_KEY": "k"}},
            "My-HuggingFace-Server": {"command": "python", "args": ["-m", "hf_server"]},
            "filesystem": {"command": "npx", "args": ["-y", "@mcp/fs", "/home"]}
        },
        "theme": "dark"
    });
    std::fs::write(&config, serde_json::to_string_pretty(&original).unwrap()).unwrap();
    let store = MemoryStore::with_secret("hf_secret");

    let report = provisioner(&store).provision(&config).unwrap();
    assert_eq!(
        report.outcome,
        RewriteOutcome::Annotated(vec!["My-HuggingFace-Server".to_string()])
    );

    let doc = read_json(&config);
    assert_eq!(doc["theme"], "dark");
    assert_eq!(doc["mcpServers"]["web-search"], original["mcpServers"]["web-search"]);
    assert_eq!(doc["mcpServers"]["filesystem"], original["mcpServers"]["filesystem"]);
    let hf = &doc["mcpServers"]["My-HuggingFace-Server"];
    assert_eq!(hf["env"][TOKEN_ENV_VAR], TOKEN_PLACEHOLDER);
    assert_eq!(hf["comment"], SERVER_COMMENT);
    assert_eq!(hf["command"], "python");

    let names: Vec<_> = doc["mcpServers"].as_object().unwrap().keys().cloned().collect();
    assert_eq!(names, ["web-search", "My-HuggingFace-Server", "filesystem"]);
}

#[test]
fn repeated_runs_keep_a_single_entry() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    let store = MemoryStore::with_secret("hf_secret");

    provisioner(&store).provision(&config).unwrap();
    let second = provisioner(&store).provision(&config).unwrap();
    assert_eq!(
        second.outcome,
        RewriteOutcome::Annotated(vec![DEFAULT_SERVER_NAME.to_string()])
    );
    assert_eq!(read_json(&config)[SERVERS_KEY].as_object().unwrap().len(), 1);
}

#[test]
fn custom_matcher_controls_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    std::fs::write(&config, r#"{"mcpServers":{"half-life":{"command":"hl"}}}"#).unwrap();
    let store = MemoryStore::with_secret("hf_secret");

    let report = Provisioner::new(&store, ConfigRewriter::new(NameMatcher::new(["huggingface"])))
        .with_platform(Platform::MacOs)
        .provision(&config)
        .unwrap();
    assert_eq!(report.outcome, RewriteOutcome::Synthesized(DEFAULT_SERVER_NAME.to_string()));

    let doc = read_json(&config);
    assert!(doc["mcpServers"]["half-life"].get("env").is_none());
    assert!(doc["mcpServers"][DEFAULT_SERVER_NAME].is_object());
}

#[test]
fn deleted_token_blocks_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    let store = MemoryStore::with_secret("hf_secret");
    store.delete().unwrap();

    let err = provisioner(&store).provision(&config).unwrap_err();
    assert_eq!(err.stage, ProvisionStage::Start);
    assert!(!config.exists());
}

#[test]
fn migrated_token_feeds_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("claude_desktop_config.json");
    std::fs::write(
        &config,
        r#"{"mcpServers":{"hf":{"command":"npx","args":["hf-mcp"],"env":{"HF_TOKEN":"hf_real_abc_123"}}}}"#,
    )
    .unwrap();
    let store = MemoryStore::new();

    let migration = migrate_config(&config, &dir.path().join("backups"), &store).unwrap();
    assert_eq!(migration.servers, ["hf"]);
    assert_eq!(store.retrieve().unwrap().as_deref(), Some("hf_real_abc_123"));

    let report = provisioner(&store).provision(&config).unwrap();
    assert_eq!(report.outcome, RewriteOutcome::Annotated(vec!["hf".to_string()]));

    let doc = read_json(&config);
    assert_eq!(doc["mcpServers"]["hf"]["env"][TOKEN_ENV_VAR], TOKEN_PLACEHOLDER);
    assert_eq!(doc["mcpServers"]["hf"]["args"], json!(["hf-mcp"]));
    assert!(!std::fs::read_to_string(&config).unwrap().contains("hf_real_abc_123"));
}
