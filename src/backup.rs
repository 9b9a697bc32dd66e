//! Config backup, token sanitizing, migration and restore.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::credential::{CredentialError, CredentialStore};
use crate::models::{SERVERS_KEY, TOKEN_PLACEHOLDER};
use crate::rewriter::{atomic_write, load_existing, persist, ConfigError, ConfigLock};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to create backup directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Servers hold different hardcoded tokens: {}", .0.join(", "))]
    ConflictingTokens(Vec<String>),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A hardcoded token found in a server entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundToken {
    pub server: String,
    pub token: String,
}

/// What [`migrate_config`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Servers a token was taken from.
    pub servers: Vec<String>,
    /// `None` when there was nothing to migrate.
    pub backup_path: Option<PathBuf>,
    /// Whether the config file was rewritten.
    pub cleaned: bool,
}

/// Copy `config_path` to `<backup_dir>/<file name>.<UTC timestamp>.bak`.
pub fn backup_config(config_path: &Path, backup_dir: &Path) -> Result<PathBuf, BackupError> {
    let data = read_existing(config_path)?;

    std::fs::create_dir_all(backup_dir).map_err(|source| BackupError::CreateDir {
        path: backup_dir.to_path_buf(),
        source,
    })?;

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ");
    let file_name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config.json".to_string());
    let backup_path = backup_dir.join(format!("{}.{}.bak", file_name, timestamp));

    atomic_write(&backup_path, &data).map_err(|source| BackupError::Write {
        path: backup_path.clone(),
        source,
    })?;
    log::info!("Created backup of {} at {}", config_path.display(), backup_path.display());
    Ok(backup_path)
}

/// Overwrite `config_path` with the contents of `backup_path`.
pub fn restore_config(backup_path: &Path, config_path: &Path) -> Result<(), BackupError> {
    let data = read_existing(backup_path)?;
    let _lock = ConfigLock::acquire(config_path)?;
    atomic_write(config_path, &data).map_err(|source| BackupError::Write {
        path: config_path.to_path_buf(),
        source,
    })?;
    log::info!("Restored {} from backup {}", config_path.display(), backup_path.display());
    Ok(())
}

fn read_existing(path: &Path) -> Result<Vec<u8>, BackupError> {
    std::fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            BackupError::NotFound(path.to_path_buf())
        } else {
            BackupError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

fn token_arg_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^--hf[_-]?token[=\s]|^--hugging[_-]?face[_-]?token[=\s]|^-t[=\s]|hf_[a-z0-9]{20,}")
            .expect("valid regex")
    })
}

fn token_flag_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:--hf[_-]?token|--hugging[_-]?face[_-]?token|-t)[=\s]+(\S+)")
            .expect("valid regex")
    })
}

fn bare_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)hf_[a-z0-9]{20,}").expect("valid regex"))
}

fn token_env_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)hf[_-]token|hugging[_-]?face[_-]?token").expect("valid regex")
    })
}

/// Strip hardcoded tokens from server `args` and `env`.
///
/// Env bindings already set to the placeholder are kept. Returns whether
/// anything was removed.
pub fn sanitize_document(doc: &mut Value) -> bool {
    let Some(servers) = doc.get_mut(SERVERS_KEY).and_then(Value::as_object_mut) else {
        return false;
    };

    let mut modified = false;
    for (name, server) in servers.iter_mut() {
        if let Some(args) = server.get_mut("args").and_then(Value::as_array_mut) {
            let before = args.len();
            args.retain(|arg| !arg.as_str().is_some_and(|a| token_arg_re().is_match(a)));
            if args.len() != before {
                log::warn!("Removed {} token argument(s) from server `{}`", before - args.len(), name);
                modified = true;
            }
        }

        if let Some(env) = server.get_mut("env").and_then(Value::as_object_mut) {
            let before = env.len();
            env.retain(|key, value| {
                !token_env_key_re().is_match(key) || value.as_str() == Some(TOKEN_PLACEHOLDER)
            });
            if env.len() != before {
                log::warn!("Removed {} token variable(s) from server `{}`", before - env.len(), name);
                modified = true;
            }
        }
    }
    modified
}

fn token_in_arg(arg: &str) -> Option<&str> {
    let token = match token_flag_value_re().captures(arg) {
        Some(caps) => caps.get(1)?.as_str(),
        None => bare_token_re().find(arg)?.as_str(),
    };
    (token != TOKEN_PLACEHOLDER).then_some(token)
}

/// Hardcoded tokens in server `args` and `env`, in document order.
///
/// Everything reported here is removed by [`sanitize_document`].
pub fn extract_tokens(doc: &Value) -> Vec<FoundToken> {
    let Some(servers) = doc.get(SERVERS_KEY).and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for (name, server) in servers {
        let mut push = |token: &str| {
            found.push(FoundToken {
                server: name.clone(),
                token: token.to_string(),
            })
        };
        if let Some(args) = server.get("args").and_then(Value::as_array) {
            args.iter()
                .filter_map(Value::as_str)
                .filter_map(token_in_arg)
                .for_each(&mut push);
        }
        if let Some(env) = server.get("env").and_then(Value::as_object) {
            env.iter()
                .filter(|(key, _)| token_env_key_re().is_match(key))
                .filter_map(|(_, value)| value.as_str())
                .map(str::trim)
                .filter(|value| !value.is_empty() && *value != TOKEN_PLACEHOLDER)
                .for_each(&mut push);
        }
    }
    found
}

/// Move a hardcoded token from the config into `store`.
///
/// Backs the file up, stores the token, then strips every hardcoded token
/// from the config. Nothing is written when no token is found. Servers
/// holding different tokens are an error; only one token can be stored.
pub fn migrate_config(
    config_path: &Path,
    backup_dir: &Path,
    store: &dyn CredentialStore,
) -> Result<MigrationReport, BackupError> {
    let _lock = ConfigLock::acquire(config_path)?;
    let mut doc = load_existing(config_path)?
        .ok_or_else(|| BackupError::NotFound(config_path.to_path_buf()))?;

    let found = extract_tokens(&doc);
    let mut servers: Vec<String> = found.iter().map(|f| f.server.clone()).collect();
    servers.dedup();
    let Some(first) = found.first() else {
        log::info!("No hardcoded tokens found in {}", config_path.display());
        return Ok(MigrationReport {
            servers,
            backup_path: None,
            cleaned: false,
        });
    };
    if found.iter().any(|f| f.token != first.token) {
        return Err(BackupError::ConflictingTokens(servers));
    }

    let backup_path = backup_config(config_path, backup_dir)?;
    store.store(&first.token)?;
    log::info!(
        "Moved token from {} server(s) in {} to secure storage",
        servers.len(),
        config_path.display()
    );

    let cleaned = sanitize_document(&mut doc);
    if cleaned {
        persist(config_path, &doc)?;
    }
    Ok(MigrationReport {
        servers,
        backup_path: Some(backup_path),
        cleaned,
    })
}

/// Sanitize the config file in place. The file is only rewritten if a token
/// was found.
pub fn sanitize_config(config_path: &Path) -> Result<bool, BackupError> {
    let _lock = ConfigLock::acquire(config_path)?;
    let mut doc = match load_existing(config_path)? {
        Some(doc) => doc,
        None => return Err(BackupError::NotFound(config_path.to_path_buf())),
    };
    if !sanitize_document(&mut doc) {
        return Ok(false);
    }
    persist(config_path, &doc)?;
    log::info!("Updated {} to remove hardcoded tokens", config_path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::MemoryStore;
    use serde_json::json;

    #[test]
    fn sanitize_strips_tokens_but_keeps_placeholder() {
        let mut doc = json!({
            "mcpServers": {
                "hf": {
                    "command": "npx",
                    "args": ["serve", "--hf-token=abc", "hf_ABCDEFGHIJKLMNOPQRSTUVWX", "--port=1"],
                    "env": {"HF_TOKEN": "hf_realtoken", "HUGGINGFACE_TOKEN": "x", "OTHER": "1"}
                },
                "wrapped": {"command": "w", "env": {"HF_TOKEN": TOKEN_PLACEHOLDER}},
                "search": {"command": "s", "args": ["--query"]}
            }
        });

        assert!(sanitize_document(&mut doc));
        assert_eq!(doc["mcpServers"]["hf"]["args"], json!(["serve", "--port=1"]));
        assert_eq!(doc["mcpServers"]["hf"]["env"], json!({"OTHER": "1"}));
        assert_eq!(doc["mcpServers"]["wrapped"]["env"]["HF_TOKEN"], TOKEN_PLACEHOLDER);
        assert_eq!(doc["mcpServers"]["search"]["args"], json!(["--query"]));
    }

    #[test]
    fn sanitize_clean_document_is_noop() {
        let mut doc = json!({"mcpServers": {"a": {"command": "x", "args": ["hf_short"]}}});
        let before = doc.clone();
        assert!(!sanitize_document(&mut doc));
        assert_eq!(doc, before);
        assert!(!sanitize_document(&mut json!({"other": 1})));
    }

    #[test]
    fn sanitize_config_only_writes_when_modified() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let clean = "{\"mcpServers\":{\"a\":{\"command\":\"x\"}}}";
        std::fs::write(&config, clean).unwrap();
        assert!(!sanitize_config(&config).unwrap());
        assert_eq!(std::fs::read_to_string(&config).unwrap(), clean);

        std::fs::write(&config, r#"{"mcpServers":{"a":{"command":"x","env":{"HF_TOKEN":"hf_x"}}}}"#)
            .unwrap();
        assert!(sanitize_config(&config).unwrap());
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&config).unwrap()).unwrap();
        assert_eq!(doc["mcpServers"]["a"]["env"], json!({}));
    }

    #[test]
    fn extracts_tokens_from_args_and_env() {
        let doc = json!({
            "mcpServers": {
                "hf-flag": {"command": "x", "args": ["--hf-token=hf_flag", "--port=1"]},
                "hf-spaced": {"command": "x", "args": ["--HF_TOKEN hf_spaced"]},
                "short": {"command": "x", "args": ["-t hf_short_flag"]},
                "bare": {"command": "x", "args": ["hf_ABCDEFGHIJKLMNOPQRSTUVWX"]},
                "env": {"command": "x", "env": {"HF_TOKEN": " hf_env ", "OTHER": "1"}},
                "wrapped": {"command": "w", "env": {"HF_TOKEN": TOKEN_PLACEHOLDER}},
                "search": {"command": "s", "args": ["--query", "-tls"]}
            }
        });

        let found: Vec<_> = extract_tokens(&doc)
            .into_iter()
            .map(|f| (f.server, f.token))
            .collect();
        let expected = [
            ("hf-flag", "hf_flag"),
            ("hf-spaced", "hf_spaced"),
            ("short", "hf_short_flag"),
            ("bare", "hf_ABCDEFGHIJKLMNOPQRSTUVWX"),
            ("env", "hf_env"),
        ];
        assert_eq!(
            found,
            expected.map(|(s, t)| (s.to_string(), t.to_string()))
        );

        let mut cleaned = doc.clone();
        assert!(sanitize_document(&mut cleaned));
        assert!(extract_tokens(&cleaned).is_empty());
        assert_eq!(cleaned["mcpServers"]["search"]["args"], json!(["--query", "-tls"]));
    }

    #[test]
    fn migrate_moves_token_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let backups = dir.path().join("backups");
        let original = r#"{"mcpServers":{"hf":{"command":"npx","env":{"HF_TOKEN":"hf_real_token_123"}}}}"#;
        std::fs::write(&config, original).unwrap();
        let store = MemoryStore::new();

        let report = migrate_config(&config, &backups, &store).unwrap();
        assert_eq!(report.servers, ["hf"]);
        assert!(report.cleaned);
        assert_eq!(store.retrieve().unwrap().as_deref(), Some("hf_real_token_123"));

        let content = std::fs::read_to_string(&config).unwrap();
        assert!(!content.contains("hf_real_token_123"));
        let backup = report.backup_path.unwrap();
        assert_eq!(std::fs::read_to_string(backup).unwrap(), original);
    }

    #[test]
    fn migrate_without_tokens_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let backups = dir.path().join("backups");
        let clean = r#"{"mcpServers":{"hf":{"command":"npx"}}}"#;
        std::fs::write(&config, clean).unwrap();
        let store = MemoryStore::with_secret("hf_existing");

        let report = migrate_config(&config, &backups, &store).unwrap();
        assert!(report.servers.is_empty());
        assert_eq!(report.backup_path, None);
        assert!(!report.cleaned);
        assert!(!backups.exists());
        assert_eq!(std::fs::read_to_string(&config).unwrap(), clean);
        assert_eq!(store.retrieve().unwrap().as_deref(), Some("hf_existing"));
    }

    #[test]
    fn migrate_refuses_conflicting_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let original = r#"{"mcpServers":{"a":{"command":"x","env":{"HF_TOKEN":"hf_one"}},"b":{"command":"y","args":["--hf-token=hf_two"]}}}"#;
        std::fs::write(&config, original).unwrap();
        let store = MemoryStore::new();

        let err = migrate_config(&config, &dir.path().join("backups"), &store).unwrap_err();
        assert!(matches!(&err, BackupError::ConflictingTokens(servers) if servers.len() == 2));
        assert_eq!(err.to_string(), "Servers hold different hardcoded tokens: a, b");
        assert_eq!(std::fs::read_to_string(&config).unwrap(), original);
        assert_eq!(store.retrieve().unwrap(), None);
    }

    #[test]
    fn migrate_ignores_blank_flag_value() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let original = r#"{"mcpServers":{"hf":{"command":"x","args":["--hf-token= "]}}}"#;
        std::fs::write(&config, original).unwrap();
        let store = MemoryStore::new();

        let report = migrate_config(&config, &dir.path().join("backups"), &store).unwrap();
        assert!(report.servers.is_empty());
        assert_eq!(std::fs::read_to_string(&config).unwrap(), original);
    }

    #[test]
    fn sanitize_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = sanitize_config(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[test]
    fn backup_then_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("claude_desktop_config.json");
        let backups = dir.path().join("backups");
        std::fs::write(&config, "{\"mcpServers\":{}}").unwrap();

        let backup = backup_config(&config, &backups).unwrap();
        assert!(backup.starts_with(&backups));
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("claude_desktop_config.json."));
        assert!(name.ends_with("Z.bak"));
        assert!(!name.contains(':'));

        std::fs::write(&config, "changed").unwrap();
        restore_config(&backup, &config).unwrap();
        assert_eq!(std::fs::read_to_string(&config).unwrap(), "{\"mcpServers\":{}}");
    }

    #[test]
    fn backup_and_restore_report_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            backup_config(&missing, dir.path()),
            Err(BackupError::NotFound(_))
        ));
        assert!(matches!(
            restore_config(&missing, &dir.path().join("config.json")),
            Err(BackupError::NotFound(_))
        ));
    }
}
