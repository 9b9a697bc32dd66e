//! Downstream config rewriting.
//!
//! Wires Hugging Face server entries in `claude_desktop_config.json` to the
//! token placeholder, or adds a `huggingface` entry that launches the wrapper
//! script. The document is edited as raw JSON so unrelated entries and
//! unknown fields are preserved, in order.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;

use crate::models::{
    empty_document, ServerEntry, DEFAULT_SERVER_NAME, SERVERS_KEY, SERVER_COMMENT, TOKEN_ENV_VAR,
    TOKEN_PLACEHOLDER,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Malformed config {path}: {reason}")]
    InvalidShape { path: PathBuf, reason: String },
    #[error("Failed to lock config {path}: {source}")]
    Lock {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What a rewrite did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// Existing entries (by name) now carry the placeholder.
    Annotated(Vec<String>),
    /// No entry matched; one was added under this name.
    Synthesized(String),
}

/// Decides which server entries are Hugging Face related.
///
/// Case-insensitive substring match. The defaults (`hf`, `huggingface`) also
/// match names like `half`; narrow the list via `HFTOKEN_MATCH` if needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatcher {
    needles: Vec<String>,
}

impl NameMatcher {
    pub fn new<I, S>(needles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let needles = needles
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { needles }
    }

    pub fn needles(&self) -> &[String] {
        &self.needles
    }

    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.needles.iter().any(|n| name.contains(n.as_str()))
    }
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(["hf", "huggingface"])
    }
}

/// Exclusive advisory lock on `<config>.lock`, released on drop.
///
/// A sibling file is locked rather than the config itself because the config
/// is replaced by rename on every write.
#[derive(Debug)]
pub struct ConfigLock {
    _file: File,
    path: PathBuf,
}

impl ConfigLock {
    /// Block until no other rewrite of `config_path` is in progress.
    pub fn acquire(config_path: &Path) -> Result<Self, ConfigError> {
        let path = lock_path(config_path);
        let lock_err = |source| ConfigError::Lock {
            path: path.clone(),
            source,
        };
        let file = File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        log::debug!("Acquired config lock {}", path.display());
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path(config_path: &Path) -> PathBuf {
    let mut os = config_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

/// Rewrites the downstream config for the wrapper script.
#[derive(Debug, Clone, Default)]
pub struct ConfigRewriter {
    matcher: NameMatcher,
}

impl ConfigRewriter {
    pub fn new(matcher: NameMatcher) -> Self {
        Self { matcher }
    }

    pub fn matcher(&self) -> &NameMatcher {
        &self.matcher
    }

    /// Lock, load, annotate or synthesize, persist.
    pub fn update_config_file(
        &self,
        config_path: &Path,
        script_path: &Path,
    ) -> Result<RewriteOutcome, ConfigError> {
        let _lock = ConfigLock::acquire(config_path)?;
        let mut doc = load_or_init(config_path)?;
        let outcome = self.apply(config_path, &mut doc, script_path)?;
        persist(config_path, &doc)?;
        log::info!(
            "Updated config file {} to use wrapper script {}",
            config_path.display(),
            script_path.display()
        );
        Ok(outcome)
    }

    /// Annotate matching entries in `doc`, or add the default entry.
    /// `config_path` is only used in error messages.
    pub fn apply(
        &self,
        config_path: &Path,
        doc: &mut Value,
        script_path: &Path,
    ) -> Result<RewriteOutcome, ConfigError> {
        let shape_err = |reason: String| ConfigError::InvalidShape {
            path: config_path.to_path_buf(),
            reason,
        };

        let root = doc
            .as_object_mut()
            .ok_or_else(|| shape_err("root is not a JSON object".to_string()))?;
        let slot = root
            .entry(SERVERS_KEY)
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if slot.is_null() {
            *slot = Value::Object(serde_json::Map::new());
        }
        let servers = slot
            .as_object_mut()
            .ok_or_else(|| shape_err(format!("`{}` is not an object", SERVERS_KEY)))?;

        // Validate everything first so a bad entry leaves the document untouched.
        let mut matched = Vec::new();
        for (name, entry) in servers.iter() {
            if !self.matcher.matches(name) {
                continue;
            }
            let entry = entry
                .as_object()
                .ok_or_else(|| shape_err(format!("server `{}` is not an object", name)))?;
            if let Some(env) = entry.get("env") {
                if !env.is_object() {
                    return Err(shape_err(format!("server `{}` has a non-object `env`", name)));
                }
            }
            matched.push(name.clone());
        }

        if matched.is_empty() {
            if servers.contains_key(DEFAULT_SERVER_NAME) {
                // Only reachable when the matcher excludes the default name.
                log::warn!(
                    "Replacing server `{}` which does not match {:?}",
                    DEFAULT_SERVER_NAME,
                    self.matcher.needles()
                );
            }
            let entry = ServerEntry::wrapped(script_path.to_string_lossy());
            let entry = serde_json::to_value(entry).map_err(ConfigError::Serialize)?;
            servers.insert(DEFAULT_SERVER_NAME.to_string(), entry);
            log::debug!("Added server `{}`", DEFAULT_SERVER_NAME);
            return Ok(RewriteOutcome::Synthesized(DEFAULT_SERVER_NAME.to_string()));
        }

        for name in &matched {
            if let Some(Value::Object(entry)) = servers.get_mut(name) {
                let env = entry
                    .entry("env")
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
                if let Value::Object(env) = env {
                    env.insert(
                        TOKEN_ENV_VAR.to_string(),
                        Value::String(TOKEN_PLACEHOLDER.to_string()),
                    );
                }
                entry.insert(
                    "comment".to_string(),
                    Value::String(SERVER_COMMENT.to_string()),
                );
                log::debug!("Annotated server `{}`", name);
            }
        }
        Ok(RewriteOutcome::Annotated(matched))
    }
}

/// Read and parse `path`, or `None` if it does not exist.
pub fn load_existing(path: &Path) -> Result<Option<Value>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read and parse `path`. A missing file is created as an empty document.
pub fn load_or_init(path: &Path) -> Result<Value, ConfigError> {
    if let Some(doc) = load_existing(path)? {
        return Ok(doc);
    }
    let doc = empty_document();
    persist(path, &doc)?;
    log::info!("Created config file {}", path.display());
    Ok(doc)
}

/// Pretty-print `doc` to `path` via temp file, fsync and rename.
pub fn persist(path: &Path, doc: &Value) -> Result<(), ConfigError> {
    let mut content = serde_json::to_string_pretty(doc).map_err(ConfigError::Serialize)?;
    content.push('\n');
    atomic_write(path, content.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` with `content` so readers never observe a partial file.
pub fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
