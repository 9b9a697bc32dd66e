//! Path resolution for the downstream config file and backups.
//!
//! Uses env vars when set, otherwise the well-known Claude Desktop locations.

use std::path::{Path, PathBuf};

use crate::models::CONFIG_FILE_NAME;
use crate::platform::Platform;

/// Resolved filesystem locations.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl Paths {
    /// Resolve paths from environment, falling back to defaults under `$HOME`.
    pub fn resolve() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| expand_tilde("~"));
        let config_path = env_path("HFTOKEN_CONFIG_PATH")
            .unwrap_or_else(|| default_config_path(&home, Platform::current().ok()));
        let backup_dir =
            env_path("HFTOKEN_BACKUP_DIR").unwrap_or_else(|| home.join(".mcp-config-backups"));

        Self {
            config_path,
            backup_dir,
        }
    }

    /// Replace the config path (from `--config`).
    pub fn with_config_path(mut self, path: &str) -> Self {
        self.config_path = expand_tilde(path);
        self
    }

    /// Downstream MCP host config file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Directory timestamped config backups are written to.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

/// Known config locations, in lookup order.
pub fn candidate_config_paths(home: &Path) -> [PathBuf; 4] {
    [
        home.join(".claude-desktop").join(CONFIG_FILE_NAME),
        home.join("Library")
            .join("Application Support")
            .join("Claude")
            .join(CONFIG_FILE_NAME),
        home.join("AppData")
            .join("Roaming")
            .join("Claude")
            .join(CONFIG_FILE_NAME),
        home.join(".config").join("claude-desktop").join(CONFIG_FILE_NAME),
    ]
}

/// First candidate that exists, else the conventional location for `platform`.
pub fn default_config_path(home: &Path, platform: Option<Platform>) -> PathBuf {
    let [dot_dir, macos, windows, xdg] = candidate_config_paths(home);
    if let Some(existing) = [&dot_dir, &macos, &windows, &xdg].into_iter().find(|p| p.exists()) {
        return existing.clone();
    }
    match platform {
        Some(Platform::MacOs) => macos,
        Some(Platform::Windows) => windows,
        _ => xdg,
    }
}

fn env_path(env_var: &str) -> Option<PathBuf> {
    let val = std::env::var(env_var).ok()?;
    let trimmed = val.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(expand_tilde(trimmed))
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}
