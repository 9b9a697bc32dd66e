//! hftoken - secure Hugging Face token provisioning for MCP hosts
//!
//! Keeps the token in the OS credential store, generates a wrapper script that
//! injects it at launch, and points the MCP host config at that script.

pub mod backup;
pub mod credential;
pub mod models;
pub mod paths;
pub mod platform;
pub mod provision;
pub mod rewriter;
pub mod script;
pub mod settings;
pub mod validate;

pub use backup::{
    backup_config, extract_tokens, migrate_config, restore_config, sanitize_config, BackupError,
    MigrationReport,
};
pub use credential::{CredentialError, CredentialStore, KeyringStore, MemoryStore};
pub use models::ServerEntry;
pub use paths::Paths;
pub use platform::{Platform, ScriptKind};
pub use provision::{ProvisionError, ProvisionReport, ProvisionStage, Provisioner};
pub use rewriter::{ConfigError, ConfigRewriter, NameMatcher, RewriteOutcome};
pub use script::{ScriptError, ScriptGenerator};
pub use settings::Settings;
pub use validate::{TokenValidator, ValidationResult};
