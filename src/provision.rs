//! End-to-end provisioning: wrapper script plus config rewrite.
//!
//! One call runs `Start → PlatformResolved → ScriptWritten → ConfigLoaded →
//! Annotated | Synthesized → Persisted → Done`. Any failure stops the run; the
//! error records the last stage that completed. Nothing is retried.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::credential::{CredentialError, CredentialStore};
use crate::platform::Platform;
use crate::rewriter::{self, ConfigError, ConfigLock, ConfigRewriter, RewriteOutcome};
use crate::script::{ScriptError, ScriptGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStage {
    Start,
    PlatformResolved,
    ScriptWritten,
    ConfigLoaded,
    Annotated,
    Synthesized,
    Persisted,
    Done,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisionStage::Start => "start",
            ProvisionStage::PlatformResolved => "platform resolved",
            ProvisionStage::ScriptWritten => "script written",
            ProvisionStage::ConfigLoaded => "config loaded",
            ProvisionStage::Annotated => "annotated",
            ProvisionStage::Synthesized => "synthesized",
            ProvisionStage::Persisted => "persisted",
            ProvisionStage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionFailure {
    #[error("No token found in secure storage")]
    NoToken,
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("{failure}")]
pub struct ProvisionError {
    /// Last stage completed before the failure.
    pub stage: ProvisionStage,
    #[source]
    pub failure: ProvisionFailure,
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub platform: Platform,
    pub script_path: PathBuf,
    pub outcome: RewriteOutcome,
}

/// Which platform's wrapper to generate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Host,
    Platform(Platform),
    /// OS name as given by the user, resolved when the run starts.
    Named(String),
}

/// Drives one provisioning run against an injected credential store.
pub struct Provisioner<'a> {
    store: &'a dyn CredentialStore,
    target: Target,
    rewriter: ConfigRewriter,
}

impl<'a> Provisioner<'a> {
    pub fn new(store: &'a dyn CredentialStore, rewriter: ConfigRewriter) -> Self {
        Self {
            store,
            target: Target::Host,
            rewriter,
        }
    }

    /// Target `platform` instead of the host.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.target = Target::Platform(platform);
        self
    }

    /// Target the OS called `name` (`darwin`, `linux`, `win32`, ...). Unknown
    /// names fail the run before anything is written.
    pub fn with_os(mut self, name: &str) -> Self {
        self.target = Target::Named(name.to_string());
        self
    }

    pub fn provision(&self, config_path: &Path) -> Result<ProvisionReport, ProvisionError> {
        let mut stage = ProvisionStage::Start;
        let fail = |stage, failure: ProvisionFailure| {
            log::error!("Provisioning failed after stage '{}': {}", stage, failure);
            ProvisionError { stage, failure }
        };

        match self.store.retrieve() {
            Ok(Some(_)) => {}
            Ok(None) => return Err(fail(stage, ProvisionFailure::NoToken)),
            Err(e) => return Err(fail(stage, e.into())),
        }

        let generator = match &self.target {
            Target::Host => ScriptGenerator::for_host(),
            Target::Platform(p) => Ok(ScriptGenerator::new(*p)),
            Target::Named(name) => ScriptGenerator::for_os(name),
        }
        .map_err(|e| fail(stage, e.into()))?;
        stage = self.advance(stage, ProvisionStage::PlatformResolved);

        if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| {
                fail(
                    stage,
                    ProvisionFailure::CreateDir {
                        path: dir.to_path_buf(),
                        source,
                    },
                )
            })?;
        }

        let script_path = generator
            .generate(config_path)
            .map_err(|e| fail(stage, e.into()))?;
        stage = self.advance(stage, ProvisionStage::ScriptWritten);

        let _lock = ConfigLock::acquire(config_path).map_err(|e| fail(stage, e.into()))?;
        let mut doc = rewriter::load_or_init(config_path).map_err(|e| fail(stage, e.into()))?;
        stage = self.advance(stage, ProvisionStage::ConfigLoaded);

        let outcome = self
            .rewriter
            .apply(config_path, &mut doc, &script_path)
            .map_err(|e| fail(stage, e.into()))?;
        let next = match outcome {
            RewriteOutcome::Annotated(_) => ProvisionStage::Annotated,
            RewriteOutcome::Synthesized(_) => ProvisionStage::Synthesized,
        };
        stage = self.advance(stage, next);

        rewriter::persist(config_path, &doc).map_err(|e| fail(stage, e.into()))?;
        stage = self.advance(stage, ProvisionStage::Persisted);
        self.advance(stage, ProvisionStage::Done);

        log::info!(
            "Provisioned {} with {} wrapper {}",
            config_path.display(),
            generator.platform(),
            script_path.display()
        );
        Ok(ProvisionReport {
            platform: generator.platform(),
            script_path,
            outcome,
        })
    }

    fn advance(&self, from: ProvisionStage, to: ProvisionStage) -> ProvisionStage {
        log::debug!("Provisioning: {} -> {}", from, to);
        to
    }
}
