//! Wrapper script generation.
//!
//! The generated script is registered as an MCP server `command`. At launch it
//! reads the token from the OS credential store, exports it as
//! [`TOKEN_ENV_VAR`], substitutes [`TOKEN_PLACEHOLDER`] inside a `.json` first
//! argument, and hands off to the remaining arguments. If no token can be
//! found it exits non-zero without running anything.
//!
//! Templates use `@NAME@` tokens from a fixed allow-list; every value is
//! quoted for the target shell before substitution.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::models::{TOKEN_ENV_VAR, TOKEN_PLACEHOLDER, TOKEN_SERVICE, WINDOWS_FALLBACK_FILE};
use crate::platform::{Platform, ScriptKind, UnsupportedPlatform};

const POSIX_TEMPLATE: &str = r#"#!/bin/sh
# Hugging Face API token wrapper, generated by hftoken. Do not edit.
set -u

SERVICE=@SERVICE@
PLACEHOLDER_PATTERN=@PLACEHOLDER_PATTERN@

@ENV_VAR@=$(@LOOKUP@ 2>/dev/null)
if [ -z "${@ENV_VAR@:-}" ]; then
  echo "Error: Could not retrieve Hugging Face API token from secure storage." >&2
  echo "Run 'hftoken store' to save a token first." >&2
  exit 1
fi
export @ENV_VAR@

if [ "$#" -eq 0 ]; then
  echo "Usage: $0 <command> [args...]" >&2
  exit 64
fi

case "$1" in
  *.json)
    TEMP_FILE=$(mktemp) || exit 1
    ESCAPED=$(printf '%s\n' "$@ENV_VAR@" | sed -e 's/[\\|&]/\\&/g')
    sed "s|${PLACEHOLDER_PATTERN}|${ESCAPED}|g" "$1" > "$TEMP_FILE" || exit 1
    shift
    set -- "$TEMP_FILE" "$@"
    ;;
esac

exec "$@"
"#;

const POWERSHELL_TEMPLATE: &str = r#"# Hugging Face API token wrapper, generated by hftoken. Do not edit.

$service = @SERVICE@
$placeholder = @PLACEHOLDER@
$cmdArgs = @($args)

try {
  try {
    $cred = Get-StoredCredential -Target $service
    if ($cred) {
      $env:@ENV_VAR@ = $cred.GetNetworkCredential().Password
    }
  } catch {
    $secureFilePath = Join-Path $env:USERPROFILE @FALLBACK_FILE@
    if (Test-Path -LiteralPath $secureFilePath) {
      $secureString = Get-Content -LiteralPath $secureFilePath | ConvertTo-SecureString
      $bstr = [System.Runtime.InteropServices.Marshal]::SecureStringToBSTR($secureString)
      try {
        $env:@ENV_VAR@ = [System.Runtime.InteropServices.Marshal]::PtrToStringAuto($bstr)
      } finally {
        [System.Runtime.InteropServices.Marshal]::ZeroFreeBSTR($bstr)
      }
    }
  }

  if ([string]::IsNullOrEmpty($env:@ENV_VAR@)) {
    throw "Empty token retrieved"
  }
} catch {
  [Console]::Error.WriteLine("Error: Could not retrieve Hugging Face API token from secure storage.")
  [Console]::Error.WriteLine("Run 'hftoken store' to save a token first.")
  exit 1
}

if ($cmdArgs.Count -eq 0) {
  [Console]::Error.WriteLine("Usage: hf_token_wrapper.ps1 <command> [args...]")
  exit 64
}

if ($cmdArgs[0] -like '*.json') {
  $tempFile = [System.IO.Path]::GetTempFileName()
  $content = Get-Content -Raw -LiteralPath $cmdArgs[0]
  $content.Replace($placeholder, $env:@ENV_VAR@) | Set-Content -NoNewline -LiteralPath $tempFile
  $cmdArgs[0] = $tempFile
}

$rest = @()
if ($cmdArgs.Count -gt 1) {
  $rest = $cmdArgs[1..($cmdArgs.Count - 1)]
}

& $cmdArgs[0] @rest
exit $LASTEXITCODE
"#;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedPlatform),
    #[error("Template token @{0}@ is not allowed")]
    UnknownToken(String),
    #[error("Template token @{0}@ has no value")]
    MissingValue(&'static str),
    #[error("Invalid value for @{token}@: {value:?}")]
    InvalidValue { token: &'static str, value: String },
    #[error("Failed to resolve script directory: {0}")]
    ResolveDir(std::io::Error),
    #[error("Failed to write script {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Allow-listed substitution tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateToken {
    Service,
    EnvVar,
    Placeholder,
    PlaceholderPattern,
    Lookup,
    FallbackFile,
}

impl TemplateToken {
    const ALL: [TemplateToken; 6] = [
        TemplateToken::Service,
        TemplateToken::EnvVar,
        TemplateToken::Placeholder,
        TemplateToken::PlaceholderPattern,
        TemplateToken::Lookup,
        TemplateToken::FallbackFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TemplateToken::Service => "SERVICE",
            TemplateToken::EnvVar => "ENV_VAR",
            TemplateToken::Placeholder => "PLACEHOLDER",
            TemplateToken::PlaceholderPattern => "PLACEHOLDER_PATTERN",
            TemplateToken::Lookup => "LOOKUP",
            TemplateToken::FallbackFile => "FALLBACK_FILE",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Substitute `@NAME@` tokens. Values must already be quoted for the target.
pub fn render(template: &str, values: &[(TemplateToken, String)]) -> Result<String, ScriptError> {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| Regex::new(r"@([A-Z][A-Z0-9_]*)@").expect("valid regex"));

    let mut failure = None;
    let rendered = re.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        let value = TemplateToken::from_name(name)
            .ok_or_else(|| ScriptError::UnknownToken(name.to_string()))
            .and_then(|token| {
                values
                    .iter()
                    .find(|(t, _)| *t == token)
                    .map(|(_, v)| v.clone())
                    .ok_or(ScriptError::MissingValue(token.name()))
            });
        match value {
            Ok(v) => v,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

/// Single-quote for POSIX sh.
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Single-quote for PowerShell.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape a literal for use as a sed basic regex with `|` as delimiter.
pub fn sed_pattern_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '.' | '*' | '[' | ']' | '^' | '$' | '|') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Generates the wrapper script for one platform.
#[derive(Debug, Clone)]
pub struct ScriptGenerator {
    platform: Platform,
    service: String,
}

impl ScriptGenerator {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            service: TOKEN_SERVICE.to_string(),
        }
    }

    /// Generator for the running host. Fails before anything is written.
    pub fn for_host() -> Result<Self, ScriptError> {
        Ok(Self::new(Platform::current()?))
    }

    /// Generator for a named platform (`darwin`, `linux`, `win32`, ...).
    pub fn for_os(name: &str) -> Result<Self, ScriptError> {
        Ok(Self::new(Platform::parse(name)?))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Script text for this platform.
    pub fn render(&self) -> Result<String, ScriptError> {
        if !is_identifier(TOKEN_ENV_VAR) {
            return Err(ScriptError::InvalidValue {
                token: TemplateToken::EnvVar.name(),
                value: TOKEN_ENV_VAR.to_string(),
            });
        }
        let env_var = (TemplateToken::EnvVar, TOKEN_ENV_VAR.to_string());

        match self.platform.script_kind() {
            ScriptKind::Posix => {
                let lookup = match self.platform {
                    Platform::MacOs => r#"security find-generic-password -s "$SERVICE" -w"#,
                    _ => r#"secret-tool lookup service "$SERVICE""#,
                };
                render(
                    POSIX_TEMPLATE,
                    &[
                        (TemplateToken::Service, sh_quote(&self.service)),
                        (
                            TemplateToken::PlaceholderPattern,
                            sh_quote(&sed_pattern_escape(TOKEN_PLACEHOLDER)),
                        ),
                        (TemplateToken::Lookup, lookup.to_string()),
                        env_var,
                    ],
                )
            }
            ScriptKind::PowerShell => render(
                POWERSHELL_TEMPLATE,
                &[
                    (TemplateToken::Service, ps_quote(&self.service)),
                    (TemplateToken::Placeholder, ps_quote(TOKEN_PLACEHOLDER)),
                    (TemplateToken::FallbackFile, ps_quote(WINDOWS_FALLBACK_FILE)),
                    env_var,
                ],
            ),
        }
    }

    /// Directory the script for `config_path` is written to.
    pub fn script_dir(config_path: &Path) -> Result<PathBuf, ScriptError> {
        match config_path.parent() {
            Some(p) if p.is_absolute() => Ok(p.to_path_buf()),
            Some(p) if !p.as_os_str().is_empty() => {
                let cwd = std::env::current_dir().map_err(ScriptError::ResolveDir)?;
                Ok(cwd.join(p))
            }
            _ => std::env::current_dir().map_err(ScriptError::ResolveDir),
        }
    }

    /// Write the wrapper next to `config_path`, replacing any previous one.
    /// Returns the absolute script path.
    pub fn generate(&self, config_path: &Path) -> Result<PathBuf, ScriptError> {
        let content = self.render()?;
        let dir = Self::script_dir(config_path)?;
        let script_path = dir.join(self.platform.script_kind().file_name());

        let write_err = |source| ScriptError::Write {
            path: script_path.clone(),
            source,
        };

        let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
        temp.write_all(content.as_bytes()).map_err(write_err)?;
        set_executable(temp.path(), self.platform.script_kind()).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&script_path).map_err(|e| write_err(e.error))?;

        log::info!("Wrote {} wrapper script to {}", self.platform, script_path.display());
        Ok(script_path)
    }
}

#[cfg(unix)]
fn set_executable(path: &Path, kind: ScriptKind) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = match kind {
        ScriptKind::Posix => 0o755,
        ScriptKind::PowerShell => 0o644,
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _kind: ScriptKind) -> std::io::Result<()> {
    Ok(())
}
