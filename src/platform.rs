//! Host platform detection.

use std::fmt;

/// Platforms the wrapper script can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// macOS Keychain via `security`.
    MacOs,
    /// Secret Service via `secret-tool` (Linux and the BSDs).
    Linux,
    /// Windows Credential Manager, with a DPAPI file fallback.
    Windows,
}

/// Flavour of script emitted for a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Posix,
    PowerShell,
}

#[derive(Debug, thiserror::Error)]
#[error("Unsupported platform: {0}")]
pub struct UnsupportedPlatform(pub String);

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Result<Self, UnsupportedPlatform> {
        Self::parse(std::env::consts::OS)
    }

    /// Accepts Rust (`macos`, `windows`) and Node-style (`darwin`, `win32`) names.
    pub fn parse(name: &str) -> Result<Self, UnsupportedPlatform> {
        match name.trim().to_ascii_lowercase().as_str() {
            "macos" | "darwin" => Ok(Platform::MacOs),
            "linux" | "freebsd" | "openbsd" | "netbsd" | "dragonfly" => Ok(Platform::Linux),
            "windows" | "win32" => Ok(Platform::Windows),
            _ => Err(UnsupportedPlatform(name.to_string())),
        }
    }

    pub fn script_kind(self) -> ScriptKind {
        match self {
            Platform::MacOs | Platform::Linux => ScriptKind::Posix,
            Platform::Windows => ScriptKind::PowerShell,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::MacOs => "macos",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
        };
        write!(f, "{}", name)
    }
}

impl ScriptKind {
    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Posix => "hf_token_wrapper.sh",
            ScriptKind::PowerShell => "hf_token_wrapper.ps1",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_and_rust_names() {
        assert_eq!(Platform::parse("darwin").unwrap(), Platform::MacOs);
        assert_eq!(Platform::parse("macos").unwrap(), Platform::MacOs);
        assert_eq!(Platform::parse("win32").unwrap(), Platform::Windows);
        assert_eq!(Platform::parse("Windows").unwrap(), Platform::Windows);
        assert_eq!(Platform::parse("freebsd").unwrap(), Platform::Linux);
    }

    #[test]
    fn rejects_unknown_platforms() {
        let err = Platform::parse("plan9").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported platform: plan9");
        assert!(Platform::parse("android").is_err());
    }

    #[test]
    fn script_kind_follows_family() {
        assert_eq!(Platform::Linux.script_kind().file_name(), "hf_token_wrapper.sh");
        assert_eq!(Platform::Windows.script_kind().file_name(), "hf_token_wrapper.ps1");
    }
}
