//! Secure token storage in the OS credential store.
//!
//! The token lives in the macOS Keychain, Windows Credential Manager or the
//! Linux Secret Service under [`TOKEN_SERVICE`]. It is never written to disk
//! in plaintext by this crate.
//!
//! Two platforms need extra care so the wrapper script can read the item back
//! without help from this binary:
//!
//! - macOS: the item is written through `security -i` with `/usr/bin/security`
//!   on its access list. Items created through Security.framework only trust
//!   the creating binary, and the wrapper would hit a Keychain prompt.
//! - Windows: a DPAPI-protected copy is also written to
//!   `%USERPROFILE%\.hf_token_secure.txt`. `Get-StoredCredential` needs the
//!   PSGallery `CredentialManager` module, which stock Windows lacks.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keyring::Entry;

use crate::models::{TOKEN_SERVICE, WINDOWS_FALLBACK_FILE};

/// Keychain CLI the wrapper script reads the token with.
pub const SECURITY_TOOL: &str = "/usr/bin/security";

/// Reads one line from stdin and writes it DPAPI-protected to
/// `$env:HFTOKEN_SECURE_FILE`, keeping the token off the command line.
#[cfg(windows)]
const DPAPI_WRITE_SCRIPT: &str = "$t = [Console]::In.ReadLine(); \
ConvertTo-SecureString -String $t -AsPlainText -Force | ConvertFrom-SecureString | \
Out-File -Encoding ascii -LiteralPath $env:HFTOKEN_SECURE_FILE";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Token is empty")]
    EmptySecret,
    #[error("Token contains characters the credential store cannot take: {0}")]
    InvalidSecret(&'static str),
    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Capability over a store holding a single token.
pub trait CredentialStore {
    /// Save the token, replacing any previous value.
    fn store(&self, secret: &str) -> Result<(), CredentialError>;

    /// Stored token, or `None` if there is none.
    fn retrieve(&self) -> Result<Option<String>, CredentialError>;

    /// Remove the token. Deleting a missing token succeeds.
    fn delete(&self) -> Result<(), CredentialError>;
}

/// Store backed by the `keyring` crate.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(TOKEN_SERVICE)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
            account: current_username(),
        }
    }

    fn entry(&self) -> Result<Entry, CredentialError> {
        // The wrapper script looks the credential up by target name on Windows.
        let entry = if cfg!(windows) {
            Entry::new_with_target(&self.service, &self.service, &self.account)
        } else {
            Entry::new(&self.service, &self.account)
        };
        entry.map_err(|e| CredentialError::Unavailable(e.to_string()))
    }

    fn delete_entry(&self) -> Result<bool, CredentialError> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(CredentialError::Unavailable(e.to_string())),
        }
    }

    #[cfg(target_os = "macos")]
    fn write_secret(&self, secret: &str) -> Result<(), CredentialError> {
        // `-U` keeps the old access list, so start from a clean item.
        self.delete_entry()?;

        let mut trusted = vec![PathBuf::from(SECURITY_TOOL)];
        if let Ok(exe) = std::env::current_exe() {
            trusted.push(exe);
        }
        let command = keychain_add_command(&self.service, &self.account, secret, &trusted)?;
        let mut security = std::process::Command::new(SECURITY_TOOL);
        security.arg("-i");
        run_with_stdin(&mut security, &command)?;

        // `security -i` reports per-command failures on stderr only.
        match self.retrieve()? {
            Some(stored) if stored == secret => Ok(()),
            _ => Err(CredentialError::Unavailable(
                "Keychain did not accept the token".to_string(),
            )),
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn write_secret(&self, secret: &str) -> Result<(), CredentialError> {
        self.entry()?
            .set_password(secret)
            .map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        #[cfg(windows)]
        write_dpapi_file(secret)?;
        Ok(())
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn store(&self, secret: &str) -> Result<(), CredentialError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        self.write_secret(secret)?;
        log::info!("Token stored under service '{}'", self.service);
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<String>, CredentialError> {
        match self.entry()?.get_password() {
            Ok(secret) if secret.trim().is_empty() => Ok(None),
            Ok(secret) => Ok(Some(secret.trim().to_string())),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Unavailable(e.to_string())),
        }
    }

    fn delete(&self) -> Result<(), CredentialError> {
        let removed = self.delete_entry()?;
        #[cfg(windows)]
        remove_dpapi_file()?;
        if removed {
            log::info!("Token deleted from service '{}'", self.service);
        }
        Ok(())
    }
}

/// Location of the DPAPI-protected token copy under `home`.
pub fn fallback_file_path(home: &Path) -> PathBuf {
    home.join(WINDOWS_FALLBACK_FILE)
}

/// Input for `security -i` that creates the generic-password item with
/// `trusted` applications on its access list.
pub fn keychain_add_command(
    service: &str,
    account: &str,
    secret: &str,
    trusted: &[PathBuf],
) -> Result<String, CredentialError> {
    let mut command = format!(
        "add-generic-password -U -a {} -s {}",
        keychain_quote(account)?,
        keychain_quote(service)?
    );
    for app in trusted {
        command.push_str(" -T ");
        command.push_str(&keychain_quote(&app.to_string_lossy())?);
    }
    command.push_str(" -w ");
    command.push_str(&keychain_quote(secret)?);
    command.push('\n');
    Ok(command)
}

fn keychain_quote(value: &str) -> Result<String, CredentialError> {
    if value.contains('"') || value.contains('\\') {
        return Err(CredentialError::InvalidSecret("quotes or backslashes"));
    }
    if value.chars().any(char::is_control) {
        return Err(CredentialError::InvalidSecret("control characters"));
    }
    Ok(format!("\"{}\"", value))
}

#[cfg(any(windows, target_os = "macos"))]
fn run_with_stdin(command: &mut std::process::Command, input: &str) -> Result<(), CredentialError> {
    use std::io::Write;
    use std::process::Stdio;

    let program = command.get_program().to_string_lossy().into_owned();
    let unavailable = |e: std::io::Error| {
        CredentialError::Unavailable(format!("failed to run {}: {}", program, e))
    };

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(unavailable)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes()).map_err(unavailable)?;
    }
    let output = child.wait_with_output().map_err(unavailable)?;
    if !output.status.success() {
        return Err(CredentialError::Unavailable(format!(
            "{} failed: {}",
            program,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(windows)]
fn write_dpapi_file(secret: &str) -> Result<(), CredentialError> {
    let home = dirs::home_dir()
        .ok_or_else(|| CredentialError::Unavailable("home directory not found".to_string()))?;
    let path = fallback_file_path(&home);
    let mut powershell = std::process::Command::new("powershell");
    powershell
        .args(["-NoProfile", "-NonInteractive", "-Command", DPAPI_WRITE_SCRIPT])
        .env("HFTOKEN_SECURE_FILE", &path);
    run_with_stdin(&mut powershell, &format!("{}\n", secret))?;
    log::debug!("Wrote DPAPI token copy to {}", path.display());
    Ok(())
}

#[cfg(windows)]
fn remove_dpapi_file() -> Result<(), CredentialError> {
    let Some(home) = dirs::home_dir() else {
        return Ok(());
    };
    let path = fallback_file_path(&home);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CredentialError::Unavailable(format!(
            "failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secret: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: &str) -> Self {
        Self {
            secret: Mutex::new(Some(secret.to_string())),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, CredentialError> {
        self.secret
            .lock()
            .map_err(|_| CredentialError::Unavailable("memory store poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, secret: &str) -> Result<(), CredentialError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        *self.lock()? = Some(secret.to_string());
        Ok(())
    }

    fn retrieve(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.lock()?.clone())
    }

    fn delete(&self) -> Result<(), CredentialError> {
        *self.lock()? = None;
        Ok(())
    }
}

/// Show only the first and last four characters of a token.
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}

#[cfg(unix)]
fn current_username() -> String {
    nix::unistd::User::from_uid(nix::unistd::Uid::current())
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "default".to_string())
}

#[cfg(not(unix))]
fn current_username() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string())
}
