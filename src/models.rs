//! Data structures and fixed literals shared by the script generator and the
//! config rewriter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Service name the token is stored under in the OS credential store.
pub const TOKEN_SERVICE: &str = "HuggingFaceToken";

/// Environment variable the wrapper script exports for the child process.
pub const TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Literal written into configs in place of the real token.
pub const TOKEN_PLACEHOLDER: &str = "{{HF_TOKEN}}";

/// Top-level key of the downstream config holding the server map.
pub const SERVERS_KEY: &str = "mcpServers";

/// Name of the entry created when no Hugging Face entry exists yet.
pub const DEFAULT_SERVER_NAME: &str = "huggingface";

pub const SERVER_COMMENT: &str = "Uses securely stored Hugging Face token";

pub const CONFIG_FILE_NAME: &str = "claude_desktop_config.json";

/// File under the Windows home directory holding a DPAPI-protected copy of
/// the token, read by the PowerShell wrapper.
pub const WINDOWS_FALLBACK_FILE: &str = ".hf_token_secure.txt";

/// One launchable server in the downstream config.
///
/// Existing entries are edited as raw JSON so unknown fields survive; this
/// type is only used to build fresh entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ServerEntry {
    /// Entry that launches `command` with the token placeholder bound.
    pub fn wrapped(command: impl Into<String>) -> Self {
        let mut env = BTreeMap::new();
        env.insert(TOKEN_ENV_VAR.to_string(), TOKEN_PLACEHOLDER.to_string());
        Self {
            command: command.into(),
            args: Vec::new(),
            env,
            comment: Some(SERVER_COMMENT.to_string()),
        }
    }
}

/// Skeleton document written when the config file does not exist.
pub fn empty_document() -> serde_json::Value {
    serde_json::json!({ SERVERS_KEY: {} })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_entry_serializes_with_placeholder() {
        let value = serde_json::to_value(ServerEntry::wrapped("/tmp/hf_token_wrapper.sh")).unwrap();
        assert_eq!(value["command"], "/tmp/hf_token_wrapper.sh");
        assert_eq!(value["args"], serde_json::json!([]));
        assert_eq!(value["env"][TOKEN_ENV_VAR], TOKEN_PLACEHOLDER);
        assert_eq!(value["comment"], SERVER_COMMENT);
    }

    #[test]
    fn bare_entry_omits_empty_fields() {
        let entry: ServerEntry = serde_json::from_str(r#"{"command":"npx"}"#).unwrap();
        assert!(entry.args.is_empty());
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("env").is_none());
        assert!(value.get("comment").is_none());
    }
}
