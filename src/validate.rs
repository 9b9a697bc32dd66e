//! Token validation against the Hugging Face identity endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const WHOAMI_URL: &str = "https://huggingface.co/api/whoami-v2";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a validation call. Failures are reported here, not as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub orgs: Vec<String>,
    pub message: String,
}

impl ValidationResult {
    fn invalid(message: String) -> Self {
        Self {
            is_valid: false,
            username: None,
            orgs: Vec::new(),
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: Option<String>,
    #[serde(default)]
    orgs: Vec<Org>,
}

#[derive(Debug, Deserialize)]
struct Org {
    #[serde(default)]
    name: String,
}

/// One-shot validator; no retries.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    endpoint: String,
    timeout: Duration,
}

impl TokenValidator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the identity endpoint who `token` belongs to.
    pub fn validate(&self, token: &str) -> ValidationResult {
        match self.request(token) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Token validation request failed: {}", e);
                ValidationResult::invalid(format!("Error validating token: {}", e))
            }
        }
    }

    fn request(&self, token: &str) -> Result<ValidationResult, reqwest::Error> {
        let client = build_http_client(self.timeout)?;
        let resp = client.get(&self.endpoint).bearer_auth(token).send()?;
        let status = resp.status();
        log::debug!("GET {} -> {}", self.endpoint, status);

        if status.is_success() {
            let body: WhoAmI = resp.json()?;
            return Ok(ValidationResult {
                is_valid: true,
                username: Some(body.name.unwrap_or_else(|| "Unknown user".to_string())),
                orgs: body
                    .orgs
                    .into_iter()
                    .map(|o| o.name)
                    .filter(|n| !n.is_empty())
                    .collect(),
                message: "Token validated successfully!".to_string(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(ValidationResult::invalid(
                "Invalid token: Authentication failed".to_string(),
            ));
        }

        Ok(ValidationResult::invalid(format!(
            "Token validation failed: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()))
    }
}

impl Default for TokenValidator {
    fn default() -> Self {
        Self::new(WHOAMI_URL, DEFAULT_TIMEOUT)
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("hftoken/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}
