//! Runtime knobs read from the environment.

use std::time::Duration;

use crate::rewriter::NameMatcher;
use crate::validate::{TokenValidator, DEFAULT_TIMEOUT, WHOAMI_URL};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Identity endpoint (`HFTOKEN_WHOAMI_URL`).
    pub whoami_url: String,
    /// Validation timeout (`HFTOKEN_VALIDATE_TIMEOUT_SECS`).
    pub validate_timeout: Duration,
    /// Server-name substrings (`HFTOKEN_MATCH`, comma separated).
    pub matcher: NameMatcher,
}

impl Settings {
    pub fn resolve() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let whoami_url = get("HFTOKEN_WHOAMI_URL").unwrap_or_else(|| WHOAMI_URL.to_string());

        let validate_timeout = match get("HFTOKEN_VALIDATE_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    log::warn!("Ignoring invalid HFTOKEN_VALIDATE_TIMEOUT_SECS={:?}", raw);
                    DEFAULT_TIMEOUT
                }
            },
            None => DEFAULT_TIMEOUT,
        };

        let matcher = match get("HFTOKEN_MATCH") {
            Some(raw) => {
                let matcher = NameMatcher::new(raw.split(','));
                if matcher.needles().is_empty() {
                    NameMatcher::default()
                } else {
                    matcher
                }
            }
            None => NameMatcher::default(),
        };

        Self {
            whoami_url,
            validate_timeout,
            matcher,
        }
    }

    pub fn validator(&self) -> TokenValidator {
        TokenValidator::new(self.whoami_url.clone(), self.validate_timeout)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Settings {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.whoami_url, WHOAMI_URL);
        assert_eq!(s.validate_timeout, DEFAULT_TIMEOUT);
        assert_eq!(s.matcher, NameMatcher::default());
    }

    #[test]
    fn overrides() {
        let s = from(&[
            ("HFTOKEN_WHOAMI_URL", "http://localhost:1/whoami"),
            ("HFTOKEN_VALIDATE_TIMEOUT_SECS", "3"),
            ("HFTOKEN_MATCH", "huggingface, hf-"),
        ]);
        assert_eq!(s.validator().endpoint(), "http://localhost:1/whoami");
        assert_eq!(s.validate_timeout, Duration::from_secs(3));
        assert_eq!(s.matcher.needles(), ["huggingface", "hf-"]);
        assert!(!s.matcher.matches("half"));
    }

    #[test]
    fn bad_values_fall_back() {
        let s = from(&[("HFTOKEN_VALIDATE_TIMEOUT_SECS", "soon"), ("HFTOKEN_MATCH", " , ")]);
        assert_eq!(s.validate_timeout, DEFAULT_TIMEOUT);
        assert_eq!(s.matcher, NameMatcher::default());
    }
}
