//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Remote endpoint and retry policy. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// API root; endpoint paths are appended to it
    pub base_url: String,
    /// Fixed per-attempt timeout
    pub request_timeout_secs: u64,
    /// Extra attempts for timeouts, lost connections and 5xx
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_multiplier: f64,
    /// Send PUT/DELETE as POST with a `_method` field
    pub method_override: bool,
    /// Health worker id, sent as a list filter
    pub asha_id: Option<String>,
    pub database_path: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost/asha_api/".to_string(),
            request_timeout_secs: 30,
            max_retries: 2,
            backoff_initial_ms: 1000,
            backoff_multiplier: 2.0,
            method_override: true,
            asha_id: None,
            database_path: "asha_sync.db".to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid("base_url is empty".into()));
        }
        if reqwest::Url::parse(url).is_err() {
            return Err(ConfigError::Invalid(format!("base_url is not a URL: {}", url)));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff_multiplier must be at least 1.0".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.backoff_initial_ms as f64 * factor) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
        assert!(config.method_override);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = SyncConfig::from_toml_str(
            r#"
            base_url = "https://api.example.org/asha/"
            asha_id = "ASHA-17"
            request_timeout_secs = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.org/asha/");
        assert_eq!(config.asha_id.as_deref(), Some("ASHA-17"));
        assert_eq!(config.request_timeout_secs, 20);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            SyncConfig::from_toml_str("request_timeout_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str(r#"base_url = "not a url""#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("max_retries = \"two\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_backoff_grows() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(1000));
        assert_eq!(config.backoff(2), Duration::from_millis(2000));
        assert_eq!(config.backoff(3), Duration::from_millis(4000));
    }
}
