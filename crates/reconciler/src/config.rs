//! Engine configuration
//!
//! Every field has a default, so an empty document is a valid config.
//!
//! # Example Config
//!
//! ```toml
//! max_concurrency = 4
//! fail_fast = true
//! external_network = "public"
//!
//! [backoff.write]
//! initial_ms = 2000
//! factor = 1.5
//! jitter = 0.1
//! steps = 10
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use cumulus_cloud::CloudSettings;
use cumulus_core::{BackoffProfiles, Error, Result};

use crate::executor::DEFAULT_MAX_CONCURRENCY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound on tasks rendering at once.
    pub max_concurrency: usize,
    /// Stop starting tasks after the first failure.
    pub fail_fast: bool,
    /// Plan every task but never mutate the cloud.
    pub dry_run: bool,
    pub backoff: BackoffProfiles,
    pub floating_ips_enabled: bool,
    /// Network floating IPs are allocated from. When unset, the first
    /// external network is used.
    pub external_network: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            fail_fast: false,
            dry_run: false,
            backoff: BackoffProfiles::default(),
            floating_ips_enabled: true,
            external_network: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// `InvalidConfig` when the TOML is malformed or fails [`validate`].
    ///
    /// [`validate`]: EngineConfig::validate
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::invalid_config(format!("failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// `InvalidConfig` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// # Errors
    /// `InvalidConfig` for a zero concurrency limit or a bad backoff policy.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::invalid_config("max_concurrency must be at least 1"));
        }
        if self
            .external_network
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(Error::invalid_config("external_network must not be blank"));
        }
        self.backoff.validate()
    }

    #[must_use]
    pub fn cloud_settings(&self) -> CloudSettings {
        CloudSettings {
            floating_ips_enabled: self.floating_ips_enabled,
            external_network: self.external_network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_the_default() {
        let config = EngineConfig::from_toml_str("");
        assert!(matches!(config, Ok(ref c) if *c == EngineConfig::default()));
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() -> Result<()> {
        let config = EngineConfig::from_toml_str(
            r#"
            max_concurrency = 2
            fail_fast = true
            external_network = "public"
            "#,
        )?;
        assert_eq!(config.max_concurrency, 2);
        assert!(config.fail_fast);
        assert!(!config.dry_run);
        assert!(config.floating_ips_enabled);
        assert_eq!(config.backoff, BackoffProfiles::default());
        assert_eq!(
            config.cloud_settings().external_network.as_deref(),
            Some("public")
        );
        Ok(())
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let result = EngineConfig::from_toml_str("max_concurrency = 0");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_bad_backoff_is_rejected() {
        let result = EngineConfig::from_toml_str(
            r"
            [backoff.poll]
            initial_ms = 1000
            factor = 0.5
            jitter = 0.0
            steps = 3
            ",
        );
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = EngineConfig::from_toml_str("max_concurency = 3");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }
}
