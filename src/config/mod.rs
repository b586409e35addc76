//! Configuration for generation runs
//!
//! Loaded from an optional `songforge.toml`, with environment overrides
//! for secrets. Every field has a working default so the engine can run
//! with no configuration at all (given an API key in the environment).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default overall wall-clock budget for one generation run.
pub const DEFAULT_DEADLINE_SECS: u64 = 420;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Overall run deadline in seconds.
    pub deadline_secs: u64,
    /// Per-request timeout for a single provider round-trip.
    pub request_timeout_secs: u64,
    pub provider: String,
    pub model: String,
    pub image_model: String,
    pub base_url: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            deadline_secs: DEFAULT_DEADLINE_SECS,
            request_timeout_secs: 120,
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            image_model: "dall-e-3".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "SONGFORGE_API_KEY".to_string(),
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl GenerationConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Loads from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
        }
    }

    /// Resolves the provider API key from the configured environment
    /// variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env).with_context(|| {
            format!(
                "provider API key not found: set the {} environment variable",
                self.api_key_env
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_complete() {
        let config = GenerationConfig::default();
        assert_eq!(config.deadline(), Duration::from_secs(420));
        assert!(!config.model.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deadline_secs = 60\nmodel = \"gpt-4o\"").unwrap();
        let config = GenerationConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.deadline_secs, 60);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deadline_secs = \"soon\"").unwrap();
        assert!(GenerationConfig::load(Some(file.path())).is_err());
    }
}
