//! Configuration loader for Stride.
//!
//! Reads `config.toml` from the data directory (`~/.stride/` in
//! production, overridable via `STRIDE_CONFIG`) and deserializes it into
//! [`StrideConfig`]. Falls back to sensible defaults when the file is
//! missing or malformed; every field has a serde default, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use stride_types::config::{CoreConfig, ProviderPricing};
use stride_types::llm::FallbackChainConfig;

use crate::sqlite::pool::default_database_url;

/// Top-level configuration for a Stride deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrideConfig {
    /// Orchestration-core tunables (router heuristics, prompt budgets,
    /// dispatch timeout, store retry backoff).
    #[serde(default)]
    pub core: CoreConfig,

    /// Provider fallback chain configuration.
    #[serde(default)]
    pub chain: FallbackChainConfig,

    /// Per-model pricing overrides.
    #[serde(default)]
    pub provider_pricing: Vec<ProviderPricing>,

    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for StrideConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            chain: FallbackChainConfig::default(),
            provider_pricing: Vec::new(),
            database_url: default_database_url(),
        }
    }
}

/// Resolve the configuration file path.
///
/// `STRIDE_CONFIG` overrides everything; otherwise the file lives in the
/// data directory (`STRIDE_DATA_DIR` or `~/.stride`).
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("STRIDE_CONFIG") {
        return PathBuf::from(path);
    }
    let data_dir = std::env::var("STRIDE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".stride")
        });
    data_dir.join("config.toml")
}

/// Load configuration from the given path.
///
/// - If the file does not exist, returns [`StrideConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(path: &Path) -> StrideConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return StrideConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return StrideConfig::default();
        }
    };

    match toml::from_str::<StrideConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            StrideConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("config.toml")).await;
        assert_eq!(config.core.router.simple_max_chars, 80);
        assert!(config.chain.providers.is_empty());
        assert!(config.provider_pricing.is_empty());
        assert!(config.database_url.starts_with("sqlite://"));
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(
            &config_path,
            r#"
database_url = "sqlite:///tmp/stride-test.db"

[core.router]
simple_max_chars = 120

[core.prompt]
token_ceiling = 3000

[chain]
request_timeout_ms = 30000

[[chain.providers]]
name = "anthropic"
provider_type = "anthropic"
model = "claude-sonnet-4-20250514"
priority = 0
enabled = true

[chain.providers.capabilities]
streaming = true
tool_calling = true
max_context_tokens = 200000
max_output_tokens = 8192

[[provider_pricing]]
provider_name = "anthropic"
model_pattern = "claude-sonnet-4"
input_cost_per_million = 3.0
output_cost_per_million = 15.0
"#,
        )
        .await
        .unwrap();

        let config = load_config(&config_path).await;
        assert_eq!(config.database_url, "sqlite:///tmp/stride-test.db");
        assert_eq!(config.core.router.simple_max_chars, 120);
        assert_eq!(config.core.prompt.token_ceiling, 3000);
        assert_eq!(config.chain.request_timeout_ms, 30_000);
        assert_eq!(config.chain.providers.len(), 1);
        assert_eq!(config.chain.providers[0].name, "anthropic");
        assert_eq!(config.provider_pricing.len(), 1);
        // Untouched fields keep their defaults
        assert_eq!(config.core.prompt.history_turns, 5);
        assert_eq!(config.chain.rate_limit_queue_timeout_ms, 5000);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config(&config_path).await;
        assert_eq!(config.core.router.simple_max_chars, 80);
    }

    #[tokio::test]
    async fn load_config_empty_file_is_valid() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "").await.unwrap();

        let config = load_config(&config_path).await;
        assert_eq!(config.core.dispatch_timeout_ms, 10_000);
    }
}
