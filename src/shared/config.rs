//! Application configuration loaded from `Config.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::shared::errors::ConfigError;
use crate::shared::types::NetworkId;

pub const DEFAULT_CONFIG_PATH: &str = "Config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorNodeCfg {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for MirrorNodeCfg {
    fn default() -> Self {
        Self {
            base_url: "https://testnet.mirrornode.hedera.com/api/v1".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceApiCfg {
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for PriceApiCfg {
    fn default() -> Self {
        Self {
            base_url: "https://test-api.saucerswap.finance".to_string(),
            api_key_env: "PRICE_API_KEY".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl PriceApiCfg {
    /// Reads the key from the environment; secrets never live in the file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorCfg {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for AggregatorCfg {
    fn default() -> Self {
        Self {
            base_url: "https://api.etaswap.com/v1".to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheCfg {
    pub stale_after_ms: u64,
    pub evict_after_ms: u64,
    pub sweep_interval_ms: u64,
    pub retry_count: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter: bool,
}

impl Default for CacheCfg {
    fn default() -> Self {
        Self {
            stale_after_ms: 30_000,
            evict_after_ms: 300_000,
            sweep_interval_ms: 60_000,
            retry_count: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_jitter: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleCfg {
    pub min_interval_ms: u64,
    /// Global cap on concurrent throttled requests; 0 disables it
    pub max_concurrent: usize,
}

impl Default for ThrottleCfg {
    fn default() -> Self {
        Self {
            min_interval_ms: 200,
            max_concurrent: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkCfg {
    pub expected: NetworkId,
}

impl Default for NetworkCfg {
    fn default() -> Self {
        Self {
            expected: NetworkId::new("testnet"),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mirror_node: MirrorNodeCfg,
    pub price_api: PriceApiCfg,
    pub aggregator: AggregatorCfg,
    pub cache: CacheCfg,
    pub throttle: ThrottleCfg,
    pub network: NetworkCfg,
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [
            ("mirror_node.base_url", &self.mirror_node.base_url),
            ("price_api.base_url", &self.price_api.base_url),
            ("aggregator.base_url", &self.aggregator.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!("{} must be an http(s) URL, got {:?}", name, url)));
            }
        }
        if self.cache.stale_after_ms > self.cache.evict_after_ms {
            return Err(ConfigError::Invalid(
                "cache.stale_after_ms must not exceed cache.evict_after_ms".to_string(),
            ));
        }
        if self.network.expected.as_str().is_empty() {
            return Err(ConfigError::Invalid("network.expected must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.cache.stale_after_ms)
    }

    pub fn evict_after(&self) -> Duration {
        Duration::from_millis(self.cache.evict_after_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.throttle.min_interval_ms)
    }
}
