use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Settings store error: {0}")]
    StoreError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpsMode {
    Mock,
    Real,
}

/// Runtime settings. Resolution priority for every key:
/// persisted operation-settings > environment (`OPS_*`) > built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    pub ops_mode: OpsMode,
    pub ops_enable_langgraph: bool,
    pub ops_timezone: String,
    pub ops_default_source_asset: String,
    pub max_search_limit: u32,
    pub max_agg_rows: u32,
    pub max_nodes: u32,
    pub max_edges: u32,
    pub cache_ttl: Duration,
    pub max_replans: u32,
    pub replan_min_interval: Duration,
    pub replan_cooling_period: Duration,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            ops_mode: OpsMode::Real,
            ops_enable_langgraph: false,
            ops_timezone: "UTC".into(),
            ops_default_source_asset: "primary_postgres".into(),
            max_search_limit: 100,
            max_agg_rows: 10_000,
            max_nodes: 500,
            max_edges: 2_000,
            cache_ttl: Duration::from_secs(300),
            max_replans: 3,
            replan_min_interval: Duration::from_secs(60),
            replan_cooling_period: Duration::from_secs(300),
        }
    }
}

/// Persisted runtime overrides, read on startup and on explicit reload.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, String>, ConfigError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
}

/// In-memory settings store for tests and mock mode.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_all(&self) -> Result<HashMap<String, String>, ConfigError> {
        Ok(self.values.read().await.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl OpsConfig {
    /// Builds the effective configuration: defaults, overlaid by `OPS_*`
    /// environment variables, overlaid by persisted settings.
    pub async fn load(store: &dyn SettingsStore) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        let persisted = store.load_all().await?;
        config.apply_overrides(&persisted)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        let env_keys = [
            "ops_mode",
            "ops_enable_langgraph",
            "ops_timezone",
            "ops_default_source_asset",
            "max_search_limit",
            "max_agg_rows",
            "max_nodes",
            "max_edges",
            "cache_ttl",
            "max_replans",
            "replan_min_interval",
            "replan_cooling_period",
        ];
        let mut overrides = HashMap::new();
        for key in env_keys {
            let env_name = format!("OPS_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(&env_name) {
                overrides.insert(key.to_string(), value);
            }
        }
        if let Err(err) = self.apply_overrides(&overrides) {
            log::warn!("ignoring invalid environment override: {err}");
        }
    }

    fn apply_overrides(&mut self, values: &HashMap<String, String>) -> Result<(), ConfigError> {
        for (key, value) in values {
            match key.as_str() {
                "ops_mode" => {
                    self.ops_mode = match value.as_str() {
                        "mock" => OpsMode::Mock,
                        "real" => OpsMode::Real,
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                key: key.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                "ops_enable_langgraph" => {
                    self.ops_enable_langgraph = parse_bool(key, value)?;
                }
                "ops_timezone" => self.ops_timezone = value.clone(),
                "ops_default_source_asset" => self.ops_default_source_asset = value.clone(),
                "max_search_limit" => self.max_search_limit = parse_u32(key, value)?,
                "max_agg_rows" => self.max_agg_rows = parse_u32(key, value)?,
                "max_nodes" => self.max_nodes = parse_u32(key, value)?,
                "max_edges" => self.max_edges = parse_u32(key, value)?,
                "cache_ttl" => self.cache_ttl = Duration::from_secs(parse_u64(key, value)?),
                "max_replans" => self.max_replans = parse_u32(key, value)?,
                "replan_min_interval" => {
                    self.replan_min_interval = Duration::from_secs(parse_u64(key, value)?)
                }
                "replan_cooling_period" => {
                    self.replan_cooling_period = Duration::from_secs(parse_u64(key, value)?)
                }
                other => {
                    log::debug!("ignoring unknown setting '{other}'");
                }
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
