//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! section and field has a default, so a partial file is valid.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::cache::CacheConfig;
use crate::clv::ClvConfig;
use crate::engine::{EngineConfig, ScheduleConfig};
use crate::provider::the_odds_api::DEFAULT_BASE_URL;
use crate::staking::StakingConfig;
use crate::strategy::value::ScannerConfig;
use crate::types::MarketType;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scanner: ScannerConfig,
    pub caches: CacheConfig,
    pub schedule: ScheduleConfig,
    pub clv: ClvConfig,
    pub staking: StakingConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key_env: String,
    /// Provider sport keys, e.g. `basketball_nba`.
    pub sports: Vec<String>,
    /// Market keys, e.g. `h2h`, `totals_q1`, `player_points`.
    pub markets: Vec<String>,
    pub regions: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: "ODDS_API_KEY".to_string(),
            sports: vec!["basketball_nba".to_string(), "soccer_epl".to_string()],
            markets: vec!["h2h".to_string(), "spreads".to_string(), "totals".to_string()],
            regions: "eu,us,au".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Parse the configured market keys.
    pub fn market_types(&self) -> Result<Vec<MarketType>> {
        self.markets
            .iter()
            .map(|key| {
                key.parse::<MarketType>()
                    .with_context(|| format!("Invalid market in [provider].markets: {key}"))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://valuescan.db?mode=rwc".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.provider.market_types()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Assemble the scan engine's settings.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        Ok(EngineConfig {
            sports: self.provider.sports.clone(),
            markets: self.provider.market_types()?,
            scanner: self.scanner.clone(),
            caches: self.caches.clone(),
            schedule: self.schedule.clone(),
            clv: self.clv.clone(),
        })
    }
}
