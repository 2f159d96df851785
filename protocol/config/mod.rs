// Bridge Configuration - Execution parameters and logging setup
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use super::router::{ChainId, ExecutionConfig};

pub const DEFAULT_SLIPPAGE_BP: u16 = 50;
pub const DEFAULT_RECEIVE_GAS: u128 = 200_000;
pub const DEFAULT_COMPOSE_GAS: u128 = 500_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            ansi: true,
        }
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.level)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub chain_id: ChainId,
    #[serde(default = "default_slippage_bp")]
    pub slippage_bp: u16,
    #[serde(default = "default_receive_gas")]
    pub receive_gas: u128,
    #[serde(default)]
    pub receive_value: u128,
    #[serde(default = "default_compose_gas")]
    pub compose_gas: u128,
    #[serde(default)]
    pub compose_value: u128,
    #[serde(default)]
    pub ordered_execution: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_slippage_bp() -> u16 {
    DEFAULT_SLIPPAGE_BP
}

fn default_receive_gas() -> u128 {
    DEFAULT_RECEIVE_GAS
}

fn default_compose_gas() -> u128 {
    DEFAULT_COMPOSE_GAS
}

impl BridgeConfig {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            slippage_bp: DEFAULT_SLIPPAGE_BP,
            receive_gas: DEFAULT_RECEIVE_GAS,
            receive_value: 0,
            compose_gas: DEFAULT_COMPOSE_GAS,
            compose_value: 0,
            ordered_execution: false,
            logging: LoggingConfig::default(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: BridgeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution().validate()?;
        self.logging.level()?;
        Ok(())
    }

    pub fn execution(&self) -> ExecutionConfig {
        ExecutionConfig {
            slippage_bp: self.slippage_bp,
            receive_gas: self.receive_gas,
            receive_value: self.receive_value,
            compose_gas: self.compose_gas,
            compose_value: self.compose_value,
            ordered_execution: self.ordered_execution,
        }
    }
}

/// Install the global fmt subscriber. Returns `Ok(false)` if one is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let level = config.level()?;
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(config.ansi)
        .with_target(false)
        .try_init()
        .is_ok();
    Ok(installed)
}
