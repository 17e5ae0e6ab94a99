use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DATA_DIR_KEY: &str = "MARKET_DATA_DIR";
const GENERATOR_KEY: &str = "MARKET_GENERATOR";
const LOG_LEVEL_KEY: &str = "MARKET_LOG_LEVEL";

static DEFAULT_DATA_DIR: &str = "market_data";
static DEFAULT_WALLET_FILE: &str = "wallet.dat";
const DEFAULT_HASH_RATE_SAMPLE: u64 = 100_000;

/// Everything a node needs to start. Built once in `main` and handed to
/// whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    /// Account credited with transfers that leave `to` empty
    pub generator: String,
    /// Start mining as soon as the node opens
    pub generate: bool,
    /// Nonces hashed when measuring the local hash rate
    pub hash_rate_sample: u64,
    pub log_level: String,
    pub wallet_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            generator: String::new(),
            generate: false,
            hash_rate_sample: DEFAULT_HASH_RATE_SAMPLE,
            log_level: "info".to_string(),
            wallet_file: PathBuf::from(DEFAULT_WALLET_FILE),
        }
    }
}

impl NodeConfig {
    /// Reads the optional TOML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<NodeConfig> {
        let mut config = match path {
            Some(path) => NodeConfig::from_file(path)?,
            None => NodeConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<NodeConfig> {
        let text = fs::read_to_string(path).map_err(|e| {
            ChainError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        NodeConfig::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<NodeConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(generator) = env::var(GENERATOR_KEY) {
            self.generator = generator;
        }
        if let Ok(level) = env::var(LOG_LEVEL_KEY) {
            self.log_level = level;
        }
    }

    /// A config rooted at `dir`, for tests and one-off tools.
    pub fn for_data_dir(dir: impl Into<PathBuf>) -> NodeConfig {
        NodeConfig {
            data_dir: dir.into(),
            ..NodeConfig::default()
        }
    }

    pub fn index_db_path(&self) -> PathBuf {
        self.data_dir.join("index_db")
    }

    pub fn state_log_path(&self) -> PathBuf {
        self.data_dir.join("state.log")
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("blockchain")
    }

    pub fn level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            generator = "alice"
            generate = true
            "#,
        )
        .unwrap();
        assert_eq!(config.generator, "alice");
        assert!(config.generate);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.hash_rate_sample, DEFAULT_HASH_RATE_SAMPLE);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        assert!(matches!(
            NodeConfig::from_toml("generate = \"often\""),
            Err(ChainError::Config(_))
        ));
    }

    #[test]
    fn test_paths_live_under_data_dir() {
        let config = NodeConfig::for_data_dir("/tmp/node");
        assert_eq!(config.state_log_path(), PathBuf::from("/tmp/node/state.log"));
        assert_eq!(config.chain_path(), PathBuf::from("/tmp/node/blockchain"));
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
    }
}
