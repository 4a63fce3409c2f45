// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Indexer configuration, loaded from a TOML file.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy::primitives::Address;
use lending_rewards::{AssetRegistry, SupportedAsset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use url::Url;

pub mod defaults {
    pub const fn catchup_interval_secs() -> u64 {
        12
    }

    pub const fn rpc_timeout_secs() -> u64 {
        30
    }

    pub const fn distribution_offset_secs() -> u64 {
        0
    }

    pub const fn resubscribe_backoff_secs() -> u64 {
        5
    }

    pub const fn genesis_block() -> u64 {
        0
    }

    pub const fn window_size() -> u64 {
        2000
    }

    pub const fn poll_interval_ms() -> u64 {
        // Matches the block polling cadence the pool contracts were originally indexed with.
        750
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("No chains configured")]
    NoChains,

    #[error("Chain {0} is configured more than once")]
    DuplicateChain(u64),

    #[error("Chain {0} has a zero window size")]
    ZeroWindow(u64),

    #[error("Chain {chain_id} lists asset {address} more than once")]
    DuplicateAsset { chain_id: u64, address: Address },

    #[error("Chain {chain_id} lists symbol {symbol} for more than one asset")]
    DuplicateSymbol { chain_id: u64, symbol: String },

    #[error("Distribution offset must be less than one day, got {0}s")]
    BadOffset(u64),
}

/// A supported token entry of a chain.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AssetConfig {
    pub address: Address,
    pub symbol: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: Url,
    /// Lending pool contract emitting the events.
    pub contract_address: Address,
    /// First block scanned when the chain has no recorded state.
    #[serde(default = "defaults::genesis_block")]
    pub genesis_block: u64,
    /// Maximum number of blocks requested per catch-up cycle.
    #[serde(default = "defaults::window_size")]
    pub window_size: u64,
    /// Poll interval of the live log subscription.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

impl ChainConfig {
    pub fn asset_registry(&self) -> AssetRegistry {
        AssetRegistry::new(
            self.assets
                .iter()
                .map(|a| SupportedAsset { address: a.address, symbol: a.symbol.clone() }),
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top level config for the indexer service
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Period of the catch-up scan, per chain.
    #[serde(default = "defaults::catchup_interval_secs")]
    pub catchup_interval_secs: u64,
    /// Bound on every RPC call and every ledger apply.
    #[serde(default = "defaults::rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Seconds after 00:00 UTC at which the daily distribution runs.
    #[serde(default = "defaults::distribution_offset_secs")]
    pub distribution_offset_secs: u64,
    /// Delay before re-creating a failed live subscription.
    #[serde(default = "defaults::resubscribe_backoff_secs")]
    pub resubscribe_backoff_secs: u64,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl Config {
    /// Load and validate the config from disk
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        if self.distribution_offset_secs >= lending_rewards::SECONDS_PER_DAY {
            return Err(ConfigError::BadOffset(self.distribution_offset_secs));
        }

        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.chain_id) {
                return Err(ConfigError::DuplicateChain(chain.chain_id));
            }
            if chain.window_size == 0 {
                return Err(ConfigError::ZeroWindow(chain.chain_id));
            }
            // Rewards are keyed by symbol, so a symbol must name a single token per chain.
            let mut addresses = HashSet::new();
            let mut symbols = HashSet::new();
            for asset in &chain.assets {
                if !addresses.insert(asset.address) {
                    return Err(ConfigError::DuplicateAsset {
                        chain_id: chain.chain_id,
                        address: asset.address,
                    });
                }
                if !symbols.insert(asset.symbol.as_str()) {
                    return Err(ConfigError::DuplicateSymbol {
                        chain_id: chain.chain_id,
                        symbol: asset.symbol.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn catchup_interval(&self) -> Duration {
        Duration::from_secs(self.catchup_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn resubscribe_backoff(&self) -> Duration {
        Duration::from_secs(self.resubscribe_backoff_secs)
    }
}
