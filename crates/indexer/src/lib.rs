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

//! Multi-chain lending position indexer and daily reward distributor.

pub mod catchup;
pub mod config;
pub mod db;
pub mod distributor;
pub mod fetcher;
pub mod reconciler;
pub mod service;
pub mod subscriber;
#[cfg(feature = "test-utils")]
pub mod test_utils;

use thiserror::Error;

pub use catchup::{CatchUp, CatchUpStep};
pub use config::{ChainConfig, Config, ConfigError};
pub use distributor::{DistributionSummary, Distributor};
pub use reconciler::{ReconcileError, Reconciler};
pub use service::IndexerService;
pub use subscriber::Subscriber;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Db(#[from] db::DbError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetcher::FetchError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("No RPC client for chain {0}")]
    MissingRpc(u64),
}
