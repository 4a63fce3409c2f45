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

use std::{collections::HashMap, sync::Arc};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{
    catchup::CatchUp,
    config::Config,
    db::{AnyDb, DbObj},
    distributor::Distributor,
    fetcher::{ChainRpc, ProviderRpc},
    reconciler::Reconciler,
    subscriber::Subscriber,
    ServiceError,
};

/// All long-running tasks of the indexer: per chain a catch-up loop and a live subscription,
/// plus the daily reward distribution.
pub struct IndexerService {
    config: Config,
    db: DbObj,
    rpcs: HashMap<u64, Arc<dyn ChainRpc>>,
}

impl IndexerService {
    pub async fn new(config: Config, db_conn: &str) -> Result<Self, ServiceError> {
        let db: DbObj = Arc::new(AnyDb::new(db_conn).await?);
        let rpcs = config
            .chains
            .iter()
            .map(|chain| {
                let rpc: Arc<dyn ChainRpc> =
                    Arc::new(ProviderRpc::connect_http(chain.rpc_url.clone()));
                (chain.chain_id, rpc)
            })
            .collect();
        Self::from_parts(config, db, rpcs)
    }

    /// Build a service over an existing store and RPC clients.
    pub fn from_parts(
        config: Config,
        db: DbObj,
        rpcs: HashMap<u64, Arc<dyn ChainRpc>>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        if let Some(chain) = config.chains.iter().find(|c| !rpcs.contains_key(&c.chain_id)) {
            return Err(ServiceError::MissingRpc(chain.chain_id));
        }
        Ok(Self { config, db, rpcs })
    }

    pub fn db(&self) -> &DbObj {
        &self.db
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.db.clone(),
            self.config.chains.iter().map(|c| (c.chain_id, c.asset_registry())),
            self.config.rpc_timeout(),
        )
    }

    /// Run every task until `cancel_token` fires and all tasks have wound down.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), ServiceError> {
        tracing::info!("Starting lending indexer for {} chains", self.config.chains.len());
        let reconciler = self.reconciler();
        let mut tasks = JoinSet::new();

        for chain in &self.config.chains {
            let rpc = self
                .rpcs
                .get(&chain.chain_id)
                .cloned()
                .ok_or(ServiceError::MissingRpc(chain.chain_id))?;

            let catch_up = CatchUp::new(
                rpc.clone(),
                chain.clone(),
                reconciler.clone(),
                self.config.rpc_timeout(),
            );
            let caught_up = catch_up.caught_up();
            tasks.spawn(catch_up.run(self.config.catchup_interval(), cancel_token.clone()));

            let subscriber = Subscriber::new(
                rpc,
                chain.clone(),
                reconciler.clone(),
                self.config.rpc_timeout(),
                self.config.resubscribe_backoff(),
            );
            tasks.spawn(subscriber.run(caught_up, cancel_token.clone()));
        }

        let distributor = Distributor::new(self.db.clone(), self.config.rpc_timeout());
        tasks.spawn(distributor.run(self.config.distribution_offset_secs, cancel_token.clone()));

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Indexer task failed: {}", e);
            }
        }

        tracing::info!("Lending indexer stopped");
        Ok(())
    }
}
