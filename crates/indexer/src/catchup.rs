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

use std::{sync::Arc, time::Duration};

use lending_rewards::Delivery;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ChainConfig,
    db::{with_db_timeout, BatchOutcome},
    fetcher::{fetch_window, ChainRpc, FetchOutcome},
    reconciler::Reconciler,
    ServiceError,
};

/// What one catch-up cycle did.
#[derive(Debug)]
pub enum CatchUpStep {
    /// Nothing left to scan up to `head`.
    CaughtUp { head: u64 },
    Scanned { from_block: u64, to_block: u64, head: u64, outcome: BatchOutcome },
}

/// Periodic scan of one chain that fills in anything the live path missed.
pub struct CatchUp {
    rpc: Arc<dyn ChainRpc>,
    chain: ChainConfig,
    reconciler: Reconciler,
    rpc_timeout: Duration,
    caught_up: watch::Sender<bool>,
}

impl CatchUp {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        chain: ChainConfig,
        reconciler: Reconciler,
        rpc_timeout: Duration,
    ) -> Self {
        let (caught_up, _) = watch::channel(false);
        Self { rpc, chain, reconciler, rpc_timeout, caught_up }
    }

    /// Flips to `true` the first time a scan reaches the chain head.
    pub fn caught_up(&self) -> watch::Receiver<bool> {
        self.caught_up.subscribe()
    }

    /// Scan and apply at most one window.
    ///
    /// Failures leave the watermark untouched; the same window is requested again next cycle.
    pub async fn step(&self) -> Result<CatchUpStep, ServiceError> {
        let chain_id = self.chain.chain_id;
        let watermark = with_db_timeout(
            self.rpc_timeout,
            self.reconciler.db().get_watermark(chain_id),
        )
        .await?;

        let fetched =
            fetch_window(self.rpc.as_ref(), &self.chain, watermark.as_ref(), self.rpc_timeout)
                .await?;
        let window = match fetched {
            FetchOutcome::CaughtUp { head } => {
                self.caught_up.send_replace(true);
                return Ok(CatchUpStep::CaughtUp { head });
            }
            FetchOutcome::Window(window) => window,
        };

        let reaches_head = window.reaches_head();
        let delivery = Delivery::Scan { to_block: window.to_block };
        let outcome = self.reconciler.apply(chain_id, window.events, delivery).await?;
        if outcome.recorded() > 0 {
            tracing::info!(
                "Chain {} catch-up recorded {} events in blocks {}..={}",
                chain_id,
                outcome.recorded(),
                window.from_block,
                window.to_block
            );
        }
        if reaches_head {
            self.caught_up.send_replace(true);
        }

        Ok(CatchUpStep::Scanned {
            from_block: window.from_block,
            to_block: window.to_block,
            head: window.head,
            outcome,
        })
    }

    pub async fn run(self, interval: Duration, cancel_token: CancellationToken) {
        let chain_id = self.chain.chain_id;
        tracing::info!("Starting catch-up for chain {} every {:?}", chain_id, interval);

        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.step().await {
                        tracing::warn!(
                            "Catch-up for chain {} failed, retrying next cycle: {}",
                            chain_id,
                            e
                        );
                    }
                }
                _ = cancel_token.cancelled() => {
                    tracing::info!("Catch-up for chain {} shutting down", chain_id);
                    break;
                }
            }
        }
    }
}
