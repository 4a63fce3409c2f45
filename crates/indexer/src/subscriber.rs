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

//! Live path: a long-lived polling log subscription per chain.

use std::{sync::Arc, time::Duration};

use alloy::rpc::types::Log;
use futures_util::{Stream, StreamExt};
use lending_rewards::{normalize_log, Delivery};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ChainConfig,
    db::BatchOutcome,
    fetcher::{events_filter, with_timeout, ChainRpc, FetchError},
    reconciler::Reconciler,
    ServiceError,
};

pub struct Subscriber {
    rpc: Arc<dyn ChainRpc>,
    chain: ChainConfig,
    reconciler: Reconciler,
    rpc_timeout: Duration,
    backoff: Duration,
}

impl Subscriber {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        chain: ChainConfig,
        reconciler: Reconciler,
        rpc_timeout: Duration,
        backoff: Duration,
    ) -> Self {
        Self { rpc, chain, reconciler, rpc_timeout, backoff }
    }

    /// Normalize one delivered batch and apply it.
    ///
    /// A batch containing an undecodable log is dropped whole, so the live path never moves
    /// the nonce watermark past an event it could not read. The catch-up scan reports it.
    /// Events after a missing nonce are held back by the reconciler rather than applied.
    pub async fn handle_batch(&self, logs: Vec<Log>) -> Result<BatchOutcome, ServiceError> {
        let chain_id = self.chain.chain_id;
        let events = logs
            .iter()
            .map(|log| normalize_log(chain_id, log))
            .collect::<Result<Vec<_>, _>>()
            .map_err(FetchError::from)?;

        Ok(self.reconciler.apply(chain_id, events, Delivery::Live).await?)
    }

    /// Apply batches from `stream` until it ends or `cancel_token` fires.
    ///
    /// Cancellation only interrupts the wait for the next batch; a batch already received is
    /// applied to completion. Returns the number of batches handled.
    pub async fn consume<S>(&self, mut stream: S, cancel_token: &CancellationToken) -> usize
    where
        S: Stream<Item = Vec<Log>> + Unpin,
    {
        let chain_id = self.chain.chain_id;
        let mut handled = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return handled,
                next = stream.next() => next,
            };
            let Some(logs) = next else {
                tracing::warn!("Live subscription for chain {} ended", chain_id);
                return handled;
            };
            if logs.is_empty() {
                continue;
            }

            if let Err(e) = self.handle_batch(logs).await {
                tracing::error!("Failed to apply live batch for chain {}: {}", chain_id, e);
            }
            handled += 1;
        }
    }

    /// Wait until the catch-up scan reaches the chain head, then follow new logs until
    /// cancelled, re-subscribing after a fixed backoff whenever the subscription fails.
    pub async fn run(self, mut caught_up: watch::Receiver<bool>, cancel_token: CancellationToken) {
        let chain_id = self.chain.chain_id;

        tokio::select! {
            ready = caught_up.wait_for(|caught_up| *caught_up) => {
                if ready.is_err() {
                    tracing::warn!("Catch-up for chain {} stopped before reaching head", chain_id);
                    return;
                }
            }
            _ = cancel_token.cancelled() => return,
        }

        let filter = events_filter(self.chain.contract_address);
        let poll_interval = self.chain.poll_interval();

        loop {
            tracing::info!("Subscribing to chain {} logs every {:?}", chain_id, poll_interval);
            let watch = with_timeout(self.rpc_timeout, self.rpc.watch(&filter, poll_interval));
            let subscribed = tokio::select! {
                subscribed = watch => subscribed,
                _ = cancel_token.cancelled() => break,
            };

            match subscribed {
                Ok(stream) => {
                    self.consume(stream, &cancel_token).await;
                }
                Err(e) => {
                    tracing::warn!("Failed to subscribe to chain {}: {}", chain_id, e);
                }
            }

            if cancel_token.is_cancelled() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.backoff) => {}
                _ = cancel_token.cancelled() => break,
            }
        }

        tracing::info!("Live subscription for chain {} shutting down", chain_id);
    }
}
