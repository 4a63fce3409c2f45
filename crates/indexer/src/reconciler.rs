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

//! The single entry point through which both delivery paths mutate the ledger.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use alloy::primitives::U256;
use lending_rewards::{AssetRegistry, Delivery, NormalizedEvent};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::{BatchOutcome, DbError, DbObj};

/// Upper bound on live events held back per chain. Beyond it the highest nonces are dropped and
/// left for the catch-up scan.
const MAX_PENDING_EVENTS: usize = 10_000;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Chain {0} is not configured")]
    UnknownChain(u64),

    #[error("Ledger apply timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

struct ChainLedger {
    assets: AssetRegistry,
    // Serializes writers of one chain across the catch-up and live paths, and holds the live
    // events waiting for a missing nonce.
    pending: Mutex<BTreeMap<U256, NormalizedEvent>>,
}

#[derive(Clone)]
pub struct Reconciler {
    db: DbObj,
    chains: Arc<HashMap<u64, ChainLedger>>,
    apply_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        db: DbObj,
        chains: impl IntoIterator<Item = (u64, AssetRegistry)>,
        apply_timeout: Duration,
    ) -> Self {
        let chains = chains
            .into_iter()
            .map(|(chain_id, assets)| {
                (chain_id, ChainLedger { assets, pending: Mutex::new(BTreeMap::new()) })
            })
            .collect();
        Self { db, chains: Arc::new(chains), apply_timeout }
    }

    pub fn db(&self) -> &DbObj {
        &self.db
    }

    /// Number of live events of a chain currently held back behind a missing nonce.
    pub async fn pending(&self, chain_id: u64) -> Result<usize, ReconcileError> {
        let chain = self.chains.get(&chain_id).ok_or(ReconcileError::UnknownChain(chain_id))?;
        Ok(chain.pending.lock().await.len())
    }

    /// Apply a batch of events of one chain exactly once, in nonce order.
    ///
    /// Events may arrive in any order and may overlap with earlier batches. Live events that
    /// follow a missing nonce are held back and retried with every later apply of the chain,
    /// so delivery split across batches yields the same ledger as a single batch.
    pub async fn apply(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
        delivery: Delivery,
    ) -> Result<BatchOutcome, ReconcileError> {
        let chain = self.chains.get(&chain_id).ok_or(ReconcileError::UnknownChain(chain_id))?;
        let received = events.len();

        let mut pending = chain.pending.lock().await;
        let outcome = match delivery {
            Delivery::Scan { .. } => {
                let outcome = self.apply_timed(chain_id, chain, events, delivery).await?;
                if !pending.is_empty() {
                    if let Err(e) = self.release_pending(chain_id, chain, &mut pending).await {
                        tracing::warn!(
                            "Chain {} failed to release held back live events: {}",
                            chain_id,
                            e
                        );
                    }
                }
                outcome
            }
            Delivery::Live => {
                let mut queued: Vec<NormalizedEvent> = pending.values().cloned().collect();
                queued.extend(events.iter().cloned());
                match self.apply_timed(chain_id, chain, queued, delivery).await {
                    Ok(outcome) => {
                        Self::hold_back(chain_id, &mut pending, &outcome);
                        outcome
                    }
                    Err(e) => {
                        // Nothing was committed; keep the batch for the next apply.
                        pending.extend(events.into_iter().map(|event| (event.nonce, event)));
                        return Err(e);
                    }
                }
            }
        };

        for (nonce, reason) in &outcome.skipped {
            tracing::warn!(
                "Chain {} event nonce {} recorded without effect: {}",
                chain_id,
                nonce,
                reason
            );
        }
        for (expected, actual) in &outcome.gaps {
            tracing::warn!(
                "Chain {} nonce gap: expected {} but applied {}",
                chain_id,
                expected,
                actual
            );
        }
        if received > 0 {
            tracing::debug!(
                "Chain {}: received {} events, applied {}, skipped {}, duplicates {}, held back {}",
                chain_id,
                received,
                outcome.applied,
                outcome.skipped.len(),
                outcome.duplicates,
                pending.len()
            );
        }

        Ok(outcome)
    }

    async fn apply_timed(
        &self,
        chain_id: u64,
        chain: &ChainLedger,
        events: Vec<NormalizedEvent>,
        delivery: Delivery,
    ) -> Result<BatchOutcome, ReconcileError> {
        tokio::time::timeout(
            self.apply_timeout,
            self.db.apply_batch(chain_id, events, &chain.assets, delivery),
        )
        .await
        .map_err(|_| ReconcileError::Timeout(self.apply_timeout))?
        .map_err(ReconcileError::from)
    }

    /// Retry held back live events after a scan may have filled the nonces they wait for.
    async fn release_pending(
        &self,
        chain_id: u64,
        chain: &ChainLedger,
        pending: &mut BTreeMap<U256, NormalizedEvent>,
    ) -> Result<(), ReconcileError> {
        let queued: Vec<NormalizedEvent> = pending.values().cloned().collect();
        let outcome = self.apply_timed(chain_id, chain, queued, Delivery::Live).await?;
        if outcome.recorded() > 0 {
            tracing::info!(
                "Chain {} released {} held back live events",
                chain_id,
                outcome.recorded()
            );
        }
        Self::hold_back(chain_id, pending, &outcome);
        Ok(())
    }

    fn hold_back(
        chain_id: u64,
        pending: &mut BTreeMap<U256, NormalizedEvent>,
        outcome: &BatchOutcome,
    ) {
        pending.clear();
        pending.extend(outcome.deferred.iter().map(|event| (event.nonce, event.clone())));

        if let Some(first) = outcome.deferred.first() {
            tracing::debug!(
                "Chain {} holding back {} live events from nonce {} until earlier nonces arrive",
                chain_id,
                outcome.deferred.len(),
                first.nonce
            );
        }
        while pending.len() > MAX_PENDING_EVENTS {
            if let Some((nonce, _)) = pending.pop_last() {
                tracing::warn!(
                    "Chain {} dropped held back live event nonce {}, left for catch-up",
                    chain_id,
                    nonce
                );
            }
        }
    }
}
