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

use std::time::Duration;

use chrono::Utc;
use lending_rewards::{compute_distribution, day_start, select_active, SECONDS_PER_DAY};
use tokio_util::sync::CancellationToken;

use crate::db::{with_db_timeout, DbError, DbObj};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionSummary {
    pub day: u64,
    /// Epochs that paid out.
    pub epochs: usize,
    /// Reward rows newly written. Rows already present for the day are not counted.
    pub rewards_written: u64,
}

/// Unix seconds of the next daily run strictly after `now`.
pub fn next_run(now: u64, offset_secs: u64) -> u64 {
    let candidate = day_start(now) + offset_secs;
    if candidate > now {
        candidate
    } else {
        candidate + SECONDS_PER_DAY
    }
}

pub struct Distributor {
    db: DbObj,
    db_timeout: Duration,
}

impl Distributor {
    /// Every store call is bounded by `db_timeout`; a timed out run is retried the next day or
    /// by re-running the same day.
    pub fn new(db: DbObj, db_timeout: Duration) -> Self {
        Self { db, db_timeout }
    }

    /// Distribute one day of every active epoch over current positions.
    pub async fn distribute(&self, now: u64) -> Result<DistributionSummary, DbError> {
        let day = day_start(now);
        let mut summary = DistributionSummary { day, ..Default::default() };

        let epochs =
            with_db_timeout(self.db_timeout, self.db.get_active_pool_rewards(day)).await?;
        if epochs.is_empty() {
            tracing::debug!("No active reward epochs on day {}", day);
            return Ok(summary);
        }

        let (active, overlapping) = select_active(epochs, day);
        for epoch in &overlapping {
            tracing::warn!(
                "Ignoring overlapping {} epoch for {} on chain {} starting at {}",
                epoch.reward_type,
                epoch.symbol,
                epoch.chain_id,
                epoch.start_date
            );
        }

        let mut rewards = Vec::new();
        for epoch in &active {
            let parts = with_db_timeout(
                self.db_timeout,
                self.db.get_qualifying_positions(
                    epoch.chain_id,
                    epoch.reward_type.side(),
                    &epoch.symbol,
                ),
            )
            .await?;
            let allocated = compute_distribution(epoch, day, &parts);
            if !allocated.is_empty() {
                summary.epochs += 1;
            }
            rewards.extend(allocated);
        }

        if rewards.is_empty() {
            tracing::debug!("Nothing to distribute on day {}", day);
            return Ok(summary);
        }

        summary.rewards_written =
            with_db_timeout(self.db_timeout, self.db.append_rewards(&rewards)).await?;
        tracing::info!(
            "Distributed {} rewards across {} epochs for day {}",
            summary.rewards_written,
            summary.epochs,
            day
        );

        Ok(summary)
    }

    /// Run [Self::distribute] once a day at 00:00 UTC plus `offset_secs` until cancelled.
    pub async fn run(self, offset_secs: u64, cancel_token: CancellationToken) {
        tracing::info!("Starting daily reward distribution at +{}s UTC", offset_secs);

        loop {
            let now = Utc::now().timestamp().max(0) as u64;
            let wait = Duration::from_secs(next_run(now, offset_secs) - now);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel_token.cancelled() => {
                    tracing::info!("Reward distribution shutting down");
                    break;
                }
            }

            let now = Utc::now().timestamp().max(0) as u64;
            if let Err(e) = self.distribute(now).await {
                tracing::error!("Daily reward distribution failed: {}", e);
            }
        }
    }
}
