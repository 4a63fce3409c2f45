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

//! Pro-rata daily reward distribution over lending positions.
//!
//! All math is floor division on non-negative big integers. Remainders are not redistributed.

use std::{collections::BTreeMap, fmt, str::FromStr};

use alloy::primitives::Address;
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;

use crate::{ledger::Side, SECONDS_PER_DAY};

/// Truncate a unix timestamp to the start of its UTC day.
pub fn day_start(timestamp: u64) -> u64 {
    timestamp - timestamp % SECONDS_PER_DAY
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RewardType {
    Deposit,
    Borrow,
}

impl RewardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardType::Deposit => "deposit",
            RewardType::Borrow => "borrow",
        }
    }

    /// Ledger side whose positions earn this reward.
    pub fn side(&self) -> Side {
        match self {
            RewardType::Deposit => Side::Deposits,
            RewardType::Borrow => Side::Borrows,
        }
    }
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(RewardType::Deposit),
            "borrow" => Ok(RewardType::Borrow),
            other => Err(format!("unknown reward type {other}")),
        }
    }
}

/// A reward epoch for one (chain, asset, side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolReward {
    pub chain_id: u64,
    pub symbol: String,
    pub reward_type: RewardType,
    /// UTC day boundary, unix seconds.
    pub start_date: u64,
    /// UTC day boundary, unix seconds. Inclusive.
    pub end_date: u64,
    pub total_reward: BigUint,
}

impl PoolReward {
    pub fn is_active(&self, day: u64) -> bool {
        self.start_date <= day && day <= self.end_date
    }

    pub fn whole_days(&self) -> u64 {
        self.end_date.saturating_sub(self.start_date) / SECONDS_PER_DAY
    }

    /// Reward released per day, or `None` for an epoch shorter than one whole day.
    pub fn daily_reward(&self) -> Option<BigUint> {
        match self.whole_days() {
            0 => None,
            days => Some(&self.total_reward / BigUint::from(days)),
        }
    }
}

/// One reward credited to a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardRecord {
    pub chain_id: u64,
    pub symbol: String,
    pub reward_type: RewardType,
    pub amount: BigUint,
    /// UTC day the reward was distributed for.
    pub date: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletReward {
    pub wallet: Address,
    pub record: RewardRecord,
}

/// Epochs that pay out on `day`.
///
/// At most one epoch is returned per (chain, symbol, type): when several overlap the one with
/// the earliest start wins and the losers are returned alongside for reporting.
pub fn select_active(
    epochs: impl IntoIterator<Item = PoolReward>,
    day: u64,
) -> (Vec<PoolReward>, Vec<PoolReward>) {
    let mut selected: BTreeMap<(u64, String, RewardType), PoolReward> = BTreeMap::new();
    let mut overlapping = Vec::new();

    for epoch in epochs.into_iter().filter(|e| e.is_active(day)) {
        let key = (epoch.chain_id, epoch.symbol.clone(), epoch.reward_type);
        match selected.remove(&key) {
            None => {
                selected.insert(key, epoch);
            }
            Some(current) => {
                let (winner, loser) = if epoch.start_date < current.start_date {
                    (epoch, current)
                } else {
                    (current, epoch)
                };
                selected.insert(key, winner);
                overlapping.push(loser);
            }
        }
    }

    (selected.into_values().collect(), overlapping)
}

/// Split one day of an epoch across wallets proportionally to their positions.
///
/// Non-positive positions are not parts. Returns nothing when the epoch has no whole day or
/// there are no parts.
pub fn compute_distribution(
    epoch: &PoolReward,
    day: u64,
    parts: &[(Address, BigInt)],
) -> Vec<WalletReward> {
    let Some(daily) = epoch.daily_reward() else {
        tracing::warn!(
            "Epoch for {} {} on chain {} spans less than one day, skipping",
            epoch.symbol,
            epoch.reward_type,
            epoch.chain_id
        );
        return Vec::new();
    };

    let parts: Vec<(Address, BigUint)> = parts
        .iter()
        .filter_map(|(wallet, amount)| {
            amount.to_biguint().filter(|a| !a.is_zero()).map(|a| (*wallet, a))
        })
        .collect();
    let total_parts: BigUint = parts.iter().map(|(_, part)| part).sum();
    if total_parts.is_zero() {
        tracing::debug!(
            "No positive {} positions for {} on chain {}",
            epoch.reward_type.side(),
            epoch.symbol,
            epoch.chain_id
        );
        return Vec::new();
    }

    parts
        .into_iter()
        .map(|(wallet, part)| WalletReward {
            wallet,
            record: RewardRecord {
                chain_id: epoch.chain_id,
                symbol: epoch.symbol.clone(),
                reward_type: epoch.reward_type,
                amount: &daily * part / &total_parts,
                date: day,
            },
        })
        .collect()
}
