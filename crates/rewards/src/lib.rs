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

//! Lending position reconstruction and reward distribution logic.
//!
//! Nothing in this crate performs I/O. The indexer feeds it decoded logs and persists what it
//! plans.

pub mod assets;
pub mod distribution;
pub mod events;
pub mod ledger;

pub use assets::{AssetRegistry, SupportedAsset};

pub use distribution::{
    compute_distribution, day_start, select_active, PoolReward, RewardRecord, RewardType,
    WalletReward,
};

pub use events::{
    event_signatures, normalize_log, sort_by_position, EventKind, ILendingPool, LendingEvent,
    NonceOrderError, NormalizeError, NormalizedEvent,
};

pub use ledger::{
    event_deltas, plan_batch, to_bigint, BatchPlan, Delivery, PlannedEvent, Position,
    PositionDelta, PositionKey, Side, SkipReason, WalletHolding, Watermark,
};

/// Length of a reward day in seconds.
pub const SECONDS_PER_DAY: u64 = 86_400;
