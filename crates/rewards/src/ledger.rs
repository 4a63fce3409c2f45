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

//! Position ledger reconstruction.
//!
//! [event_deltas] is the single reducer that turns an event into position changes, and
//! [plan_batch] decides which events of a batch are unseen and in which order they apply.
//! Neither performs I/O; persistence layers execute the resulting [BatchPlan] atomically.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
};

use alloy::primitives::{Address, U256};
use num_bigint::{BigInt, Sign};
use num_traits::Zero;

use crate::{
    assets::AssetRegistry,
    distribution::RewardRecord,
    events::{LendingEvent, NormalizedEvent},
};

/// Convert a wire amount into the signed arbitrary-precision ledger domain.
pub fn to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    Deposits,
    Borrows,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Deposits => "deposits",
            Side::Borrows => "borrows",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposits" => Ok(Side::Deposits),
            "borrows" => Ok(Side::Borrows),
            other => Err(format!("unknown position side {other}")),
        }
    }
}

/// Identifies one position row within a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub wallet: Address,
    pub side: Side,
    pub token: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionDelta {
    pub key: PositionKey,
    pub symbol: String,
    pub amount: BigInt,
}

/// Why an event was recorded without touching the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingToken,
    UnsupportedToken(Address),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingToken => f.write_str("missing token"),
            SkipReason::UnsupportedToken(token) => write!(f, "unsupported token {token:#x}"),
        }
    }
}

fn resolve(assets: &AssetRegistry, token: Address) -> Result<String, SkipReason> {
    if token.is_zero() {
        return Err(SkipReason::MissingToken);
    }
    assets
        .resolve(token)
        .map(|asset| asset.symbol.clone())
        .ok_or(SkipReason::UnsupportedToken(token))
}

/// Position changes caused by a single event.
///
/// Liquidations reduce the liquidated user's debt and collateral; the liquidator is not
/// credited. Any unresolvable token turns the whole event into a no-op.
pub fn event_deltas(
    event: &NormalizedEvent,
    assets: &AssetRegistry,
) -> Result<Vec<PositionDelta>, SkipReason> {
    let wallet = event.user;
    let delta = |side, token, symbol, amount| PositionDelta {
        key: PositionKey { wallet, side, token },
        symbol,
        amount,
    };

    let deltas = match &event.event {
        LendingEvent::Deposited { token, amount } => {
            vec![delta(Side::Deposits, *token, resolve(assets, *token)?, to_bigint(*amount))]
        }
        LendingEvent::Withdrawn { token, amount } => {
            vec![delta(Side::Deposits, *token, resolve(assets, *token)?, -to_bigint(*amount))]
        }
        LendingEvent::Borrowed { token, amount } => {
            vec![delta(Side::Borrows, *token, resolve(assets, *token)?, to_bigint(*amount))]
        }
        LendingEvent::Repaid { token, amount } => {
            vec![delta(Side::Borrows, *token, resolve(assets, *token)?, -to_bigint(*amount))]
        }
        LendingEvent::Liquidated {
            collateral_token, collateral_amount, debt_token, debt_repaid, ..
        } => {
            let debt_symbol = resolve(assets, *debt_token)?;
            let collateral_symbol = resolve(assets, *collateral_token)?;
            vec![
                delta(Side::Borrows, *debt_token, debt_symbol, -to_bigint(*debt_repaid)),
                delta(
                    Side::Deposits,
                    *collateral_token,
                    collateral_symbol,
                    -to_bigint(*collateral_amount),
                ),
            ]
        }
    };

    Ok(deltas)
}

/// Highest recorded (block, nonce) for a chain, plus the catch-up scan cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermark {
    pub last_block: u64,
    /// `None` until the first event of the chain is recorded.
    pub last_nonce: Option<U256>,
    /// Highest block the catch-up scan has fully covered.
    pub scanned_block: Option<u64>,
}

impl Watermark {
    pub fn has_seen(&self, nonce: U256) -> bool {
        self.last_nonce.is_some_and(|last| nonce <= last)
    }
}

#[derive(Debug, Clone)]
pub struct PlannedEvent {
    pub event: NormalizedEvent,
    /// Deltas to apply, or the reason the event only advances the watermark.
    pub effect: Result<Vec<PositionDelta>, SkipReason>,
}

impl PlannedEvent {
    pub fn is_applied(&self) -> bool {
        self.effect.is_ok()
    }
}

/// How a batch reached the ledger, which decides how nonce gaps are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A catch-up scan that covered every block up to `to_block`. A gap inside a scan is real
    /// and is applied over.
    Scan { to_block: u64 },
    /// A live subscription batch. Only the run of nonces directly following the watermark is
    /// applied; anything after a gap is held back until the missing nonces arrive.
    Live,
}

impl Delivery {
    pub fn scanned_block(&self) -> Option<u64> {
        match self {
            Delivery::Scan { to_block } => Some(*to_block),
            Delivery::Live => None,
        }
    }
}

/// Everything a persistence layer needs to commit one batch.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Unseen events in ascending nonce order.
    pub events: Vec<PlannedEvent>,
    /// Events dropped because their nonce was already applied or repeated in the batch.
    pub duplicates: usize,
    /// (expected, actual) for each nonce that skipped ahead of the previous one by more than 1.
    pub gaps: Vec<(U256, U256)>,
    /// Unseen live events that cannot apply yet, in ascending nonce order.
    pub deferred: Vec<NormalizedEvent>,
    /// Watermark after the batch, if any event was accepted.
    pub watermark: Option<Watermark>,
}

impl BatchPlan {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&NormalizedEvent, &SkipReason)> {
        self.events.iter().filter_map(|planned| match &planned.effect {
            Ok(_) => None,
            Err(reason) => Some((&planned.event, reason)),
        })
    }

    /// Net change per position across the batch, with zero-sum entries kept so that the
    /// position row still gets created.
    pub fn net_deltas(&self) -> BTreeMap<PositionKey, PositionDelta> {
        let mut net: BTreeMap<PositionKey, PositionDelta> = BTreeMap::new();
        for delta in self.events.iter().filter_map(|p| p.effect.as_ref().ok()).flatten() {
            net.entry(delta.key)
                .and_modify(|existing| existing.amount += &delta.amount)
                .or_insert_with(|| delta.clone());
        }
        net
    }
}

/// Number of leading events forming the run `first, first + 1, ...`.
fn contiguous_run(events: &[NormalizedEvent], first: Option<U256>) -> usize {
    let Some(mut next) = first else {
        return 0;
    };
    events
        .iter()
        .take_while(|event| {
            let in_run = event.nonce == next;
            next = next.saturating_add(U256::from(1));
            in_run
        })
        .count()
}

/// Select the unseen events of a batch and order them for application.
///
/// Delivery order is irrelevant: events are deduplicated by nonce against the watermark and
/// within the batch, then sorted ascending by nonce. Live batches never move the watermark past
/// a missing nonce, and apply nothing until a scan has recorded the chain's first nonce.
pub fn plan_batch(
    watermark: Option<&Watermark>,
    events: Vec<NormalizedEvent>,
    assets: &AssetRegistry,
    delivery: Delivery,
) -> BatchPlan {
    let total = events.len();
    let mut seen = HashSet::new();
    let mut unseen: Vec<NormalizedEvent> = events
        .into_iter()
        .filter(|e| !watermark.is_some_and(|w| w.has_seen(e.nonce)))
        .filter(|e| seen.insert(e.nonce))
        .collect();
    unseen.sort_by_key(|e| e.nonce);
    let duplicates = total - unseen.len();

    let last_nonce = watermark.and_then(|w| w.last_nonce);
    let deferred = match delivery {
        Delivery::Scan { .. } => Vec::new(),
        Delivery::Live => {
            let first = last_nonce.map(|n| n.saturating_add(U256::from(1)));
            let run = contiguous_run(&unseen, first);
            unseen.split_off(run)
        }
    };

    let mut gaps = Vec::new();
    let mut previous = last_nonce;
    for event in &unseen {
        if let Some(prev) = previous {
            let expected = prev.saturating_add(U256::from(1));
            if event.nonce > expected {
                gaps.push((expected, event.nonce));
            }
        }
        previous = Some(event.nonce);
    }

    let new_watermark = unseen.last().map(|last| Watermark {
        last_block: watermark
            .map(|w| w.last_block.max(last.block_number))
            .unwrap_or(last.block_number),
        last_nonce: Some(last.nonce),
        scanned_block: watermark.and_then(|w| w.scanned_block),
    });

    let events = unseen
        .into_iter()
        .map(|event| {
            let effect = event_deltas(&event, assets);
            PlannedEvent { event, effect }
        })
        .collect();

    BatchPlan { events, duplicates, gaps, deferred, watermark: new_watermark }
}

/// A wallet's position in one (chain, token) market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub symbol: String,
    pub amount: BigInt,
}

/// All positions and rewards of one wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletHolding {
    pub wallet: Address,
    pub deposits: BTreeMap<(u64, Address), Position>,
    pub borrows: BTreeMap<(u64, Address), Position>,
    pub rewards: Vec<RewardRecord>,
}

impl WalletHolding {
    pub fn new(wallet: Address) -> Self {
        Self { wallet, deposits: BTreeMap::new(), borrows: BTreeMap::new(), rewards: Vec::new() }
    }

    pub fn side(&self, side: Side) -> &BTreeMap<(u64, Address), Position> {
        match side {
            Side::Deposits => &self.deposits,
            Side::Borrows => &self.borrows,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<(u64, Address), Position> {
        match side {
            Side::Deposits => &mut self.deposits,
            Side::Borrows => &mut self.borrows,
        }
    }

    /// Amount held on `side` for (chain, token), zero when the position does not exist.
    pub fn amount(&self, side: Side, chain_id: u64, token: Address) -> BigInt {
        self.side(side).get(&(chain_id, token)).map(|p| p.amount.clone()).unwrap_or_default()
    }

    /// Apply deltas belonging to this wallet, creating missing positions at zero first.
    pub fn apply(&mut self, chain_id: u64, deltas: &[PositionDelta]) {
        let wallet = self.wallet;
        for delta in deltas.iter().filter(|d| d.key.wallet == wallet) {
            let position =
                self.side_mut(delta.key.side).entry((chain_id, delta.key.token)).or_insert_with(
                    || Position { symbol: delta.symbol.clone(), amount: BigInt::zero() },
                );
            position.amount += &delta.amount;
        }
    }
}
