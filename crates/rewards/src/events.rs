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

//! Lending pool event definitions and log normalization.
//!
//! Both the catch-up scan and the live subscription decode raw logs through
//! [normalize_log], so the two delivery paths always agree on what an event means.

use std::fmt;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use thiserror::Error;

alloy::sol! {
    #[sol(all_derives)]
    interface ILendingPool {
        event Deposited(address indexed user, address indexed token, uint256 amount, uint256 nonce);
        event Withdrawn(address indexed user, address indexed token, uint256 amount, uint256 nonce);
        event Borrowed(address indexed user, address indexed token, uint256 amount, uint256 nonce);
        event Repaid(address indexed user, address indexed token, uint256 amount, uint256 nonce);
        event Liquidated(
            address indexed liquidator,
            address indexed user,
            address indexed collateralToken,
            uint256 collateralAmount,
            address debtToken,
            uint256 debtRepaid,
            uint256 nonce
        );
    }
}

/// Topic0 hashes of every event the indexer consumes.
pub fn event_signatures() -> Vec<B256> {
    vec![
        ILendingPool::Deposited::SIGNATURE_HASH,
        ILendingPool::Withdrawn::SIGNATURE_HASH,
        ILendingPool::Borrowed::SIGNATURE_HASH,
        ILendingPool::Repaid::SIGNATURE_HASH,
        ILendingPool::Liquidated::SIGNATURE_HASH,
    ]
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("log has no topic0")]
    MissingTopic,

    #[error("log is missing required field {0}")]
    MissingField(&'static str),

    #[error("unrecognized event signature {0}")]
    UnknownSignature(B256),

    #[error("failed to decode {kind} log: {source}")]
    Decode {
        kind: EventKind,
        #[source]
        source: alloy::sol_types::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("log order disagrees with nonce order: nonce {next} at block {block} log {log_index} follows nonce {previous}")]
pub struct NonceOrderError {
    pub previous: U256,
    pub next: U256,
    pub block: u64,
    pub log_index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Deposited,
    Withdrawn,
    Borrowed,
    Repaid,
    Liquidated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deposited => "Deposited",
            EventKind::Withdrawn => "Withdrawn",
            EventKind::Borrowed => "Borrowed",
            EventKind::Repaid => "Repaid",
            EventKind::Liquidated => "Liquidated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Deposited" => Ok(EventKind::Deposited),
            "Withdrawn" => Ok(EventKind::Withdrawn),
            "Borrowed" => Ok(EventKind::Borrowed),
            "Repaid" => Ok(EventKind::Repaid),
            "Liquidated" => Ok(EventKind::Liquidated),
            other => Err(format!("unknown event kind {other}")),
        }
    }
}

/// Decoded payload of a lending pool event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LendingEvent {
    Deposited { token: Address, amount: U256 },
    Withdrawn { token: Address, amount: U256 },
    Borrowed { token: Address, amount: U256 },
    Repaid { token: Address, amount: U256 },
    Liquidated {
        /// Recorded for audit only; the liquidator's own positions are never credited.
        liquidator: Address,
        collateral_token: Address,
        collateral_amount: U256,
        debt_token: Address,
        debt_repaid: U256,
    },
}

impl LendingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            LendingEvent::Deposited { .. } => EventKind::Deposited,
            LendingEvent::Withdrawn { .. } => EventKind::Withdrawn,
            LendingEvent::Borrowed { .. } => EventKind::Borrowed,
            LendingEvent::Repaid { .. } => EventKind::Repaid,
            LendingEvent::Liquidated { .. } => EventKind::Liquidated,
        }
    }
}

/// A lending pool event tagged with its chain and on-chain position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub chain_id: u64,
    pub user: Address,
    /// Per-chain sequence number shared by all event kinds.
    pub nonce: U256,
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: Option<B256>,
    pub event: LendingEvent,
}

impl NormalizedEvent {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

fn decode<E: SolEvent>(log: &Log, kind: EventKind) -> Result<E, NormalizeError> {
    log.log_decode::<E>()
        .map(|decoded| decoded.inner.data)
        .map_err(|source| NormalizeError::Decode { kind, source })
}

/// Decode a raw RPC log into a [NormalizedEvent].
pub fn normalize_log(chain_id: u64, log: &Log) -> Result<NormalizedEvent, NormalizeError> {
    let topic0 = *log.topic0().ok_or(NormalizeError::MissingTopic)?;
    let block_number = log.block_number.ok_or(NormalizeError::MissingField("blockNumber"))?;
    let log_index = log.log_index.ok_or(NormalizeError::MissingField("logIndex"))?;

    let (user, nonce, event) = if topic0 == ILendingPool::Deposited::SIGNATURE_HASH {
        let e: ILendingPool::Deposited = decode(log, EventKind::Deposited)?;
        (e.user, e.nonce, LendingEvent::Deposited { token: e.token, amount: e.amount })
    } else if topic0 == ILendingPool::Withdrawn::SIGNATURE_HASH {
        let e: ILendingPool::Withdrawn = decode(log, EventKind::Withdrawn)?;
        (e.user, e.nonce, LendingEvent::Withdrawn { token: e.token, amount: e.amount })
    } else if topic0 == ILendingPool::Borrowed::SIGNATURE_HASH {
        let e: ILendingPool::Borrowed = decode(log, EventKind::Borrowed)?;
        (e.user, e.nonce, LendingEvent::Borrowed { token: e.token, amount: e.amount })
    } else if topic0 == ILendingPool::Repaid::SIGNATURE_HASH {
        let e: ILendingPool::Repaid = decode(log, EventKind::Repaid)?;
        (e.user, e.nonce, LendingEvent::Repaid { token: e.token, amount: e.amount })
    } else if topic0 == ILendingPool::Liquidated::SIGNATURE_HASH {
        let e: ILendingPool::Liquidated = decode(log, EventKind::Liquidated)?;
        (
            e.user,
            e.nonce,
            LendingEvent::Liquidated {
                liquidator: e.liquidator,
                collateral_token: e.collateralToken,
                collateral_amount: e.collateralAmount,
                debt_token: e.debtToken,
                debt_repaid: e.debtRepaid,
            },
        )
    } else {
        return Err(NormalizeError::UnknownSignature(topic0));
    };

    Ok(NormalizedEvent {
        chain_id,
        user,
        nonce,
        block_number,
        log_index,
        tx_hash: log.transaction_hash,
        event,
    })
}

/// Sort events by (block number, log index) and verify the result is also nonce order.
///
/// A fetched window must never be applied in an order that disagrees with the nonce sequence.
pub fn sort_by_position(
    mut events: Vec<NormalizedEvent>,
) -> Result<Vec<NormalizedEvent>, NonceOrderError> {
    events.sort_by_key(|e| (e.block_number, e.log_index));

    for pair in events.windows(2) {
        if pair[1].nonce <= pair[0].nonce {
            return Err(NonceOrderError {
                previous: pair[0].nonce,
                next: pair[1].nonce,
                block: pair[1].block_number,
                log_index: pair[1].log_index,
            });
        }
    }

    Ok(events)
}
