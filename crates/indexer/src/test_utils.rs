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

//! Helpers for tests: a throwaway SQLite store, an in-memory chain and event log builders.

use std::{
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use alloy::{
    primitives::{address, Address, LogData, U256},
    rpc::types::{Filter, Log},
    sol_types::SolEvent,
    transports::TransportErrorKind,
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lending_rewards::{
    AssetRegistry, Delivery, ILendingPool, NormalizedEvent, PoolReward, Side, WalletHolding,
    WalletReward, Watermark,
};
use num_bigint::BigInt;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use crate::{
    db::{AnyDb, BatchOutcome, DbError, DbObj, LedgerDb, RecordedEvent},
    fetcher::{ChainRpc, FetchError},
};

/// A migrated SQLite database living in a temp file for as long as this value.
pub struct TestDb {
    pub db: DbObj,
    pub url: String,
    _temp_file: NamedTempFile,
}

impl TestDb {
    pub async fn new() -> Self {
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp path");
        let url = format!("sqlite:{}", db_path);
        let db: DbObj = Arc::new(AnyDb::new(&url).await.expect("Failed to create database"));
        Self { db, url, _temp_file: temp_file }
    }
}

/// A store that sleeps for `delay` before every call to the wrapped one.
pub struct DelayedDb {
    inner: DbObj,
    delay: Duration,
}

impl DelayedDb {
    pub fn new(inner: DbObj, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl LedgerDb for DelayedDb {
    async fn get_watermark(&self, chain_id: u64) -> Result<Option<Watermark>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_watermark(chain_id).await
    }

    async fn set_scanned_block(&self, chain_id: u64, block: u64) -> Result<(), DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_scanned_block(chain_id, block).await
    }

    async fn apply_batch(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
        assets: &AssetRegistry,
        delivery: Delivery,
    ) -> Result<BatchOutcome, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.apply_batch(chain_id, events, assets, delivery).await
    }

    async fn get_holding(&self, wallet: Address) -> Result<Option<WalletHolding>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_holding(wallet).await
    }

    async fn get_qualifying_positions(
        &self,
        chain_id: u64,
        side: Side,
        symbol: &str,
    ) -> Result<Vec<(Address, BigInt)>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_qualifying_positions(chain_id, side, symbol).await
    }

    async fn append_rewards(&self, rewards: &[WalletReward]) -> Result<u64, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.append_rewards(rewards).await
    }

    async fn get_events(
        &self,
        chain_id: u64,
        from_nonce: U256,
        limit: u64,
    ) -> Result<Vec<RecordedEvent>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_events(chain_id, from_nonce, limit).await
    }

    async fn add_pool_reward(&self, epoch: &PoolReward) -> Result<(), DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.add_pool_reward(epoch).await
    }

    async fn get_active_pool_rewards(&self, day: u64) -> Result<Vec<PoolReward>, DbError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_active_pool_rewards(day).await
    }
}

/// An in-memory chain serving `get_logs` from a fixed log set and live batches from a channel.
pub struct MockRpc {
    head: AtomicU64,
    logs: Mutex<Vec<Log>>,
    failures: AtomicUsize,
    requested: Mutex<Vec<(u64, u64)>>,
    live: Mutex<Option<mpsc::UnboundedReceiver<Vec<Log>>>>,
}

impl MockRpc {
    pub fn new(head: u64, logs: Vec<Log>) -> Self {
        Self {
            head: AtomicU64::new(head),
            logs: Mutex::new(logs),
            failures: AtomicUsize::new(0),
            requested: Mutex::new(Vec::new()),
            live: Mutex::new(None),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn push_logs(&self, logs: impl IntoIterator<Item = Log>) {
        self.logs.lock().unwrap().extend(logs);
    }

    /// Make the next `count` RPC calls fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Block ranges requested through `get_logs`, in call order.
    pub fn requested_ranges(&self) -> Vec<(u64, u64)> {
        self.requested.lock().unwrap().clone()
    }

    /// Sender feeding the next live subscription.
    pub fn live_sender(&self) -> mpsc::UnboundedSender<Vec<Log>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.live.lock().unwrap() = Some(rx);
        tx
    }

    fn check_failure(&self) -> Result<(), FetchError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportErrorKind::custom_str("injected RPC failure").into());
        }
        Ok(())
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn block_number(&self) -> Result<u64, FetchError> {
        self.check_failure()?;
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError> {
        self.check_failure()?;
        let from = filter.get_from_block().unwrap_or_default();
        let to = filter.get_to_block().unwrap_or(u64::MAX);
        self.requested.lock().unwrap().push((from, to));

        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| log.block_number.is_some_and(|b| from <= b && b <= to))
            .cloned()
            .collect())
    }

    async fn watch(
        &self,
        _filter: &Filter,
        _poll_interval: Duration,
    ) -> Result<BoxStream<'static, Vec<Log>>, FetchError> {
        self.check_failure()?;
        let rx = self
            .live
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FetchError::from(TransportErrorKind::custom_str("no live feed")))?;
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|batch| (batch, rx))
        })
        .boxed())
    }
}

pub const POOL: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");

/// Wrap encoded event data as a mined log of the test pool.
pub fn rpc_log(data: LogData, block: u64, index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log { address: POOL, data },
        block_number: Some(block),
        log_index: Some(index),
        ..Default::default()
    }
}

pub fn deposited(user: Address, token: Address, amount: u64, nonce: u64) -> LogData {
    ILendingPool::Deposited {
        user,
        token,
        amount: U256::from(amount),
        nonce: U256::from(nonce),
    }
    .encode_log_data()
}

pub fn withdrawn(user: Address, token: Address, amount: u64, nonce: u64) -> LogData {
    ILendingPool::Withdrawn {
        user,
        token,
        amount: U256::from(amount),
        nonce: U256::from(nonce),
    }
    .encode_log_data()
}

pub fn borrowed(user: Address, token: Address, amount: u64, nonce: u64) -> LogData {
    ILendingPool::Borrowed {
        user,
        token,
        amount: U256::from(amount),
        nonce: U256::from(nonce),
    }
    .encode_log_data()
}

pub fn repaid(user: Address, token: Address, amount: u64, nonce: u64) -> LogData {
    ILendingPool::Repaid { user, token, amount: U256::from(amount), nonce: U256::from(nonce) }
        .encode_log_data()
}

pub struct Liquidation {
    pub liquidator: Address,
    pub user: Address,
    pub collateral_token: Address,
    pub collateral_amount: u64,
    pub debt_token: Address,
    pub debt_repaid: u64,
}

pub fn liquidated(liquidation: Liquidation, nonce: u64) -> LogData {
    ILendingPool::Liquidated {
        liquidator: liquidation.liquidator,
        user: liquidation.user,
        collateralToken: liquidation.collateral_token,
        collateralAmount: U256::from(liquidation.collateral_amount),
        debtToken: liquidation.debt_token,
        debtRepaid: U256::from(liquidation.debt_repaid),
        nonce: U256::from(nonce),
    }
    .encode_log_data()
}
