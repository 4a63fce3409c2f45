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

use lending_indexer::{
    db::{DbError, LedgerDb},
    test_utils::{borrowed, deposited, DelayedDb, TestDb},
    Distributor,
};
use lending_rewards::{PoolReward, RewardType, SECONDS_PER_DAY};
use num_bigint::BigUint;
use tracing_test::traced_test;

use super::common::*;

const DAY: u64 = 1_700_006_400;

fn epoch(symbol: &str, reward_type: RewardType, start: u64, days: u64, total: u64) -> PoolReward {
    PoolReward {
        chain_id: CHAIN_ID,
        symbol: symbol.into(),
        reward_type,
        start_date: start,
        end_date: start + days * SECONDS_PER_DAY,
        total_reward: BigUint::from(total),
    }
}

async fn seed_positions(test_db: &TestDb) {
    let events = vec![
        event(CHAIN_ID, deposited(ALICE, USDC, 100, 1), 110),
        event(CHAIN_ID, deposited(BOB, USDC, 200, 2), 111),
        event(CHAIN_ID, borrowed(BOB, WETH, 5, 3), 112),
    ];
    reconciler(test_db).apply(CHAIN_ID, events, SCAN).await.unwrap();
}

async fn reward_of(test_db: &TestDb, wallet: alloy::primitives::Address) -> Vec<String> {
    test_db
        .db
        .get_holding(wallet)
        .await
        .unwrap()
        .map(|holding| {
            holding
                .rewards
                .into_iter()
                .map(|r| format!("{} {} {}", r.symbol, r.reward_type, r.amount))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_no_active_epoch_writes_nothing() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db
        .db
        .add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY + SECONDS_PER_DAY, 3, 300))
        .await
        .unwrap();

    let summary =
        Distributor::new(test_db.db.clone(), TIMEOUT).distribute(DAY + 60).await.unwrap();
    assert_eq!(summary.day, DAY);
    assert_eq!(summary.epochs, 0);
    assert_eq!(summary.rewards_written, 0);
}

#[tokio::test]
async fn test_daily_reward_is_split_pro_rata() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db.db.add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY, 3, 300)).await.unwrap();

    let distributor = Distributor::new(test_db.db.clone(), TIMEOUT);
    let summary = distributor.distribute(DAY + 5 * 3_600).await.unwrap();
    assert_eq!(summary.day, DAY);
    assert_eq!(summary.epochs, 1);
    assert_eq!(summary.rewards_written, 2);

    assert_eq!(reward_of(&test_db, ALICE).await, vec!["USDC deposit 33"]);
    assert_eq!(reward_of(&test_db, BOB).await, vec!["USDC deposit 66"]);

    // Running again for the same day changes nothing.
    let again = distributor.distribute(DAY + 20 * 3_600).await.unwrap();
    assert_eq!(again.rewards_written, 0);
    assert_eq!(reward_of(&test_db, ALICE).await.len(), 1);

    // The next day pays out again.
    let next = distributor.distribute(DAY + SECONDS_PER_DAY).await.unwrap();
    assert_eq!(next.rewards_written, 2);
    assert_eq!(reward_of(&test_db, BOB).await.len(), 2);
}

#[tokio::test]
async fn test_epoch_without_positions_writes_nothing() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db.db.add_pool_reward(&epoch("DAI", RewardType::Deposit, DAY, 3, 300)).await.unwrap();

    let summary = Distributor::new(test_db.db.clone(), TIMEOUT).distribute(DAY).await.unwrap();
    assert_eq!(summary.epochs, 0);
    assert_eq!(summary.rewards_written, 0);
}

#[tokio::test]
async fn test_borrow_rewards_use_borrow_positions() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db.db.add_pool_reward(&epoch("WETH", RewardType::Borrow, DAY, 2, 50)).await.unwrap();

    let summary = Distributor::new(test_db.db.clone(), TIMEOUT).distribute(DAY).await.unwrap();
    assert_eq!(summary.rewards_written, 1);
    assert_eq!(reward_of(&test_db, BOB).await, vec!["WETH borrow 25"]);
    assert!(reward_of(&test_db, ALICE).await.is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_overlapping_epochs_pay_earliest_only() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db
        .db
        .add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY - SECONDS_PER_DAY, 3, 300))
        .await
        .unwrap();
    test_db.db.add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY, 3, 3_000)).await.unwrap();

    let summary = Distributor::new(test_db.db.clone(), TIMEOUT).distribute(DAY).await.unwrap();
    assert_eq!(summary.epochs, 1);
    assert_eq!(reward_of(&test_db, ALICE).await, vec!["USDC deposit 33"]);
    assert!(logs_contain("Ignoring overlapping deposit epoch"));
}

#[tokio::test]
#[traced_test]
async fn test_epoch_shorter_than_a_day_is_skipped() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db.db.add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY, 0, 300)).await.unwrap();

    let summary = Distributor::new(test_db.db.clone(), TIMEOUT).distribute(DAY).await.unwrap();
    assert_eq!(summary.rewards_written, 0);
    assert!(logs_contain("spans less than one day"));
}

#[tokio::test]
async fn test_slow_database_times_out() {
    let test_db = TestDb::new().await;
    seed_positions(&test_db).await;
    test_db.db.add_pool_reward(&epoch("USDC", RewardType::Deposit, DAY, 3, 300)).await.unwrap();

    let slow = Arc::new(DelayedDb::new(test_db.db.clone(), Duration::from_millis(200)));
    let err = Distributor::new(slow, Duration::from_millis(20)).distribute(DAY).await.unwrap_err();
    assert!(matches!(err, DbError::Timeout(_)), "unexpected error: {err}");
    assert!(reward_of(&test_db, ALICE).await.is_empty());
}
