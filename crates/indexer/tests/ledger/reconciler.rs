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

use alloy::primitives::U256;
use lending_indexer::{
    db::LedgerDb,
    test_utils::{borrowed, deposited, liquidated, withdrawn, Liquidation, TestDb},
    ReconcileError,
};
use lending_rewards::{Delivery, Side, SkipReason};
use num_bigint::BigInt;
use tracing_test::traced_test;

use super::common::*;

#[tokio::test]
async fn test_deposit_and_withdraw_conserve_amounts() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);

    let events = vec![
        event(CHAIN_ID, deposited(ALICE, USDC, 100, 1), 200),
        event(CHAIN_ID, withdrawn(ALICE, USDC, 40, 2), 201),
    ];
    let outcome = reconciler.apply(CHAIN_ID, events, SCAN).await.unwrap();
    assert_eq!(outcome.applied, 2);

    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(60));
    assert_eq!(holding.deposits[&(CHAIN_ID, USDC)].symbol, "USDC");
    assert!(holding.borrows.is_empty());
}

#[tokio::test]
async fn test_liquidation_reduces_debt_and_collateral() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);

    let liquidation = Liquidation {
        liquidator: LIQUIDATOR,
        user: ALICE,
        collateral_token: WETH,
        collateral_amount: 10,
        debt_token: USDC,
        debt_repaid: 30,
    };
    let events = vec![
        event(CHAIN_ID, borrowed(ALICE, USDC, 100, 1), 200),
        event(CHAIN_ID, liquidated(liquidation, 2), 205),
    ];
    reconciler.apply(CHAIN_ID, events, SCAN).await.unwrap();

    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.amount(Side::Borrows, CHAIN_ID, USDC), BigInt::from(70));
    assert_eq!(holding.amount(Side::Deposits, CHAIN_ID, WETH), BigInt::from(-10));

    // The liquidator is recorded on the event only.
    assert!(test_db.db.get_holding(LIQUIDATOR).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delivery_order_within_batch_is_irrelevant() {
    let batch = |order: [u64; 3]| {
        order
            .iter()
            .map(|&nonce| match nonce {
                1 => event(CHAIN_ID, deposited(ALICE, USDC, 50, 1), 200),
                2 => event(CHAIN_ID, withdrawn(ALICE, USDC, 20, 2), 201),
                _ => event(CHAIN_ID, borrowed(ALICE, WETH, 5, 3), 202),
            })
            .collect::<Vec<_>>()
    };

    let shuffled_db = TestDb::new().await;
    reconciler(&shuffled_db).apply(CHAIN_ID, batch([3, 1, 2]), SCAN).await.unwrap();
    let ordered_db = TestDb::new().await;
    reconciler(&ordered_db).apply(CHAIN_ID, batch([1, 2, 3]), SCAN).await.unwrap();

    let shuffled = shuffled_db.db.get_holding(ALICE).await.unwrap().unwrap();
    let ordered = ordered_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(shuffled, ordered);
    assert_eq!(shuffled.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(30));

    let events = shuffled_db.db.get_events(CHAIN_ID, U256::ZERO, 10).await.unwrap();
    let nonces: Vec<u64> = events.iter().map(|e| e.event.nonce.to::<u64>()).collect();
    assert_eq!(nonces, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_reapplying_a_batch_is_a_noop() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);
    let events = vec![
        event(CHAIN_ID, deposited(ALICE, USDC, 100, 1), 200),
        event(CHAIN_ID, borrowed(ALICE, WETH, 3, 2), 200),
    ];

    reconciler.apply(CHAIN_ID, events.clone(), SCAN).await.unwrap();
    let before = test_db.db.get_holding(ALICE).await.unwrap();

    let outcome = reconciler.apply(CHAIN_ID, events, SCAN).await.unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.duplicates, 2);
    assert_eq!(test_db.db.get_holding(ALICE).await.unwrap(), before);
}

#[tokio::test]
async fn test_concurrent_paths_apply_each_nonce_once() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);
    reconciler
        .apply(CHAIN_ID, vec![event(CHAIN_ID, deposited(ALICE, USDC, 1, 1), 150)], SCAN)
        .await
        .unwrap();

    let catch_up = reconciler.clone();
    let live = reconciler.clone();
    let batch = vec![
        event(CHAIN_ID, deposited(ALICE, USDC, 100, 2), 200),
        event(CHAIN_ID, deposited(BOB, USDC, 7, 3), 201),
    ];
    let (a, b) = tokio::join!(
        catch_up.apply(CHAIN_ID, batch.clone(), Delivery::Scan { to_block: 250 }),
        live.apply(CHAIN_ID, batch, Delivery::Live),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.applied + b.applied, 2);
    assert_eq!(a.duplicates + b.duplicates, 2);

    let alice = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    let bob = test_db.db.get_holding(BOB).await.unwrap().unwrap();
    assert_eq!(alice.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(101));
    assert_eq!(bob.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(7));
}

#[tokio::test]
async fn test_live_batches_reordered_across_batches() {
    let deposit = |amount, nonce| event(CHAIN_ID, deposited(ALICE, USDC, amount, nonce), 200);

    let split_db = TestDb::new().await;
    let reconciler = reconciler(&split_db);
    reconciler.apply(CHAIN_ID, vec![deposit(10, 1)], SCAN).await.unwrap();

    let outcome = reconciler.apply(CHAIN_ID, vec![deposit(40, 4)], Delivery::Live).await.unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(outcome.deferred.len(), 1);
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 1);
    let watermark = split_db.db.get_watermark(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(watermark.last_nonce, Some(U256::from(1)));

    let outcome = reconciler
        .apply(CHAIN_ID, vec![deposit(20, 2), deposit(30, 3)], Delivery::Live)
        .await
        .unwrap();
    assert_eq!(outcome.applied, 3);
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 0);

    let single_db = TestDb::new().await;
    let events = vec![deposit(10, 1), deposit(20, 2), deposit(30, 3), deposit(40, 4)];
    crate::common::reconciler(&single_db).apply(CHAIN_ID, events, SCAN).await.unwrap();

    let split = split_db.db.get_holding(ALICE).await.unwrap().unwrap();
    let single = single_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(split.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(100));
    assert_eq!(split, single);
}

#[tokio::test]
async fn test_live_events_wait_for_a_scanned_nonce() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);
    let deposit = |amount, nonce| event(CHAIN_ID, deposited(ALICE, USDC, amount, nonce), 200);

    reconciler.apply(CHAIN_ID, vec![deposit(30, 3)], Delivery::Live).await.unwrap();
    reconciler.apply(CHAIN_ID, vec![deposit(10, 1), deposit(20, 2)], Delivery::Live).await.unwrap();
    assert!(test_db.db.get_holding(ALICE).await.unwrap().is_none());
    assert!(test_db.db.get_watermark(CHAIN_ID).await.unwrap().is_none());
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 3);

    // The scan records the first nonce; held back events then find nothing left to apply.
    let scanned = vec![deposit(10, 1), deposit(20, 2), deposit(30, 3)];
    let outcome = reconciler.apply(CHAIN_ID, scanned, SCAN).await.unwrap();
    assert_eq!(outcome.applied, 3);
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 0);

    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(60));
    let recorded = test_db.db.get_events(CHAIN_ID, U256::ZERO, 10).await.unwrap();
    assert_eq!(recorded.len(), 3);
}

#[tokio::test]
async fn test_scan_releases_held_back_live_events() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);
    let deposit = |amount, nonce, block| {
        event(CHAIN_ID, deposited(ALICE, USDC, amount, nonce), block)
    };
    reconciler.apply(CHAIN_ID, vec![deposit(1, 1, 150)], SCAN).await.unwrap();

    // Nonce 2 was missed by the live subscription.
    reconciler.apply(CHAIN_ID, vec![deposit(3, 3, 220)], Delivery::Live).await.unwrap();
    reconciler
        .apply(CHAIN_ID, vec![deposit(2, 2, 210)], Delivery::Scan { to_block: 215 })
        .await
        .unwrap();

    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 0);
    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(6));
    let watermark = test_db.db.get_watermark(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(watermark.last_nonce, Some(U256::from(3)));
    assert_eq!(watermark.last_block, 220);
    assert_eq!(watermark.scanned_block, Some(1_000));
}

#[tokio::test]
async fn test_unsupported_token_is_recorded_and_advances_watermark() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);

    let events = vec![
        event(CHAIN_ID, deposited(ALICE, UNSUPPORTED, 100, 1), 200),
        event(CHAIN_ID, deposited(ALICE, USDC, 5, 2), 201),
    ];
    let outcome = reconciler.apply(CHAIN_ID, events, SCAN).await.unwrap();
    assert_eq!(outcome.applied, 1);
    assert_eq!(outcome.skipped, vec![(U256::from(1), SkipReason::UnsupportedToken(UNSUPPORTED))]);

    let watermark = test_db.db.get_watermark(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(watermark.last_nonce, Some(U256::from(2)));
    assert_eq!(watermark.last_block, 201);

    let recorded = test_db.db.get_events(CHAIN_ID, U256::ZERO, 10).await.unwrap();
    assert_eq!(recorded.len(), 2);
    assert!(!recorded[0].applied);
    assert!(recorded[0].skip_reason.as_deref().unwrap().contains("unsupported token"));
    assert!(recorded[1].applied);

    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.deposits.len(), 1);
}

#[tokio::test]
async fn test_chains_keep_separate_positions_and_watermarks() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);

    reconciler
        .apply(CHAIN_ID, vec![event(CHAIN_ID, deposited(ALICE, USDC, 10, 1), 200)], SCAN)
        .await
        .unwrap();
    reconciler
        .apply(
            OTHER_CHAIN_ID,
            vec![event(OTHER_CHAIN_ID, deposited(ALICE, USDC, 20, 1), 900)],
            SCAN,
        )
        .await
        .unwrap();

    let holding = test_db.db.get_holding(ALICE).await.unwrap().unwrap();
    assert_eq!(holding.amount(Side::Deposits, CHAIN_ID, USDC), BigInt::from(10));
    assert_eq!(holding.amount(Side::Deposits, OTHER_CHAIN_ID, USDC), BigInt::from(20));

    let other = test_db.db.get_watermark(OTHER_CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(other.last_block, 900);
    assert_eq!(other.last_nonce, Some(U256::from(1)));
}

#[tokio::test]
async fn test_unknown_chain_is_rejected() {
    let test_db = TestDb::new().await;
    let err = reconciler(&test_db).apply(42, vec![], SCAN).await.unwrap_err();
    assert!(matches!(err, ReconcileError::UnknownChain(42)));
}

#[tokio::test]
#[traced_test]
async fn test_nonce_gaps_are_applied_with_warning() {
    let test_db = TestDb::new().await;
    let reconciler = reconciler(&test_db);

    let events = vec![
        event(CHAIN_ID, deposited(ALICE, USDC, 1, 1), 200),
        event(CHAIN_ID, deposited(ALICE, USDC, 1, 5), 201),
    ];
    let outcome = reconciler.apply(CHAIN_ID, events, SCAN).await.unwrap();

    assert_eq!(outcome.applied, 2);
    assert_eq!(outcome.gaps, vec![(U256::from(2), U256::from(5))]);
    assert!(logs_contain("nonce gap"));
}
