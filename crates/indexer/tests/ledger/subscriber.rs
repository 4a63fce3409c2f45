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

use alloy::{
    primitives::{Bytes, LogData, B256, U256},
    rpc::types::Log,
};
use lending_indexer::{
    db::LedgerDb,
    test_utils::{deposited, rpc_log, withdrawn, DelayedDb, MockRpc, TestDb},
    Subscriber,
};
use futures_util::StreamExt;
use lending_rewards::{normalize_log, Delivery, Side};
use num_bigint::BigInt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::common::*;

const BACKOFF: Duration = Duration::from_millis(10);

fn subscriber(test_db: &TestDb, rpc: Arc<MockRpc>) -> Subscriber {
    Subscriber::new(rpc, chain_config(CHAIN_ID, 1000), reconciler(test_db), TIMEOUT, BACKOFF)
}

/// Record nonce 1 the way catch-up would, so live batches from nonce 2 on are contiguous.
async fn seed_first_nonce(test_db: &TestDb) {
    let first = normalize_log(CHAIN_ID, &rpc_log(deposited(BOB, USDC, 1, 1), 150, 0)).unwrap();
    let delivery = Delivery::Scan { to_block: 150 };
    reconciler(test_db).apply(CHAIN_ID, vec![first], delivery).await.unwrap();
}

async fn alice_usdc(test_db: &TestDb) -> Option<BigInt> {
    test_db
        .db
        .get_holding(ALICE)
        .await
        .unwrap()
        .map(|holding| holding.amount(Side::Deposits, CHAIN_ID, USDC))
}

async fn wait_for_alice_usdc(test_db: &TestDb, expected: i64) {
    tokio::time::timeout(TIMEOUT, async {
        while alice_usdc(test_db).await != Some(BigInt::from(expected)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("position never reached the expected amount");
}

#[tokio::test]
async fn test_consume_applies_batches_until_stream_ends() {
    let test_db = TestDb::new().await;
    seed_first_nonce(&test_db).await;
    let subscriber = subscriber(&test_db, Arc::new(MockRpc::new(0, vec![])));

    let batches = vec![
        vec![rpc_log(deposited(ALICE, USDC, 100, 2), 200, 0)],
        vec![],
        vec![
            rpc_log(withdrawn(ALICE, USDC, 30, 3), 201, 0),
            rpc_log(deposited(ALICE, USDC, 5, 4), 201, 1),
        ],
    ];
    let handled =
        subscriber.consume(futures_util::stream::iter(batches), &CancellationToken::new()).await;

    assert_eq!(handled, 2);
    assert_eq!(alice_usdc(&test_db).await, Some(BigInt::from(75)));
    let watermark = test_db.db.get_watermark(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(watermark.last_block, 201);
    assert_eq!(watermark.last_nonce, Some(U256::from(4)));
    assert_eq!(watermark.scanned_block, Some(150));
}

#[tokio::test]
async fn test_batch_with_undecodable_log_is_dropped() {
    let test_db = TestDb::new().await;
    let subscriber = subscriber(&test_db, Arc::new(MockRpc::new(0, vec![])));

    let garbage = LogData::new_unchecked(vec![B256::repeat_byte(0x42)], Bytes::new());
    let batch =
        vec![rpc_log(deposited(ALICE, USDC, 100, 1), 200, 0), rpc_log(garbage, 200, 1)];

    assert!(subscriber.handle_batch(batch).await.is_err());
    assert_eq!(alice_usdc(&test_db).await, None);
    assert!(test_db.db.get_watermark(CHAIN_ID).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consume_stops_on_cancel() {
    let test_db = TestDb::new().await;
    let subscriber = subscriber(&test_db, Arc::new(MockRpc::new(0, vec![])));
    let cancel_token = CancellationToken::new();
    cancel_token.cancel();

    let stream = futures_util::stream::pending::<Vec<Log>>();
    assert_eq!(subscriber.consume(stream, &cancel_token).await, 0);
}

#[tokio::test]
async fn test_batch_in_flight_completes_after_cancel() {
    let test_db = TestDb::new().await;
    seed_first_nonce(&test_db).await;
    let slow = Arc::new(DelayedDb::new(test_db.db.clone(), Duration::from_millis(200)));
    let subscriber = Subscriber::new(
        Arc::new(MockRpc::new(0, vec![])),
        chain_config(CHAIN_ID, 1000),
        reconciler_over(slow),
        TIMEOUT,
        BACKOFF,
    );
    let cancel_token = CancellationToken::new();

    let batch = vec![rpc_log(deposited(ALICE, USDC, 100, 2), 200, 0)];
    let stream =
        futures_util::stream::iter([batch]).chain(futures_util::stream::pending::<Vec<Log>>());
    let (handled, ()) = tokio::join!(subscriber.consume(stream, &cancel_token), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_token.cancel();
    });

    assert_eq!(handled, 1);
    assert_eq!(alice_usdc(&test_db).await, Some(BigInt::from(100)));
    let watermark = test_db.db.get_watermark(CHAIN_ID).await.unwrap().unwrap();
    assert_eq!(watermark.last_nonce, Some(U256::from(2)));
    assert_eq!(watermark.last_block, 200);
}

#[tokio::test]
async fn test_live_batch_after_a_gap_is_held_back() {
    let test_db = TestDb::new().await;
    seed_first_nonce(&test_db).await;
    let reconciler = reconciler(&test_db);
    let subscriber = Subscriber::new(
        Arc::new(MockRpc::new(0, vec![])),
        chain_config(CHAIN_ID, 1000),
        reconciler.clone(),
        TIMEOUT,
        BACKOFF,
    );

    let outcome =
        subscriber.handle_batch(vec![rpc_log(deposited(ALICE, USDC, 9, 3), 210, 0)]).await.unwrap();
    assert_eq!(outcome.applied, 0);
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 1);
    assert_eq!(alice_usdc(&test_db).await, None);

    subscriber.handle_batch(vec![rpc_log(deposited(ALICE, USDC, 1, 2), 205, 0)]).await.unwrap();
    assert_eq!(alice_usdc(&test_db).await, Some(BigInt::from(10)));
    assert_eq!(reconciler.pending(CHAIN_ID).await.unwrap(), 0);
}

#[tokio::test]
async fn test_run_waits_for_catch_up() {
    let test_db = TestDb::new().await;
    seed_first_nonce(&test_db).await;
    let rpc = Arc::new(MockRpc::new(0, vec![]));
    let live = rpc.live_sender();
    let (caught_up_tx, caught_up_rx) = watch::channel(false);
    let cancel_token = CancellationToken::new();

    let task = tokio::spawn(subscriber(&test_db, rpc).run(caught_up_rx, cancel_token.clone()));

    live.send(vec![rpc_log(deposited(ALICE, USDC, 100, 2), 200, 0)]).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alice_usdc(&test_db).await, None);

    caught_up_tx.send_replace(true);
    wait_for_alice_usdc(&test_db, 100).await;

    cancel_token.cancel();
    tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_resubscribes_after_failure() {
    let test_db = TestDb::new().await;
    seed_first_nonce(&test_db).await;
    let rpc = Arc::new(MockRpc::new(0, vec![]));
    let live = rpc.live_sender();
    rpc.fail_next(1);
    let (_caught_up_tx, caught_up_rx) = watch::channel(true);
    let cancel_token = CancellationToken::new();

    let task = tokio::spawn(subscriber(&test_db, rpc).run(caught_up_rx, cancel_token.clone()));

    live.send(vec![rpc_log(deposited(ALICE, USDC, 40, 2), 200, 0)]).unwrap();
    wait_for_alice_usdc(&test_db, 40).await;
    live.send(vec![rpc_log(deposited(ALICE, USDC, 2, 3), 201, 0)]).unwrap();
    wait_for_alice_usdc(&test_db, 42).await;

    cancel_token.cancel();
    tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_run_exits_when_cancelled_before_catch_up() {
    let test_db = TestDb::new().await;
    let rpc = Arc::new(MockRpc::new(0, vec![]));
    let (_caught_up_tx, caught_up_rx) = watch::channel(false);
    let cancel_token = CancellationToken::new();

    let task = tokio::spawn(subscriber(&test_db, rpc).run(caught_up_rx, cancel_token.clone()));
    cancel_token.cancel();
    tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
}
