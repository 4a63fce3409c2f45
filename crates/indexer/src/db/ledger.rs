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

use std::{str::FromStr, sync::Arc};

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use lending_rewards::{
    plan_batch, AssetRegistry, Delivery, EventKind, LendingEvent, NormalizedEvent, PoolReward,
    Position, RewardRecord, RewardType, Side, SkipReason, WalletHolding, WalletReward, Watermark,
};
use num_bigint::{BigInt, BigUint};
use num_traits::Zero;
use sqlx::{any::AnyPoolOptions, AnyConnection, AnyPool, Row};

use super::DbError;

pub type DbObj = Arc<dyn LedgerDb + Send + Sync>;

/// Convert a U256 to a zero-padded string for proper database sorting
/// U256 max value has 78 decimal digits (2^256 ≈ 1.15 * 10^77)
fn pad_u256(value: U256) -> String {
    format!("{:0>78}", value)
}

/// Convert a zero-padded string back to U256
fn unpad_u256(s: &str) -> Result<U256, DbError> {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str(trimmed).map_err(|_| DbError::BadValue(format!("Invalid U256 string: {}", s)))
}

fn parse_address(s: &str) -> Result<Address, DbError> {
    Address::from_str(s).map_err(|e| DbError::BadValue(format!("Invalid address {}: {}", s, e)))
}

fn parse_opt_address(s: Option<String>) -> Result<Option<Address>, DbError> {
    s.as_deref().map(parse_address).transpose()
}

fn parse_opt_u256(s: Option<String>) -> Result<Option<U256>, DbError> {
    s.as_deref().map(unpad_u256).transpose()
}

fn parse_bigint(s: &str) -> Result<BigInt, DbError> {
    BigInt::from_str(s).map_err(|_| DbError::BadValue(format!("Invalid amount: {}", s)))
}

fn parse_biguint(s: &str) -> Result<BigUint, DbError> {
    BigUint::from_str(s).map_err(|_| DbError::BadValue(format!("Invalid amount: {}", s)))
}

fn to_u64(value: i64, column: &str) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::BadValue(format!("Negative {}: {}", column, value)))
}

// Batch insert chunk size to avoid parameter limits
// PostgreSQL: 65535 max params, SQLite: 999-32766 params (configurable)
// Using conservative chunk size that works safely for both databases
const BATCH_INSERT_CHUNK_SIZE: usize = 75;

/// An event as stored, with the outcome of applying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event: NormalizedEvent,
    pub applied: bool,
    pub skip_reason: Option<String>,
}

/// Result of one [LedgerDb::apply_batch] call.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    /// Events whose deltas were applied to positions.
    pub applied: usize,
    /// Events recorded without ledger effect.
    pub skipped: Vec<(U256, SkipReason)>,
    /// Events dropped as already seen.
    pub duplicates: usize,
    /// (expected, actual) nonce gaps encountered.
    pub gaps: Vec<(U256, U256)>,
    /// Live events held back behind a missing nonce. Nothing about them was recorded.
    pub deferred: Vec<NormalizedEvent>,
    /// Watermark after the batch, `None` if the chain still has no state.
    pub watermark: Option<Watermark>,
}

impl BatchOutcome {
    pub fn recorded(&self) -> usize {
        self.applied + self.skipped.len()
    }
}

#[async_trait]
pub trait LedgerDb {
    /// Get the watermark of a chain, if any event or scan has been recorded
    async fn get_watermark(&self, chain_id: u64) -> Result<Option<Watermark>, DbError>;

    /// Record that the catch-up scan has covered every block up to `block`
    async fn set_scanned_block(&self, chain_id: u64, block: u64) -> Result<(), DbError>;

    /// Record unseen events, apply their deltas and advance the watermark in one transaction.
    ///
    /// A [Delivery::Scan] additionally moves the catch-up cursor in the same transaction.
    async fn apply_batch(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
        assets: &AssetRegistry,
        delivery: Delivery,
    ) -> Result<BatchOutcome, DbError>;

    /// Get every position and reward of a wallet
    async fn get_holding(&self, wallet: Address) -> Result<Option<WalletHolding>, DbError>;

    /// Get strictly positive positions of one market, ordered by wallet
    async fn get_qualifying_positions(
        &self,
        chain_id: u64,
        side: Side,
        symbol: &str,
    ) -> Result<Vec<(Address, BigInt)>, DbError>;

    /// Append rewards, ignoring rows that already exist. Returns the number inserted.
    async fn append_rewards(&self, rewards: &[WalletReward]) -> Result<u64, DbError>;

    /// Get recorded events of a chain in nonce order, starting at `from_nonce`
    async fn get_events(
        &self,
        chain_id: u64,
        from_nonce: U256,
        limit: u64,
    ) -> Result<Vec<RecordedEvent>, DbError>;

    /// Insert or replace a reward epoch
    async fn add_pool_reward(&self, epoch: &PoolReward) -> Result<(), DbError>;

    /// Get every epoch whose date range contains `day`
    async fn get_active_pool_rewards(&self, day: u64) -> Result<Vec<PoolReward>, DbError>;
}

pub struct AnyDb {
    pool: AnyPool,
}

impl AnyDb {
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(20).connect(database_url).await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn read_watermark(
        conn: &mut AnyConnection,
        chain_id: u64,
    ) -> Result<Option<Watermark>, DbError> {
        let query = r#"
            SELECT last_block, last_nonce, scanned_block
            FROM chain_watermarks
            WHERE chain_id = $1
        "#;

        let Some(row) = sqlx::query(query).bind(chain_id as i64).fetch_optional(conn).await? else {
            return Ok(None);
        };

        let last_block = row.get::<i64, _>("last_block");
        Ok(Some(Watermark {
            last_block: u64::try_from(last_block)
                .map_err(|_| DbError::BadBlockNumb(last_block.to_string()))?,
            last_nonce: parse_opt_u256(row.get::<Option<String>, _>("last_nonce"))?,
            scanned_block: row
                .get::<Option<i64>, _>("scanned_block")
                .map(|b| u64::try_from(b).map_err(|_| DbError::BadBlockNumb(b.to_string())))
                .transpose()?,
        }))
    }

    async fn write_watermark(
        conn: &mut AnyConnection,
        chain_id: u64,
        watermark: &Watermark,
    ) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO chain_watermarks (chain_id, last_block, last_nonce, scanned_block, updated_at)
            VALUES ($1, $2, $3, $4, CURRENT_TIMESTAMP)
            ON CONFLICT (chain_id)
            DO UPDATE SET
                last_block = EXCLUDED.last_block,
                last_nonce = EXCLUDED.last_nonce,
                scanned_block = EXCLUDED.scanned_block,
                updated_at = CURRENT_TIMESTAMP
        "#;

        sqlx::query(query)
            .bind(chain_id as i64)
            .bind(watermark.last_block as i64)
            .bind(watermark.last_nonce.map(pad_u256))
            .bind(watermark.scanned_block.map(|b| b as i64))
            .execute(conn)
            .await?;

        Ok(())
    }

    async fn insert_events(
        conn: &mut AnyConnection,
        chain_id: u64,
        events: &[(&NormalizedEvent, Option<String>)],
    ) -> Result<(), DbError> {
        for chunk in events.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let mut values_clauses = Vec::new();
            let mut param_idx = 1;

            for _ in chunk {
                let params: Vec<String> =
                    (param_idx..param_idx + 16).map(|idx| format!("${}", idx)).collect();
                values_clauses.push(format!("({})", params.join(",")));
                param_idx += 16;
            }

            let query = format!(
                r#"INSERT INTO lending_events
                (chain_id, nonce, kind, user_address, token, amount, liquidator, collateral_token,
                 collateral_amount, debt_token, debt_repaid, block_number, log_index, tx_hash,
                 applied, skip_reason)
                VALUES {}
                ON CONFLICT (chain_id, nonce) DO NOTHING"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for (event, skip_reason) in chunk {
                let columns = EventColumns::from(&event.event);
                q = q
                    .bind(chain_id as i64)
                    .bind(pad_u256(event.nonce))
                    .bind(event.kind().as_str())
                    .bind(format!("{:#x}", event.user))
                    .bind(columns.token)
                    .bind(columns.amount)
                    .bind(columns.liquidator)
                    .bind(columns.collateral_token)
                    .bind(columns.collateral_amount)
                    .bind(columns.debt_token)
                    .bind(columns.debt_repaid)
                    .bind(event.block_number as i64)
                    .bind(event.log_index as i64)
                    .bind(event.tx_hash.map(|h| format!("{:#x}", h)))
                    .bind(if skip_reason.is_none() { 1i32 } else { 0i32 })
                    .bind(skip_reason.clone());
            }
            q.execute(&mut *conn).await?;
        }

        Ok(())
    }
}

/// Nullable event columns, filled according to the event kind.
#[derive(Default)]
struct EventColumns {
    token: Option<String>,
    amount: Option<String>,
    liquidator: Option<String>,
    collateral_token: Option<String>,
    collateral_amount: Option<String>,
    debt_token: Option<String>,
    debt_repaid: Option<String>,
}

impl From<&LendingEvent> for EventColumns {
    fn from(event: &LendingEvent) -> Self {
        match event {
            LendingEvent::Deposited { token, amount }
            | LendingEvent::Withdrawn { token, amount }
            | LendingEvent::Borrowed { token, amount }
            | LendingEvent::Repaid { token, amount } => Self {
                token: Some(format!("{:#x}", token)),
                amount: Some(pad_u256(*amount)),
                ..Default::default()
            },
            LendingEvent::Liquidated {
                liquidator,
                collateral_token,
                collateral_amount,
                debt_token,
                debt_repaid,
            } => Self {
                liquidator: Some(format!("{:#x}", liquidator)),
                collateral_token: Some(format!("{:#x}", collateral_token)),
                collateral_amount: Some(pad_u256(*collateral_amount)),
                debt_token: Some(format!("{:#x}", debt_token)),
                debt_repaid: Some(pad_u256(*debt_repaid)),
                ..Default::default()
            },
        }
    }
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, DbError> {
    value.ok_or_else(|| DbError::BadValue(format!("Missing {}", column)))
}

fn decode_event(chain_id: u64, row: &sqlx::any::AnyRow) -> Result<RecordedEvent, DbError> {
    let kind_str = row.get::<String, _>("kind");
    let kind = EventKind::from_str(&kind_str).map_err(DbError::BadValue)?;
    let token = parse_opt_address(row.get::<Option<String>, _>("token"))?;
    let amount = parse_opt_u256(row.get::<Option<String>, _>("amount"))?;

    let event = match kind {
        EventKind::Liquidated => LendingEvent::Liquidated {
            liquidator: required(
                parse_opt_address(row.get::<Option<String>, _>("liquidator"))?,
                "liquidator",
            )?,
            collateral_token: required(
                parse_opt_address(row.get::<Option<String>, _>("collateral_token"))?,
                "collateral_token",
            )?,
            collateral_amount: required(
                parse_opt_u256(row.get::<Option<String>, _>("collateral_amount"))?,
                "collateral_amount",
            )?,
            debt_token: required(
                parse_opt_address(row.get::<Option<String>, _>("debt_token"))?,
                "debt_token",
            )?,
            debt_repaid: required(
                parse_opt_u256(row.get::<Option<String>, _>("debt_repaid"))?,
                "debt_repaid",
            )?,
        },
        EventKind::Deposited => LendingEvent::Deposited {
            token: required(token, "token")?,
            amount: required(amount, "amount")?,
        },
        EventKind::Withdrawn => LendingEvent::Withdrawn {
            token: required(token, "token")?,
            amount: required(amount, "amount")?,
        },
        EventKind::Borrowed => LendingEvent::Borrowed {
            token: required(token, "token")?,
            amount: required(amount, "amount")?,
        },
        EventKind::Repaid => LendingEvent::Repaid {
            token: required(token, "token")?,
            amount: required(amount, "amount")?,
        },
    };

    let tx_hash = row
        .get::<Option<String>, _>("tx_hash")
        .map(|h| B256::from_str(&h).map_err(|e| DbError::BadValue(e.to_string())))
        .transpose()?;

    Ok(RecordedEvent {
        event: NormalizedEvent {
            chain_id,
            user: parse_address(&row.get::<String, _>("user_address"))?,
            nonce: unpad_u256(&row.get::<String, _>("nonce"))?,
            block_number: to_u64(row.get::<i64, _>("block_number"), "block_number")?,
            log_index: to_u64(row.get::<i64, _>("log_index"), "log_index")?,
            tx_hash,
            event,
        },
        applied: row.get::<i32, _>("applied") != 0,
        skip_reason: row.get::<Option<String>, _>("skip_reason"),
    })
}

fn decode_pool_reward(row: &sqlx::any::AnyRow) -> Result<PoolReward, DbError> {
    Ok(PoolReward {
        chain_id: to_u64(row.get::<i64, _>("chain_id"), "chain_id")?,
        symbol: row.get::<String, _>("symbol"),
        reward_type: RewardType::from_str(&row.get::<String, _>("reward_type"))
            .map_err(DbError::BadValue)?,
        start_date: to_u64(row.get::<i64, _>("start_date"), "start_date")?,
        end_date: to_u64(row.get::<i64, _>("end_date"), "end_date")?,
        total_reward: parse_biguint(&row.get::<String, _>("total_reward"))?,
    })
}

#[async_trait]
impl LedgerDb for AnyDb {
    async fn get_watermark(&self, chain_id: u64) -> Result<Option<Watermark>, DbError> {
        let mut conn = self.pool.acquire().await?;
        Self::read_watermark(&mut conn, chain_id).await
    }

    async fn set_scanned_block(&self, chain_id: u64, block: u64) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO chain_watermarks (chain_id, last_block, last_nonce, scanned_block, updated_at)
            VALUES ($1, 0, NULL, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (chain_id)
            DO UPDATE SET scanned_block = EXCLUDED.scanned_block, updated_at = CURRENT_TIMESTAMP
        "#;

        sqlx::query(query).bind(chain_id as i64).bind(block as i64).execute(&self.pool).await?;

        Ok(())
    }

    async fn apply_batch(
        &self,
        chain_id: u64,
        events: Vec<NormalizedEvent>,
        assets: &AssetRegistry,
        delivery: Delivery,
    ) -> Result<BatchOutcome, DbError> {
        let mut tx = self.pool.begin().await?;

        let previous = Self::read_watermark(&mut tx, chain_id).await?;
        let plan = plan_batch(previous.as_ref(), events, assets, delivery);

        for delta in plan.net_deltas().into_values() {
            let wallet = format!("{:#x}", delta.key.wallet);
            let token = format!("{:#x}", delta.key.token);
            let side = delta.key.side.as_str();

            let current = sqlx::query(
                r#"
                SELECT amount FROM positions
                WHERE wallet = $1 AND chain_id = $2 AND side = $3 AND token = $4
                "#,
            )
            .bind(wallet.as_str())
            .bind(chain_id as i64)
            .bind(side)
            .bind(token.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            let amount = match current {
                Some(row) => parse_bigint(&row.get::<String, _>("amount"))? + &delta.amount,
                None => BigInt::zero() + &delta.amount,
            };

            sqlx::query(
                r#"
                INSERT INTO positions (wallet, chain_id, side, token, symbol, amount, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
                ON CONFLICT (wallet, chain_id, side, token)
                DO UPDATE SET amount = EXCLUDED.amount, updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(wallet.as_str())
            .bind(chain_id as i64)
            .bind(side)
            .bind(token.as_str())
            .bind(delta.symbol.as_str())
            .bind(amount.to_string())
            .execute(&mut *tx)
            .await?;
        }

        let rows: Vec<(&NormalizedEvent, Option<String>)> = plan
            .events
            .iter()
            .map(|planned| {
                (&planned.event, planned.effect.as_ref().err().map(|reason| reason.to_string()))
            })
            .collect();
        Self::insert_events(&mut tx, chain_id, &rows).await?;

        let mut watermark = plan.watermark.clone().or_else(|| previous.clone());
        if let Some(block) = delivery.scanned_block() {
            let current = watermark.get_or_insert_with(Watermark::default);
            current.scanned_block = Some(current.scanned_block.map_or(block, |b| b.max(block)));
        }
        if let Some(watermark) = watermark.as_ref().filter(|w| Some(*w) != previous.as_ref()) {
            Self::write_watermark(&mut tx, chain_id, watermark).await?;
        }

        tx.commit().await?;

        let applied = plan.events.iter().filter(|planned| planned.is_applied()).count();
        let skipped =
            plan.skipped().map(|(event, reason)| (event.nonce, reason.clone())).collect();

        Ok(BatchOutcome {
            applied,
            skipped,
            duplicates: plan.duplicates,
            gaps: plan.gaps,
            deferred: plan.deferred,
            watermark,
        })
    }

    async fn get_holding(&self, wallet: Address) -> Result<Option<WalletHolding>, DbError> {
        let wallet_str = format!("{:#x}", wallet);

        let positions = sqlx::query(
            r#"
            SELECT chain_id, side, token, symbol, amount
            FROM positions
            WHERE wallet = $1
            "#,
        )
        .bind(wallet_str.as_str())
        .fetch_all(&self.pool)
        .await?;

        let rewards = sqlx::query(
            r#"
            SELECT chain_id, symbol, reward_type, reward_date, amount
            FROM wallet_rewards
            WHERE wallet = $1
            ORDER BY reward_date ASC, chain_id ASC, symbol ASC, reward_type ASC
            "#,
        )
        .bind(wallet_str.as_str())
        .fetch_all(&self.pool)
        .await?;

        if positions.is_empty() && rewards.is_empty() {
            return Ok(None);
        }

        let mut holding = WalletHolding::new(wallet);
        for row in positions {
            let side = Side::from_str(&row.get::<String, _>("side")).map_err(DbError::BadValue)?;
            let chain_id = to_u64(row.get::<i64, _>("chain_id"), "chain_id")?;
            let token = parse_address(&row.get::<String, _>("token"))?;
            let position = Position {
                symbol: row.get::<String, _>("symbol"),
                amount: parse_bigint(&row.get::<String, _>("amount"))?,
            };
            match side {
                Side::Deposits => holding.deposits.insert((chain_id, token), position),
                Side::Borrows => holding.borrows.insert((chain_id, token), position),
            };
        }

        for row in rewards {
            holding.rewards.push(RewardRecord {
                chain_id: to_u64(row.get::<i64, _>("chain_id"), "chain_id")?,
                symbol: row.get::<String, _>("symbol"),
                reward_type: RewardType::from_str(&row.get::<String, _>("reward_type"))
                    .map_err(DbError::BadValue)?,
                amount: parse_biguint(&row.get::<String, _>("amount"))?,
                date: to_u64(row.get::<i64, _>("reward_date"), "reward_date")?,
            });
        }

        Ok(Some(holding))
    }

    async fn get_qualifying_positions(
        &self,
        chain_id: u64,
        side: Side,
        symbol: &str,
    ) -> Result<Vec<(Address, BigInt)>, DbError> {
        // Amounts are canonical decimal strings, so the sign is the first character.
        let query = r#"
            SELECT wallet, amount
            FROM positions
            WHERE chain_id = $1 AND side = $2 AND symbol = $3
              AND amount NOT LIKE '-%' AND amount <> '0'
            ORDER BY wallet ASC
        "#;

        let rows = sqlx::query(query)
            .bind(chain_id as i64)
            .bind(side.as_str())
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push((
                parse_address(&row.get::<String, _>("wallet"))?,
                parse_bigint(&row.get::<String, _>("amount"))?,
            ));
        }

        Ok(results)
    }

    async fn append_rewards(&self, rewards: &[WalletReward]) -> Result<u64, DbError> {
        if rewards.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in rewards.chunks(BATCH_INSERT_CHUNK_SIZE) {
            let mut values_clauses = Vec::new();
            let mut param_idx = 1;

            for _ in chunk {
                values_clauses.push(format!(
                    "(${},${},${},${},${},${},CURRENT_TIMESTAMP)",
                    param_idx,
                    param_idx + 1,
                    param_idx + 2,
                    param_idx + 3,
                    param_idx + 4,
                    param_idx + 5
                ));
                param_idx += 6;
            }

            let query = format!(
                r#"INSERT INTO wallet_rewards
                (wallet, chain_id, symbol, reward_type, reward_date, amount, created_at)
                VALUES {}
                ON CONFLICT (wallet, chain_id, symbol, reward_type, reward_date) DO NOTHING"#,
                values_clauses.join(",")
            );

            let mut q = sqlx::query(&query);
            for reward in chunk {
                q = q
                    .bind(format!("{:#x}", reward.wallet))
                    .bind(reward.record.chain_id as i64)
                    .bind(reward.record.symbol.clone())
                    .bind(reward.record.reward_type.as_str())
                    .bind(reward.record.date as i64)
                    .bind(reward.record.amount.to_string());
            }
            inserted += q.execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn get_events(
        &self,
        chain_id: u64,
        from_nonce: U256,
        limit: u64,
    ) -> Result<Vec<RecordedEvent>, DbError> {
        let query = r#"
            SELECT nonce, kind, user_address, token, amount, liquidator, collateral_token,
                   collateral_amount, debt_token, debt_repaid, block_number, log_index, tx_hash,
                   applied, skip_reason
            FROM lending_events
            WHERE chain_id = $1 AND nonce >= $2
            ORDER BY nonce ASC
            LIMIT $3
        "#;

        let rows = sqlx::query(query)
            .bind(chain_id as i64)
            .bind(pad_u256(from_nonce))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| decode_event(chain_id, row)).collect()
    }

    async fn add_pool_reward(&self, epoch: &PoolReward) -> Result<(), DbError> {
        let query = r#"
            INSERT INTO pool_rewards
            (chain_id, symbol, reward_type, start_date, end_date, total_reward, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, CURRENT_TIMESTAMP)
            ON CONFLICT (chain_id, symbol, reward_type, start_date)
            DO UPDATE SET
                end_date = EXCLUDED.end_date,
                total_reward = EXCLUDED.total_reward
        "#;

        sqlx::query(query)
            .bind(epoch.chain_id as i64)
            .bind(epoch.symbol.as_str())
            .bind(epoch.reward_type.as_str())
            .bind(epoch.start_date as i64)
            .bind(epoch.end_date as i64)
            .bind(epoch.total_reward.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_active_pool_rewards(&self, day: u64) -> Result<Vec<PoolReward>, DbError> {
        let query = r#"
            SELECT chain_id, symbol, reward_type, start_date, end_date, total_reward
            FROM pool_rewards
            WHERE start_date <= $1 AND end_date >= $1
            ORDER BY start_date ASC
        "#;

        let rows = sqlx::query(query).bind(day as i64).fetch_all(&self.pool).await?;
        rows.iter().map(decode_pool_reward).collect()
    }
}
