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

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use lending_indexer::{
    config::defaults,
    db::{AnyDb, DbObj, LedgerDb},
    Config, Distributor, IndexerService,
};
use lending_rewards::{PoolReward, Position, RewardType, WalletHolding};
use num_bigint::BigUint;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Arguments for the lending indexer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct IndexerArgs {
    /// DB connection string.
    #[clap(long, env = "DATABASE_URL")]
    db: String,

    /// Whether to log in JSON format.
    #[clap(long, env, default_value_t = false)]
    log_json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every configured chain and distribute rewards daily until interrupted.
    Run {
        /// Path to the TOML config file.
        #[clap(short, long, env = "INDEXER_CONFIG")]
        config: PathBuf,
    },
    /// Run the reward distribution for one day.
    Distribute {
        /// UTC day to distribute for (YYYY-MM-DD). Defaults to today.
        #[clap(long)]
        date: Option<String>,
    },
    /// Print the positions and rewards of a wallet as JSON.
    Holding { wallet: Address },
    /// Author a reward epoch.
    AddPoolReward {
        #[clap(long)]
        chain_id: u64,
        #[clap(long)]
        symbol: String,
        /// `deposit` or `borrow`.
        #[clap(long)]
        reward_type: String,
        /// First UTC day of the epoch (YYYY-MM-DD).
        #[clap(long)]
        start: String,
        /// Last UTC day of the epoch (YYYY-MM-DD).
        #[clap(long)]
        end: String,
        /// Total reward over the whole epoch, in base units.
        #[clap(long)]
        total_reward: String,
    },
}

fn parse_day(date: &str) -> Result<u64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid date {date}, expected YYYY-MM-DD"))?;
    let timestamp = day.and_hms_opt(0, 0, 0).context("Invalid day start")?.and_utc().timestamp();
    u64::try_from(timestamp).with_context(|| format!("Date {date} is before the unix epoch"))
}

fn positions_json(side: &BTreeMap<(u64, Address), Position>) -> Vec<serde_json::Value> {
    side.iter()
        .map(|((chain_id, token), position)| {
            json!({
                "chainId": chain_id,
                "token": format!("{:#x}", token),
                "symbol": position.symbol,
                "amount": position.amount.to_string(),
            })
        })
        .collect()
}

fn holding_json(holding: &WalletHolding) -> serde_json::Value {
    let rewards = holding
        .rewards
        .iter()
        .map(|reward| {
            json!({
                "chainId": reward.chain_id,
                "symbol": reward.symbol,
                "type": reward.reward_type.as_str(),
                "amount": reward.amount.to_string(),
                "date": reward.date,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "wallet": format!("{:#x}", holding.wallet),
        "deposits": positions_json(&holding.deposits),
        "borrows": positions_json(&holding.borrows),
        "rewards": rewards,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = IndexerArgs::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        .from_env_lossy();

    if args.log_json {
        tracing_subscriber::fmt().with_ansi(false).json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_ansi(false).with_env_filter(filter).init();
    }

    match args.command {
        Command::Run { config } => {
            let config = Config::load(&config)
                .await
                .with_context(|| format!("Failed to load config from {config:?}"))?;
            let service = IndexerService::new(config, &args.db)
                .await
                .context("Failed to create indexer service")?;

            let cancel_token = CancellationToken::new();
            let shutdown = cancel_token.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for ctrl-c: {}", e);
                    return;
                }
                tracing::info!("Received ctrl-c, shutting down");
                shutdown.cancel();
            });

            service.run(cancel_token).await?;
        }
        Command::Distribute { date } => {
            let db: DbObj = Arc::new(AnyDb::new(&args.db).await?);
            let day = match date {
                Some(date) => parse_day(&date)?,
                None => Utc::now().timestamp().max(0) as u64,
            };
            let db_timeout = Duration::from_secs(defaults::rpc_timeout_secs());
            let summary = Distributor::new(db, db_timeout).distribute(day).await?;
            tracing::info!(
                "Day {}: {} epochs paid out, {} rewards written",
                summary.day,
                summary.epochs,
                summary.rewards_written
            );
        }
        Command::Holding { wallet } => {
            let db = AnyDb::new(&args.db).await?;
            let Some(holding) = db.get_holding(wallet).await? else {
                bail!("No holding found for wallet {wallet:#x}");
            };
            println!("{}", serde_json::to_string_pretty(&holding_json(&holding))?);
        }
        Command::AddPoolReward { chain_id, symbol, reward_type, start, end, total_reward } => {
            let reward_type = RewardType::from_str(&reward_type).map_err(anyhow::Error::msg)?;
            let epoch = PoolReward {
                chain_id,
                symbol,
                reward_type,
                start_date: parse_day(&start)?,
                end_date: parse_day(&end)?,
                total_reward: BigUint::from_str(&total_reward)
                    .with_context(|| format!("Invalid total reward {total_reward}"))?,
            };
            if epoch.whole_days() == 0 {
                bail!("Epoch must span at least one whole day");
            }

            let db = AnyDb::new(&args.db).await?;
            db.add_pool_reward(&epoch).await?;
            tracing::info!(
                "Added {} {} epoch on chain {} from {} to {}",
                epoch.symbol,
                epoch.reward_type,
                epoch.chain_id,
                start,
                end
            );
        }
    }

    Ok(())
}
