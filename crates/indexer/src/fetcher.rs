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

//! Catch-up path: bounded block-range scans against a chain's RPC.

use std::{future::Future, time::Duration};

use alloy::{
    primitives::Address,
    providers::{
        fillers::{ChainIdFiller, FillProvider, JoinFill},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::{
        client::RpcClient,
        types::{Filter, Log},
    },
    transports::{layers::RetryBackoffLayer, TransportError},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lending_rewards::{
    event_signatures, normalize_log, sort_by_position, NonceOrderError, NormalizeError,
    NormalizedEvent, Watermark,
};
use thiserror::Error;
use url::Url;

use crate::config::ChainConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("RPC error: {0}")]
    Rpc(#[from] TransportError),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    NonceOrder(#[from] NonceOrderError),
}

/// The RPC surface the indexer needs from a chain.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, FetchError>;

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError>;

    /// Open a polling log subscription. Each stream item is one poll's worth of new logs.
    async fn watch(
        &self,
        filter: &Filter,
        poll_interval: Duration,
    ) -> Result<BoxStream<'static, Vec<Log>>, FetchError>;
}

pub type ProviderType = FillProvider<JoinFill<Identity, ChainIdFiller>, RootProvider>;

/// [ChainRpc] over an alloy provider.
pub struct ProviderRpc<P> {
    provider: P,
}

impl<P> ProviderRpc<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl ProviderRpc<ProviderType> {
    /// Connect over HTTP with retry backoff on transient transport errors.
    pub fn connect_http(rpc_url: Url) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .filler(ChainIdFiller::default())
            .connect_client(
                RpcClient::builder().layer(RetryBackoffLayer::new(3, 1000, 200)).http(rpc_url),
            );
        Self::new(provider)
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> ChainRpc for ProviderRpc<P> {
    async fn block_number(&self) -> Result<u64, FetchError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, FetchError> {
        Ok(self.provider.get_logs(filter).await?)
    }

    async fn watch(
        &self,
        filter: &Filter,
        poll_interval: Duration,
    ) -> Result<BoxStream<'static, Vec<Log>>, FetchError> {
        let poller = self.provider.watch_logs(filter).await?;
        Ok(poller.with_poll_interval(poll_interval).into_stream().boxed())
    }
}

/// Bound an RPC future by `limit`, turning expiry into [FetchError::Timeout].
pub async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| FetchError::Timeout(limit))?
}

/// Filter matching every lending pool event emitted by `contract`.
pub fn events_filter(contract: Address) -> Filter {
    Filter::new().address(contract).event_signature(event_signatures())
}

/// First block the next catch-up window should start from.
///
/// Scans resume right after the last fully scanned block, even when live delivery has already
/// recorded events further ahead, so every block is scanned exactly once. Without a scan cursor
/// the block of the last recorded event is rescanned.
pub fn next_from_block(watermark: Option<&Watermark>, genesis_block: u64) -> u64 {
    let resume = watermark.and_then(|w| match w.scanned_block {
        Some(scanned) => Some(scanned.saturating_add(1)),
        None => w.last_nonce.map(|_| w.last_block),
    });
    resume.map_or(genesis_block, |block| block.max(genesis_block))
}

/// One scanned block range and the unseen events found in it.
#[derive(Debug, Clone)]
pub struct FetchedWindow {
    pub from_block: u64,
    pub to_block: u64,
    pub head: u64,
    /// Unseen events in (block, log index) order, which is also nonce order.
    pub events: Vec<NormalizedEvent>,
}

impl FetchedWindow {
    pub fn reaches_head(&self) -> bool {
        self.to_block >= self.head
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Every block up to `head` has already been scanned.
    CaughtUp { head: u64 },
    Window(FetchedWindow),
}

/// Scan at most one window of blocks following the watermark.
pub async fn fetch_window(
    rpc: &dyn ChainRpc,
    chain: &ChainConfig,
    watermark: Option<&Watermark>,
    timeout: Duration,
) -> Result<FetchOutcome, FetchError> {
    let head = with_timeout(timeout, rpc.block_number()).await?;
    let from_block = next_from_block(watermark, chain.genesis_block);
    if from_block > head {
        tracing::debug!("Chain {} caught up at block {}", chain.chain_id, head);
        return Ok(FetchOutcome::CaughtUp { head });
    }
    let to_block = from_block.saturating_add(chain.window_size).min(head);

    let filter = events_filter(chain.contract_address).from_block(from_block).to_block(to_block);
    let logs = with_timeout(timeout, rpc.logs(&filter)).await?;
    tracing::debug!(
        "Fetched {} logs for chain {} in blocks {}..={}",
        logs.len(),
        chain.chain_id,
        from_block,
        to_block
    );

    let mut events = Vec::with_capacity(logs.len());
    for log in &logs {
        let event = normalize_log(chain.chain_id, log)?;
        if watermark.is_some_and(|w| w.has_seen(event.nonce)) {
            continue;
        }
        events.push(event);
    }
    let events = sort_by_position(events)?;

    Ok(FetchOutcome::Window(FetchedWindow { from_block, to_block, head, events }))
}
