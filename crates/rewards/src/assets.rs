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

//! Supported asset lookup for a single chain.

use std::collections::HashMap;

use alloy::primitives::Address;

/// A token the lending pool accepts on a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedAsset {
    pub address: Address,
    pub symbol: String,
}

/// Supported assets of one chain, keyed by token address.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    by_address: HashMap<Address, SupportedAsset>,
}

impl AssetRegistry {
    pub fn new(assets: impl IntoIterator<Item = SupportedAsset>) -> Self {
        Self { by_address: assets.into_iter().map(|asset| (asset.address, asset)).collect() }
    }

    /// Resolve a token address. The zero address is how a missing token shows up on the wire.
    pub fn resolve(&self, token: Address) -> Option<&SupportedAsset> {
        if token.is_zero() {
            return None;
        }
        self.by_address.get(&token)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
