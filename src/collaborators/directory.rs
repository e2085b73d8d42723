// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Host Directory Collaborator
//!
//! The marketplace directory knows which hosts serve which models and
//! at what price. The directory's resolved price is authoritative for a
//! session: whatever the caller requested, the (host, model, token)
//! price recorded here is what the payment layer escrows against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

use crate::error::{Result, SdkError};
use crate::pricing::{validate_price, PriceKind};

/// One host's directory entry.
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub address: Address,
    /// Base HTTP API endpoint, e.g. `https://host.example:8080`.
    pub api_endpoint: Option<String>,
    /// Compressed static public key, when the host publishes one.
    pub public_key: Option<Vec<u8>>,
    /// Canonical IDs of the models this host advertises.
    pub models: Vec<H256>,
    /// Host default per-token price.
    pub price_per_token: U256,
}

#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Hosts advertising `model_id` on `chain_id`.
    async fn hosts_for_model(&self, chain_id: u64, model_id: H256) -> Result<Vec<HostRecord>>;

    /// Directory record for a specific host.
    async fn host_record(&self, chain_id: u64, host: Address) -> Result<Option<HostRecord>>;

    /// Authoritative per-token price for the (host, model, token) triple.
    async fn resolve_price(
        &self,
        chain_id: u64,
        host: Address,
        model_id: H256,
        payment_token: Option<Address>,
    ) -> Result<U256>;
}

/// In-memory directory for tests and local development.
#[derive(Default)]
pub struct InMemoryHostDirectory {
    hosts: Mutex<HashMap<(u64, Address), HostRecord>>,
    model_prices: Mutex<HashMap<(u64, Address, H256), U256>>,
}

impl InMemoryHostDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host, validating its default price for the native
    /// range. Rejection leaves the directory unchanged.
    pub fn register_host(&self, chain_id: u64, record: HostRecord) -> Result<()> {
        validate_price(record.price_per_token, PriceKind::Native)?;
        self.hosts
            .lock()
            .unwrap()
            .insert((chain_id, record.address), record);
        Ok(())
    }

    /// Set a custom per-model price. Zero means "use host default" and
    /// skips range validation; anything else must be in range for the
    /// token class.
    pub fn set_model_price(
        &self,
        chain_id: u64,
        host: Address,
        model_id: H256,
        price: U256,
        kind: PriceKind,
    ) -> Result<()> {
        if !price.is_zero() {
            validate_price(price, kind)?;
        }
        self.model_prices
            .lock()
            .unwrap()
            .insert((chain_id, host, model_id), price);
        Ok(())
    }

    pub fn host_count(&self, chain_id: u64) -> usize {
        self.hosts
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| *c == chain_id)
            .count()
    }
}

#[async_trait]
impl HostDirectory for InMemoryHostDirectory {
    async fn hosts_for_model(&self, chain_id: u64, model_id: H256) -> Result<Vec<HostRecord>> {
        let hosts = self.hosts.lock().unwrap();
        Ok(hosts
            .iter()
            .filter(|((c, _), record)| *c == chain_id && record.models.contains(&model_id))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn host_record(&self, chain_id: u64, host: Address) -> Result<Option<HostRecord>> {
        Ok(self.hosts.lock().unwrap().get(&(chain_id, host)).cloned())
    }

    async fn resolve_price(
        &self,
        chain_id: u64,
        host: Address,
        model_id: H256,
        _payment_token: Option<Address>,
    ) -> Result<U256> {
        let record = self
            .hosts
            .lock()
            .unwrap()
            .get(&(chain_id, host))
            .cloned()
            .ok_or_else(|| SdkError::NoHostsAvailable {
                chain_id,
                model: format!("0x{}", hex::encode(model_id.as_bytes())),
            })?;

        let custom = self
            .model_prices
            .lock()
            .unwrap()
            .get(&(chain_id, host, model_id))
            .copied()
            .unwrap_or_else(U256::zero);

        Ok(crate::pricing::effective_price(custom, record.price_per_token))
    }
}
