// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Configuration
//!
//! Options recognized when starting a session. `chain_id` and `model`
//! are required; everything else has marketplace defaults. Encryption is
//! on unless explicitly disabled, and disabling it is the only way to
//! get a plaintext session: the SDK never downgrades on its own.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

/// Default similarity threshold for RAG context retrieval.
pub const DEFAULT_RAG_THRESHOLD: f32 = 0.7;

/// Default number of context chunks retrieved per question.
pub const DEFAULT_RAG_TOP_K: usize = 5;

/// Reference to a persisted vector database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDbRef {
    pub manifest_path: String,
    pub user_address: String,
}

/// Retrieval-augmented generation settings for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub threshold: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            top_k: DEFAULT_RAG_TOP_K,
            threshold: DEFAULT_RAG_THRESHOLD,
        }
    }
}

/// Configuration for [`start_session`].
///
/// [`start_session`]: crate::session::SessionManager::start_session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Network selector. Must be in the supported set.
    pub chain_id: u64,

    /// Model reference: a 32-byte hash (hex) or `"repo:filename"`.
    pub model: String,

    /// End-to-end encryption. Defaults to on.
    pub encryption: bool,

    /// Explicit host selection; when absent the directory picks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<Address>,

    /// Explicit API endpoint override for the chosen host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// ERC-20 payment token; `None` or the zero address means native.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_token: Option<Address>,

    /// Requested per-token price; the directory price is authoritative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_token: Option<U256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_amount: Option<U256>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_interval: Option<u64>,

    /// Requested session duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag_config: Option<RagConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_database: Option<VectorDbRef>,

    /// Optional cross-session grouping key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl SessionConfig {
    pub fn new(chain_id: u64, model: impl Into<String>) -> Self {
        Self {
            chain_id,
            model: model.into(),
            encryption: true,
            host: None,
            endpoint: None,
            payment_token: None,
            price_per_token: None,
            deposit_amount: None,
            proof_interval: None,
            duration: None,
            rag_config: None,
            vector_database: None,
            group_id: None,
        }
    }

    /// True when RAG is enabled and a vector database is referenced.
    pub fn rag_enabled(&self) -> bool {
        self.rag_config.as_ref().map(|c| c.enabled).unwrap_or(false)
    }
}
