// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Payment Collaborator
//!
//! The blockchain payment layer is external to the SDK: session jobs,
//! checkpoint settlement and completion happen behind this trait. The
//! SDK only sees opaque 256-bit session/job identifiers and never
//! touches contracts directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, U256};

use crate::error::{Result, SdkError};

/// Identifiers minted by the payment layer for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionJob {
    pub session_id: U256,
    pub job_id: U256,
}

/// Periodic host attestation of a cumulative token count.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointProof {
    pub cumulative_tokens: u64,
    pub proof: Vec<u8>,
}

/// Parameters for creating a session job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub chain_id: u64,
    pub host: Address,
    pub model_id: ethers::types::H256,
    pub price_per_token: U256,
    pub payment_token: Option<Address>,
    pub deposit_amount: Option<U256>,
    pub proof_interval: Option<u64>,
    pub duration: Option<u64>,
}

#[async_trait]
pub trait PaymentClient: Send + Sync {
    /// Create an escrowed session job; returns the session and job IDs.
    async fn create_session_job(&self, request: &CreateJobRequest) -> Result<SessionJob>;

    /// Forward a checkpoint proof for settlement. The payment layer
    /// resolves the chain from the session it minted.
    async fn submit_checkpoint(&self, session_id: U256, proof: &CheckpointProof) -> Result<()>;

    /// Settle and close the session on-chain. Must be idempotent: the
    /// host may have settled first.
    async fn complete_session(
        &self,
        session_id: U256,
        total_tokens: u64,
        final_proof: &[u8],
    ) -> Result<()>;
}

/// In-memory payment client for tests and local development.
#[derive(Default)]
pub struct MockPaymentClient {
    next_id: AtomicU64,
    checkpoints: Mutex<HashMap<U256, Vec<CheckpointProof>>>,
    completed: Mutex<HashMap<U256, u64>>,
}

impl MockPaymentClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn checkpoint_count(&self, session_id: U256) -> usize {
        self.checkpoints
            .lock()
            .unwrap()
            .get(&session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn completed_tokens(&self, session_id: U256) -> Option<u64> {
        self.completed.lock().unwrap().get(&session_id).copied()
    }
}

#[async_trait]
impl PaymentClient for MockPaymentClient {
    async fn create_session_job(&self, request: &CreateJobRequest) -> Result<SessionJob> {
        if request.price_per_token.is_zero() {
            return Err(SdkError::InvalidParameter(
                "price_per_token must be positive".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SessionJob {
            session_id: U256::from(id),
            job_id: U256::from(id),
        })
    }

    async fn submit_checkpoint(&self, session_id: U256, proof: &CheckpointProof) -> Result<()> {
        self.checkpoints
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .push(proof.clone());
        Ok(())
    }

    async fn complete_session(
        &self,
        session_id: U256,
        total_tokens: u64,
        _final_proof: &[u8],
    ) -> Result<()> {
        // Idempotent on the chain side as well
        self.completed
            .lock()
            .unwrap()
            .insert(session_id, total_tokens);
        Ok(())
    }
}
