// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session State
//!
//! One [`Session`] per conversation. The state machine only moves along
//! `pending → active → (paused ↔ active)* → (completed | ended | failed)`;
//! terminal states are immutable. The session exclusively owns its
//! symmetric key, and the outbound message index is strictly increasing,
//! rebound to zero only when the session is (re-)established on a
//! transport.

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};

use crate::config::VectorDbRef;
use crate::crypto::SessionKey;
use crate::error::{Result, SdkError};
use crate::model::ModelRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Paused,
    Completed,
    Ended,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Ended | SessionState::Failed
        )
    }

    /// Whether the state machine permits `self → next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Pending, Active) => true,
            (Active, Paused) => true,
            (Paused, Active) => true,
            (Active | Paused, Completed | Ended | Failed) => true,
            (Pending, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Active => "active",
            SessionState::Paused => "paused",
            SessionState::Completed => "completed",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        }
    }
}

/// A checkpoint the host has attested and the payment layer accepted.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub cumulative_tokens: u64,
    pub proof: Vec<u8>,
    pub submitted_at: DateTime<Utc>,
}

/// In-memory record of one conversation.
pub struct Session {
    pub session_id: U256,
    pub job_id: U256,
    pub chain_id: u64,
    pub host_address: Address,
    pub host_endpoint: Option<String>,
    pub model: ModelRef,
    pub price_per_token: U256,
    pub state: SessionState,
    pub encryption_enabled: bool,
    session_key: Option<SessionKey>,
    message_index: u64,
    pub prompts: Vec<String>,
    pub responses: Vec<String>,
    pub checkpoints: Vec<Checkpoint>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub vector_db_ref: Option<VectorDbRef>,
    pub group_id: Option<String>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: U256,
        job_id: U256,
        chain_id: u64,
        host_address: Address,
        host_endpoint: Option<String>,
        model: ModelRef,
        price_per_token: U256,
        encryption_enabled: bool,
    ) -> Self {
        Self {
            session_id,
            job_id,
            chain_id,
            host_address,
            host_endpoint,
            model,
            price_per_token,
            state: SessionState::Active,
            encryption_enabled,
            session_key: None,
            message_index: 0,
            prompts: Vec::new(),
            responses: Vec::new(),
            checkpoints: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            vector_db_ref: None,
            group_id: None,
        }
    }

    /// Move to `next`, rejecting transitions the machine does not allow.
    /// Entering a terminal state records the end time and destroys the
    /// session key.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(SdkError::InvalidState(format!(
                "{} -> {}",
                self.state.as_str(),
                next.as_str()
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
            self.session_key = None; // zeroized on drop
        }
        Ok(())
    }

    /// Bind a fresh session key and rebind the outbound message index to
    /// zero. Only valid at (re-)establishment.
    pub fn install_session_key(&mut self, key: SessionKey) {
        self.session_key = Some(key);
        self.message_index = 0;
    }

    /// The session key, or the key-missing error every encrypted
    /// operation must surface when establishment has not happened.
    pub fn session_key(&self) -> Result<&SessionKey> {
        self.session_key
            .as_ref()
            .ok_or_else(|| SdkError::EncryptionKeyMissing(self.session_id.to_string()))
    }

    pub fn has_session_key(&self) -> bool {
        self.session_key.is_some()
    }

    /// Current outbound index, then advance. Strictly monotonic per
    /// direction.
    pub fn next_message_index(&mut self) -> u64 {
        let index = self.message_index;
        self.message_index += 1;
        index
    }

    pub fn message_index(&self) -> u64 {
        self.message_index
    }

    /// Record an accepted checkpoint. Cumulative totals never decrease.
    pub fn add_checkpoint(&mut self, cumulative_tokens: u64, proof: Vec<u8>) -> Result<()> {
        if cumulative_tokens < self.total_tokens() {
            return Err(SdkError::InvalidParameter(format!(
                "checkpoint tokens {} below current total {}",
                cumulative_tokens,
                self.total_tokens()
            )));
        }
        self.checkpoints.push(Checkpoint {
            cumulative_tokens,
            proof,
            submitted_at: Utc::now(),
        });
        Ok(())
    }

    /// Cumulative token count from the latest checkpoint.
    pub fn total_tokens(&self) -> u64 {
        self.checkpoints
            .last()
            .map(|c| c.cumulative_tokens)
            .unwrap_or(0)
    }
}
