// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! SDK Error Types
//!
//! One enum covers the whole client surface so callers can match on
//! protocol-level failures without digging through wrapped error chains.
//!
//! Propagation policy:
//!
//! - `PricingValidation` is surfaced verbatim and must never be wrapped
//!   into another variant.
//! - `DecryptionFailed` on a streamed chunk is recovered locally by the
//!   streaming loop (logged and skipped); at session init it is fatal.
//! - Encrypted sessions never silently downgrade to plaintext: a missing
//!   session key is `EncryptionKeyMissing`, full stop.

use std::time::Duration;

use ethers::types::U256;
use thiserror::Error;

/// Result alias used throughout the SDK.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Errors produced by the session protocol and its sub-protocols.
#[derive(Debug, Error)]
pub enum SdkError {
    #[error("SDK not initialized")]
    NotInitialized,

    #[error("Unsupported chain ID: {0}")]
    UnsupportedChain(u64),

    #[error("Missing chain ID")]
    MissingChainId,

    #[error("Invalid model ID: {0}")]
    InvalidModelId(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No hosts available for model {model} on chain {chain_id}")]
    NoHostsAvailable { chain_id: u64, model: String },

    /// Price outside the allowed range for its token class.
    ///
    /// Never wrapped: this must reach the caller exactly as raised.
    #[error("Invalid {kind} price {price}: allowed range [{min}, {max}]")]
    PricingValidation {
        kind: &'static str,
        price: U256,
        min: u128,
        max: u128,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {session_id} is not active (state: {state})")]
    SessionNotActive { session_id: String, state: String },

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Encryption not available: {0}")]
    EncryptionNotAvailable(String),

    #[error("Encryption key missing for session {0}")]
    EncryptionKeyMissing(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Host address mismatch: recovered {recovered}, expected {expected}")]
    HostAddressMismatch { recovered: String, expected: String },

    #[error("Decryption failed during {operation}: {reason}")]
    DecryptionFailed { operation: String, reason: String },

    #[error("Response timed out after {0:?} of inactivity")]
    ResponseTimeout(Duration),

    #[error("Request failed: {0}")]
    RequestError(String),

    #[error("Vector search failed: {0}")]
    SearchError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid cryptographic key material (wrong size, invalid point).
    #[error("Invalid key ({key_type}): {reason}")]
    InvalidKey { key_type: String, reason: String },

    /// Malformed wire payload (missing field, bad hex, wrong size).
    #[error("Invalid payload field '{field}': {reason}")]
    InvalidPayload { field: String, reason: String },
}

impl From<hex::FromHexError> for SdkError {
    fn from(err: hex::FromHexError) -> Self {
        SdkError::InvalidPayload {
            field: "hex".to_string(),
            reason: format!("hex decode error: {}", err),
        }
    }
}

impl From<reqwest::Error> for SdkError {
    fn from(err: reqwest::Error) -> Self {
        SdkError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::InvalidPayload {
            field: "json".to_string(),
            reason: err.to_string(),
        }
    }
}
