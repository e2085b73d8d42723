// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Model Identifiers
//!
//! A model is referenced either by its 32-byte canonical hash or by a
//! `{repo, filename}` pair. The canonical hash of a named model is
//! `keccak256(repo || "/" || filename)`, matching the registry contract,
//! so both forms resolve to the same on-chain identity.

use ethers::types::H256;
use tiny_keccak::{Hasher, Keccak};

use crate::error::{Result, SdkError};

/// A model reference as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelRef {
    /// Canonical 32-byte model ID.
    Hash(H256),
    /// HuggingFace repository and filename, e.g.
    /// `bartowski/Llama-3-GGUF` / `llama-3-q4.gguf`.
    Named { repo: String, filename: String },
}

impl ModelRef {
    /// Parse a model string: `0x`-prefixed (or bare) 64-hex-char hash,
    /// or `"repo:filename"`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SdkError::InvalidModelId("empty model".to_string()));
        }

        let hex_candidate = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        if hex_candidate.len() == 64 && hex_candidate.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = hex::decode(hex_candidate)?;
            return Ok(ModelRef::Hash(H256::from_slice(&bytes)));
        }

        // Repo names may contain '/', filenames never contain ':'
        match trimmed.rsplit_once(':') {
            Some((repo, filename)) if !repo.is_empty() && !filename.is_empty() => {
                Ok(ModelRef::Named {
                    repo: repo.to_string(),
                    filename: filename.to_string(),
                })
            }
            _ => Err(SdkError::InvalidModelId(format!(
                "expected 32-byte hash or repo:filename, got '{}'",
                trimmed
            ))),
        }
    }

    /// Canonical 32-byte model ID.
    pub fn canonical_id(&self) -> H256 {
        match self {
            ModelRef::Hash(h) => *h,
            ModelRef::Named { repo, filename } => {
                let mut hasher = Keccak::v256();
                let mut hash = [0u8; 32];
                hasher.update(repo.as_bytes());
                hasher.update(b"/");
                hasher.update(filename.as_bytes());
                hasher.finalize(&mut hash);
                H256::from(hash)
            }
        }
    }

    /// Human-readable name for logs and the session-init payload.
    pub fn display_name(&self) -> String {
        match self {
            ModelRef::Hash(h) => format!("0x{}", hex::encode(h.as_bytes())),
            ModelRef::Named { repo, filename } => format!("{}/{}", repo, filename),
        }
    }
}
