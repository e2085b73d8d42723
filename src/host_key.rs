// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Host Key Resolver
//!
//! Obtains a host's static public key, which the envelope cipher needs
//! before the first encrypted session init. Resolution order:
//!
//! 1. Process-wide cache keyed by host address (idempotent inserts).
//! 2. A key published in the host's directory record, validated as a
//!    curve point.
//! 3. A signed-challenge handshake against `POST /v1/auth/challenge`:
//!    the host signs the SHA-256 of a random 32-byte challenge, the key
//!    is recovered from the signature, re-verified, and its derived
//!    address must match the expected host address case-insensitively.
//!
//! A mismatch is fatal: there is no fallback to an unauthenticated key.

use std::collections::HashMap;
use std::sync::Arc;

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::crypto::{compress_pubkey, pubkey_to_address};
use crate::error::{Result, SdkError};

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    /// 64-byte r ‖ s signature over SHA-256 of the challenge, hex.
    signature: String,
    /// Recovery ID for the signature.
    recid: u8,
}

/// Resolver with a process-wide, read-mostly key cache.
#[derive(Clone, Default)]
pub struct HostKeyResolver {
    http: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, [u8; 33]>>>,
}

impl HostKeyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the host's compressed static public key.
    ///
    /// # Arguments
    ///
    /// * `host_address` - Expected EVM address of the host
    /// * `api_url` - Base URL of the host's HTTP API, for the handshake
    /// * `directory_key` - Public key from the directory record, if any
    pub async fn resolve(
        &self,
        host_address: &str,
        api_url: Option<&str>,
        directory_key: Option<&[u8]>,
    ) -> Result<[u8; 33]> {
        let cache_key = host_address.to_lowercase();

        if let Some(key) = self.cache.read().await.get(&cache_key) {
            debug!("Host key cache hit for {}", host_address);
            return Ok(*key);
        }

        if let Some(bytes) = directory_key {
            let key = compress_pubkey(bytes)?;
            self.cache.write().await.insert(cache_key, key);
            debug!("Cached directory-provided key for {}", host_address);
            return Ok(key);
        }

        let api_url = api_url.ok_or_else(|| {
            SdkError::EncryptionNotAvailable(format!(
                "no public key or API endpoint known for host {}",
                host_address
            ))
        })?;

        let key = self.challenge_handshake(host_address, api_url).await?;
        self.cache.write().await.insert(cache_key, key);
        Ok(key)
    }

    /// Recover the host key via the signed-challenge handshake.
    async fn challenge_handshake(&self, host_address: &str, api_url: &str) -> Result<[u8; 33]> {
        let mut challenge = [0u8; 32];
        OsRng.fill_bytes(&mut challenge);

        let url = format!("{}/v1/auth/challenge", api_url.trim_end_matches('/'));
        info!("Requesting key challenge from {}", url);

        let response: ChallengeResponse = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "challenge": hex::encode(challenge) }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| SdkError::NetworkError(format!("challenge request failed: {}", e)))?
            .json()
            .await?;

        let verifying_key = recover_challenge_key(&challenge, &response)?;
        let recovered_address = pubkey_to_address(&PublicKey::from(&verifying_key));

        if !recovered_address.eq_ignore_ascii_case(host_address) {
            return Err(SdkError::HostAddressMismatch {
                recovered: recovered_address,
                expected: host_address.to_string(),
            });
        }

        let point = verifying_key.to_encoded_point(true);
        let mut key = [0u8; 33];
        key.copy_from_slice(point.as_bytes());
        info!("Host key recovered and verified for {}", host_address);
        Ok(key)
    }

    /// Number of cached host keys.
    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Recover and re-verify the host's key from a challenge response.
fn recover_challenge_key(
    challenge: &[u8; 32],
    response: &ChallengeResponse,
) -> Result<VerifyingKey> {
    let sig_bytes = hex::decode(&response.signature)?;
    if sig_bytes.len() != 64 {
        return Err(SdkError::InvalidPayload {
            field: "signature".to_string(),
            reason: format!("expected 64 bytes, got {}", sig_bytes.len()),
        });
    }

    let mut recid = response.recid;
    if recid >= 27 {
        recid -= 27;
    }
    let recovery_id = RecoveryId::try_from(recid).map_err(|_| SdkError::InvalidPayload {
        field: "recid".to_string(),
        reason: format!("invalid recovery ID: {}", response.recid),
    })?;

    let signature = Signature::try_from(&sig_bytes[..]).map_err(|e| {
        SdkError::SignatureVerificationFailed(format!("failed to parse signature: {}", e))
    })?;

    let digest: [u8; 32] = Sha256::digest(challenge).into();
    let verifying_key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id)
        .map_err(|e| {
            SdkError::SignatureVerificationFailed(format!("challenge recovery failed: {}", e))
        })?;

    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    verifying_key.verify_prehash(&digest, &signature).map_err(|e| {
        SdkError::SignatureVerificationFailed(format!(
            "challenge signature does not verify: {}",
            e
        ))
    })?;

    Ok(verifying_key)
}
