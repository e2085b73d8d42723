// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Encryption Manager
//!
//! Wallet-bound identity and the encryption operations a session needs:
//! session-init envelopes, per-message streaming encryption with the
//! message index bound into the AAD, and self-addressed storage
//! envelopes for the persistence layer.
//!
//! ## Identity construction paths
//!
//! The static keypair can be built four ways; cross-tab and cross-device
//! consistency for a given user holds only within one variant:
//!
//! - **Wallet**: the wallet's private key is available directly.
//! - **SeedDerived**: `sha256(seed || "fabstir-encryption-key-from-s5-seed-v1")`,
//!   for callers sharing identity with the persistent-storage layer.
//! - **SignatureDerived**: the wallet signs a fixed message once; the
//!   signature bytes are hashed into a deterministic private key.
//! - **AddressDerived**: address + chain id hashed under a fixed domain
//!   separator, for wallets with no signing capability (passkeys).
//!
//! The manager exclusively owns the static private key. It is zeroized
//! on drop and transient copies are scrubbed on every path.

use chrono::Utc;
use ethers::types::U256;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;
use rand::{rngs::OsRng, RngCore};
use serde_json::Value;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::config::VectorDbRef;
use crate::crypto::{
    ecies, pubkey_to_address, recover_sender_address, EciesEnvelope, EciesOptions, SessionKey,
    NONCE_SIZE,
};
use crate::error::{Result, SdkError};
use crate::transport::frames::EncryptedMessage;

/// Domain suffix for seed-derived keys. Shared with the storage layer;
/// changing it orphans existing identities.
pub const SEED_KEY_DOMAIN: &str = "fabstir-encryption-key-from-s5-seed-v1";

/// Fixed message a wallet signs to derive a deterministic key.
pub const SIGNATURE_KEY_MESSAGE: &str = "fabstir-llm-sdk: derive encryption key v1";

/// Domain separator for address-derived keys (passkey wallets).
pub const ADDRESS_KEY_DOMAIN: &str = "fabstir-llm-sdk-address-key-v1";

/// How the static identity key was constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Wallet,
    SeedDerived,
    SignatureDerived,
    AddressDerived,
}

/// Wallet-bound encryption identity and session crypto operations.
pub struct EncryptionManager {
    signing_key: SigningKey,
    public_key: PublicKey,
    address: String,
    kind: IdentityKind,
}

impl EncryptionManager {
    /// Construct from a wallet private key (32 bytes).
    pub fn from_private_key(private_key: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(private_key).map_err(|e| SdkError::InvalidKey {
                key_type: "wallet_private_key".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::build(signing_key, IdentityKind::Wallet))
    }

    /// Construct from a storage-layer seed.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut material = Vec::with_capacity(seed.len() + SEED_KEY_DOMAIN.len());
        material.extend_from_slice(seed);
        material.extend_from_slice(SEED_KEY_DOMAIN.as_bytes());
        let key = derive_signing_key(&material);
        material.zeroize();
        Self::build(key, IdentityKind::SeedDerived)
    }

    /// Construct from a wallet signature over [`SIGNATURE_KEY_MESSAGE`].
    pub fn from_wallet_signature(signature: &[u8]) -> Result<Self> {
        if signature.is_empty() {
            return Err(SdkError::InvalidParameter(
                "empty wallet signature".to_string(),
            ));
        }
        Ok(Self::build(
            derive_signing_key(signature),
            IdentityKind::SignatureDerived,
        ))
    }

    /// Construct from an address and chain id (no signing capability).
    pub fn from_address(address: &str, chain_id: u64) -> Result<Self> {
        if address.trim_start_matches("0x").len() != 40 {
            return Err(SdkError::InvalidParameter(format!(
                "invalid address: {}",
                address
            )));
        }
        let material = format!(
            "{}|{}|{}",
            ADDRESS_KEY_DOMAIN,
            address.to_lowercase(),
            chain_id
        );
        Ok(Self::build(
            derive_signing_key(material.as_bytes()),
            IdentityKind::AddressDerived,
        ))
    }

    fn build(signing_key: SigningKey, kind: IdentityKind) -> Self {
        let public_key = PublicKey::from(signing_key.verifying_key());
        let address = pubkey_to_address(&public_key);
        Self {
            signing_key,
            public_key,
            address,
            kind,
        }
    }

    /// EIP-55 address of this identity.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Compressed static public key (33 bytes).
    pub fn public_key(&self) -> [u8; 33] {
        let point = self.public_key.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn identity_kind(&self) -> IdentityKind {
        self.kind
    }

    /// Encrypt a session-init payload for the host.
    ///
    /// Uses the envelope cipher with the wire-default salt (32 zero
    /// bytes) and empty info; this must not change without a protocol
    /// version bump.
    pub fn session_init_encrypt(
        &self,
        host_pub: &[u8],
        payload: &SessionInitPayload,
    ) -> Result<EciesEnvelope> {
        let json = payload.to_json_string();
        self.with_private_key(|priv_bytes| {
            ecies::encrypt(host_pub, priv_bytes, json.as_bytes(), &EciesOptions::default())
        })
    }

    /// Decrypt a session-init envelope addressed to this identity and
    /// recover the sender's EVM address.
    pub fn session_init_decrypt(
        &self,
        envelope: &EciesEnvelope,
    ) -> Result<(SessionInitPayload, String)> {
        let own_pub = self.public_key();
        let plaintext = self.with_private_key(|priv_bytes| {
            ecies::decrypt(priv_bytes, &own_pub, envelope)
        })?;
        let payload = SessionInitPayload::from_json_slice(&plaintext)?;
        let sender = recover_sender_address(envelope, &own_pub)?;
        Ok((payload, sender))
    }

    /// Encrypt one streaming message under the session key.
    ///
    /// The AAD is the bytes of `"message_" || decimal(message_index)`,
    /// binding the monotonic index to the ciphertext for replay
    /// protection.
    pub fn message_encrypt(
        &self,
        session_key: &SessionKey,
        text: &str,
        message_index: u64,
    ) -> Result<EncryptedMessage> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let aad = format!("message_{}", message_index);

        let ciphertext = crate::crypto::encrypt_with_aead(
            text.as_bytes(),
            &nonce,
            aad.as_bytes(),
            session_key.as_bytes(),
        )?;

        Ok(EncryptedMessage {
            ciphertext_hex: hex::encode(ciphertext),
            nonce_hex: hex::encode(nonce),
            aad_hex: hex::encode(aad.as_bytes()),
        })
    }

    /// Decrypt one streaming message under the session key.
    ///
    /// The payload carries its own AAD bytes; a tag mismatch is a hard
    /// error here, and the streaming loop decides whether to recover.
    pub fn message_decrypt(
        &self,
        session_key: &SessionKey,
        message: &EncryptedMessage,
    ) -> Result<String> {
        let ciphertext = hex::decode(&message.ciphertext_hex)?;
        let nonce = hex::decode(&message.nonce_hex)?;
        let aad = if message.aad_hex.is_empty() {
            Vec::new()
        } else {
            hex::decode(&message.aad_hex)?
        };

        let plaintext = crate::crypto::decrypt_with_aead(
            &ciphertext,
            &nonce,
            &aad,
            session_key.as_bytes(),
        )?;

        String::from_utf8(plaintext).map_err(|e| SdkError::DecryptionFailed {
            operation: "message".to_string(),
            reason: format!("plaintext is not valid UTF-8: {}", e),
        })
    }

    /// Encrypt a blob for the persistence layer, self-addressed.
    ///
    /// Adds a random 16-byte storage ID and an ISO-8601 creation
    /// timestamp as metadata.
    pub fn storage_encrypt(&self, plaintext: &[u8]) -> Result<StorageEnvelope> {
        let own_pub = self.public_key();
        let envelope = self.with_private_key(|priv_bytes| {
            ecies::encrypt(&own_pub, priv_bytes, plaintext, &EciesOptions::default())
        })?;

        let mut storage_id = [0u8; 16];
        OsRng.fill_bytes(&mut storage_id);

        Ok(StorageEnvelope {
            envelope,
            storage_id: hex::encode(storage_id),
            created_at: Utc::now().to_rfc3339(),
        })
    }

    /// Decrypt a storage envelope created by [`storage_encrypt`].
    ///
    /// [`storage_encrypt`]: EncryptionManager::storage_encrypt
    pub fn storage_decrypt(&self, stored: &StorageEnvelope) -> Result<Vec<u8>> {
        let own_pub = self.public_key();
        self.with_private_key(|priv_bytes| ecies::decrypt(priv_bytes, &own_pub, &stored.envelope))
    }

    /// Run `f` with a transient copy of the private key, scrubbed before
    /// this call returns on both success and failure paths.
    fn with_private_key<T>(&self, f: impl FnOnce(&[u8]) -> Result<T>) -> Result<T> {
        let mut priv_bytes = [0u8; 32];
        priv_bytes.copy_from_slice(&self.signing_key.to_bytes());
        let result = f(&priv_bytes);
        priv_bytes.zeroize();
        result
    }
}

impl std::fmt::Debug for EncryptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionManager")
            .field("address", &self.address)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Hash arbitrary material into a valid secp256k1 signing key.
///
/// Re-hashes deterministically in the (cosmically unlikely) case the
/// digest falls outside the scalar field.
fn derive_signing_key(material: &[u8]) -> SigningKey {
    let mut digest: [u8; 32] = Sha256::digest(material).into();
    loop {
        match SigningKey::from_slice(&digest) {
            Ok(key) => {
                digest.zeroize();
                return key;
            }
            Err(_) => {
                let next: [u8; 32] = Sha256::digest(digest).into();
                digest.zeroize();
                digest = next;
            }
        }
    }
}

/// Session-init payload carried inside the init envelope.
///
/// Serialized as JSON with arbitrary-precision integers encoded as
/// `"<digits>n"` so the decoder can round-trip them losslessly.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInitPayload {
    /// Fresh 32-byte session key, hex-encoded on the wire.
    pub session_key_hex: String,
    pub job_id: U256,
    pub model_name: String,
    pub price_per_token: U256,
    pub vector_db: Option<VectorDbRef>,
}

impl SessionInitPayload {
    pub fn to_json_string(&self) -> String {
        let mut obj = serde_json::json!({
            "sessionKey": self.session_key_hex,
            "jobId": bigint_sentinel(self.job_id),
            "modelName": self.model_name,
            "pricePerToken": bigint_sentinel(self.price_per_token),
        });
        if let Some(ref db) = self.vector_db {
            obj["vectorDb"] = serde_json::to_value(db).unwrap_or(Value::Null);
        }
        obj.to_string()
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let obj = value.as_object().ok_or_else(|| SdkError::InvalidPayload {
            field: "session_init".to_string(),
            reason: "not a JSON object".to_string(),
        })?;

        let session_key_hex = obj
            .get("sessionKey")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::InvalidPayload {
                field: "sessionKey".to_string(),
                reason: "missing or not a string".to_string(),
            })?
            .to_string();

        let model_name = obj
            .get("modelName")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::InvalidPayload {
                field: "modelName".to_string(),
                reason: "missing or not a string".to_string(),
            })?
            .to_string();

        let job_id = parse_bigint(obj.get("jobId"), "jobId")?;
        let price_per_token = parse_bigint(obj.get("pricePerToken"), "pricePerToken")?;

        let vector_db = match obj.get("vectorDb") {
            Some(Value::Null) | None => None,
            Some(v) => Some(serde_json::from_value(v.clone())?),
        };

        Ok(Self {
            session_key_hex,
            job_id,
            model_name,
            price_per_token,
            vector_db,
        })
    }
}

/// Self-addressed envelope for the persistence layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StorageEnvelope {
    pub envelope: EciesEnvelope,
    #[serde(rename = "storageId")]
    pub storage_id: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// Encode an arbitrary-precision integer with the trailing-`n` sentinel.
fn bigint_sentinel(value: U256) -> String {
    format!("{}n", value)
}

/// Parse a bigint field, accepting the `"<digits>n"` sentinel, a plain
/// decimal string, or a JSON number.
fn parse_bigint(value: Option<&Value>, field: &str) -> Result<U256> {
    match value {
        Some(Value::String(s)) => {
            let digits = s.strip_suffix('n').unwrap_or(s);
            U256::from_dec_str(digits).map_err(|e| SdkError::InvalidPayload {
                field: field.to_string(),
                reason: format!("invalid bigint: {}", e),
            })
        }
        Some(Value::Number(n)) => {
            let as_u64 = n.as_u64().ok_or_else(|| SdkError::InvalidPayload {
                field: field.to_string(),
                reason: "number is not a non-negative integer".to_string(),
            })?;
            Ok(U256::from(as_u64))
        }
        _ => Err(SdkError::InvalidPayload {
            field: field.to_string(),
            reason: "missing bigint field".to_string(),
        }),
    }
}
