// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! End-to-End Encryption Primitives
//!
//! Cryptographic building blocks for the encrypted session channel
//! between the SDK and a compute host:
//!
//! - **keys**: point compression, EIP-55 addresses, the canonical signed
//!   digest, HKDF-SHA256 derivation
//! - **aead**: XChaCha20-Poly1305 authenticated encryption
//! - **ecies**: ephemeral-static envelope cipher for session init
//! - **recover**: sender identity recovery from envelope signatures
//!
//! ## Protocol Flow
//!
//! 1. SDK generates an ephemeral keypair and performs ECDH with the
//!    host's static public key
//! 2. SDK derives the envelope key with HKDF-SHA256
//! 3. SDK encrypts the session init payload (contains a random session
//!    key) and signs the envelope parameters with the wallet key
//! 4. Host performs the mirrored ECDH, decrypts, recovers and verifies
//!    the sender identity, and stores the session key
//! 5. All subsequent messages are XChaCha20-Poly1305 under the session
//!    key, with the message index bound into the AAD
//!
//! ## Security Considerations
//!
//! - Session keys live in memory only and are zeroized on drop
//! - Nonces are fresh random values per encryption operation
//! - Signatures are verified before any ciphertext is touched
//! - The AAD message index prevents replay and reordering

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod aead;
pub mod ecies;
pub mod keys;
pub mod recover;

pub use aead::{decrypt_with_aead, encrypt_with_aead, KEY_SIZE, NONCE_SIZE};
pub use ecies::{decrypt, encrypt, EciesEnvelope, EciesOptions, ECIES_ALG};
pub use keys::{compress_pubkey, eip55_checksum, hkdf_32, pubkey_to_address, sig_message};
pub use recover::{recover_sender_address, recover_sender_pubkey};

use crate::error::{Result, SdkError};

/// 32-byte symmetric session key.
///
/// Generated fresh by the client at session init, transported to the
/// host inside the encrypted init envelope, and used for all streaming
/// messages of that session. Owned exclusively by its session; zeroized
/// on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Generate a fresh random session key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from hex, with or without a 0x prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 32 {
            return Err(SdkError::InvalidKey {
                key_type: "session_key".to_string(),
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "SessionKey(..)")
    }
}
