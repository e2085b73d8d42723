// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! XChaCha20-Poly1305 Encryption/Decryption
//!
//! Authenticated encryption with associated data. The 24-byte extended
//! nonce makes random nonce generation safe for the message volumes a
//! session produces; the 16-byte Poly1305 tag is appended to the
//! ciphertext.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::error::{Result, SdkError};

/// Nonce size required by XChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 24;

/// Key size required by XChaCha20-Poly1305.
pub const KEY_SIZE: usize = 32;

fn check_sizes(nonce: &[u8], key: &[u8]) -> Result<()> {
    if nonce.len() != NONCE_SIZE {
        return Err(SdkError::InvalidPayload {
            field: "nonce".to_string(),
            reason: format!("expected {} bytes, got {}", NONCE_SIZE, nonce.len()),
        });
    }
    if key.len() != KEY_SIZE {
        return Err(SdkError::InvalidKey {
            key_type: "aead_key".to_string(),
            reason: format!("expected {} bytes, got {}", KEY_SIZE, key.len()),
        });
    }
    Ok(())
}

/// Encrypt plaintext, appending the authentication tag.
///
/// **CRITICAL**: never reuse the same nonce with the same key. Callers
/// generate a fresh random 24-byte nonce per message.
pub fn encrypt_with_aead(
    plaintext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> Result<Vec<u8>> {
    check_sizes(nonce, key)?;

    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|e| SdkError::InvalidKey {
        key_type: "aead_key".to_string(),
        reason: e.to_string(),
    })?;

    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| SdkError::EncryptionNotAvailable("AEAD encryption failed".to_string()))
}

/// Decrypt ciphertext and verify its authentication tag.
///
/// Any tag mismatch (tampered ciphertext, wrong key, wrong AAD) fails
/// the whole operation.
pub fn decrypt_with_aead(
    ciphertext: &[u8],
    nonce: &[u8],
    aad: &[u8],
    key: &[u8],
) -> Result<Vec<u8>> {
    check_sizes(nonce, key)?;

    let cipher = XChaCha20Poly1305::new_from_slice(key).map_err(|e| SdkError::InvalidKey {
        key_type: "aead_key".to_string(),
        reason: e.to_string(),
    })?;

    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| SdkError::DecryptionFailed {
            operation: "aead".to_string(),
            reason: "authentication tag verification failed".to_string(),
        })
}
