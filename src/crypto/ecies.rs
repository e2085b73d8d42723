// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Ephemeral-Static Envelope Cipher
//!
//! One-shot encryption of a payload between a sender identified by a
//! static secp256k1 key and a recipient's static public key, using a
//! fresh ephemeral key per envelope:
//!
//! 1. ECDH between the ephemeral secret and the recipient's static key;
//!    the shared X-coordinate is the HKDF input keying material.
//! 2. HKDF-SHA256 derives the XChaCha20-Poly1305 key.
//! 3. The sender signs a canonical digest binding every cryptographic
//!    parameter of the envelope (see [`sig_message`]), so a receiver can
//!    recover and authenticate the sender without prior key exchange.
//!
//! The envelope is self-describing: all parameters travel with it as
//! lowercase hex fields. The `alg` tag is informational only and never
//! influences key derivation.

use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey, SecretKey,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::aead::{decrypt_with_aead, encrypt_with_aead, NONCE_SIZE};
use super::keys::{compress_pubkey, hkdf_32, sig_message, HKDF_DEFAULT_SALT};
use crate::error::{Result, SdkError};

/// Informational algorithm tag carried in every envelope.
pub const ECIES_ALG: &str = "secp256k1-ecdh(ephemeral→static)+hkdf(sha256)+xchacha20-poly1305";

/// Self-describing encrypted envelope, wire shape.
///
/// All byte fields are lowercase hex without a 0x prefix. `recid` is
/// redundant with the last byte of `signatureHex` and kept for
/// compatibility with older decoders; both are emitted, either is
/// accepted. An envelope that omits `recid` entirely falls back to the
/// signature's embedded recovery byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EciesEnvelope {
    /// Sender's ephemeral public key, 33-byte compressed form.
    #[serde(rename = "ephPubHex")]
    pub eph_pub_hex: String,
    /// HKDF salt, 32 bytes.
    #[serde(rename = "saltHex")]
    pub salt_hex: String,
    /// AEAD nonce, 24 bytes.
    #[serde(rename = "nonceHex")]
    pub nonce_hex: String,
    /// Ciphertext with the 16-byte tag appended.
    #[serde(rename = "ciphertextHex")]
    pub ciphertext_hex: String,
    /// 65-byte signature: r ‖ s ‖ recovery_id.
    #[serde(rename = "signatureHex")]
    pub signature_hex: String,
    /// Recovery ID, redundant with the final signature byte. Absent on
    /// envelopes from encoders that rely on the signature byte alone.
    #[serde(default)]
    pub recid: Option<u8>,
    /// Informational algorithm tag.
    pub alg: String,
    /// HKDF info as a UTF-8 string; empty string for the wire default.
    pub info: String,
    /// Additional authenticated data; empty string if none.
    #[serde(rename = "aadHex")]
    pub aad_hex: String,
}

/// Optional parameters for [`encrypt`].
///
/// Unset fields take the wire defaults: empty AAD, empty info, 32 zero
/// bytes of salt, random nonce.
#[derive(Debug, Clone, Default)]
pub struct EciesOptions {
    pub aad: Option<Vec<u8>>,
    pub info: Option<Vec<u8>>,
    pub salt: Option<[u8; 32]>,
    pub nonce: Option<[u8; 24]>,
}

/// Fields parsed out of an envelope, sizes already validated.
pub(crate) struct ParsedEnvelope {
    pub eph_pub: [u8; 33],
    pub salt: Vec<u8>,
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub signature: [u8; 64],
    pub recovery_id: RecoveryId,
    pub info: Vec<u8>,
    pub aad: Vec<u8>,
}

/// Encrypt `plaintext` for `recipient_pub` and sign the envelope with
/// the sender's static private key.
///
/// # Arguments
///
/// * `recipient_pub` - Recipient's static public key (33 or 65 bytes)
/// * `sender_static_priv` - Sender's static private key (32 bytes)
/// * `plaintext` - Payload to encrypt
/// * `opts` - AAD/info/salt/nonce overrides; defaults are wire-normative
pub fn encrypt(
    recipient_pub: &[u8],
    sender_static_priv: &[u8],
    plaintext: &[u8],
    opts: &EciesOptions,
) -> Result<EciesEnvelope> {
    let recipient_compressed = compress_pubkey(recipient_pub)?;
    let recipient = PublicKey::from_sec1_bytes(&recipient_compressed).map_err(|e| {
        SdkError::InvalidKey {
            key_type: "recipient_public_key".to_string(),
            reason: e.to_string(),
        }
    })?;

    let signing_key =
        SigningKey::from_slice(sender_static_priv).map_err(|e| SdkError::InvalidKey {
            key_type: "sender_private_key".to_string(),
            reason: e.to_string(),
        })?;

    // Fresh ephemeral keypair for this envelope only
    let eph_secret = SecretKey::random(&mut OsRng);
    let eph_pub = eph_secret.public_key();
    let eph_pub_compressed: [u8; 33] = {
        let point = eph_pub.to_encoded_point(true);
        let mut out = [0u8; 33];
        out.copy_from_slice(point.as_bytes());
        out
    };

    let shared =
        k256::ecdh::diffie_hellman(eph_secret.to_nonzero_scalar(), recipient.as_affine());
    drop(eph_secret); // scalar zeroized on drop

    let salt = opts.salt.unwrap_or(HKDF_DEFAULT_SALT);
    let info = opts.info.clone().unwrap_or_default();
    let aad = opts.aad.clone().unwrap_or_default();
    let nonce = opts.nonce.unwrap_or_else(|| {
        let mut n = [0u8; 24];
        OsRng.fill_bytes(&mut n);
        n
    });

    let mut key = hkdf_32(shared.raw_secret_bytes(), &salt, &info)?;
    let ciphertext = match encrypt_with_aead(plaintext, &nonce, &aad, &key) {
        Ok(ct) => {
            key.zeroize();
            ct
        }
        Err(e) => {
            key.zeroize();
            return Err(e);
        }
    };

    let msg = sig_message(
        &eph_pub_compressed,
        &recipient_compressed,
        &salt,
        &nonce,
        &info,
        &aad,
    );

    let (signature, recovery_id) = signing_key
        .sign_prehash_recoverable(&msg)
        .map_err(|e| SdkError::SignatureVerificationFailed(format!("signing failed: {}", e)))?;

    let mut sig_bytes = [0u8; 65];
    sig_bytes[..64].copy_from_slice(&signature.to_bytes());
    sig_bytes[64] = recovery_id.to_byte();

    Ok(EciesEnvelope {
        eph_pub_hex: hex::encode(eph_pub_compressed),
        salt_hex: hex::encode(salt),
        nonce_hex: hex::encode(nonce),
        ciphertext_hex: hex::encode(&ciphertext),
        signature_hex: hex::encode(sig_bytes),
        recid: Some(recovery_id.to_byte()),
        alg: ECIES_ALG.to_string(),
        info: String::from_utf8_lossy(&info).into_owned(),
        aad_hex: hex::encode(&aad),
    })
}

/// Decrypt an envelope addressed to the holder of `recipient_static_priv`.
///
/// Recovers the sender's public key from the signature, re-verifies the
/// signature against the recovered key, then derives the AEAD key
/// identically to the encrypt side. Any signature failure, tag mismatch
/// or malformed field fails the whole operation.
pub fn decrypt(
    recipient_static_priv: &[u8],
    recipient_static_pub: &[u8],
    envelope: &EciesEnvelope,
) -> Result<Vec<u8>> {
    let recipient_compressed = compress_pubkey(recipient_static_pub)?;
    let parsed = parse_envelope(envelope)?;

    // Authenticate the sender before touching the ciphertext
    verify_envelope_signature(&parsed, &recipient_compressed)?;

    let recipient_secret =
        SecretKey::from_slice(recipient_static_priv).map_err(|e| SdkError::InvalidKey {
            key_type: "recipient_private_key".to_string(),
            reason: e.to_string(),
        })?;

    let eph_pub = PublicKey::from_sec1_bytes(&parsed.eph_pub).map_err(|e| SdkError::InvalidKey {
        key_type: "ephemeral_public_key".to_string(),
        reason: e.to_string(),
    })?;

    let shared =
        k256::ecdh::diffie_hellman(recipient_secret.to_nonzero_scalar(), eph_pub.as_affine());

    let mut key = hkdf_32(shared.raw_secret_bytes(), &parsed.salt, &parsed.info)?;
    let result = decrypt_with_aead(&parsed.ciphertext, &parsed.nonce, &parsed.aad, &key);
    key.zeroize();

    result.map_err(|_| SdkError::DecryptionFailed {
        operation: "envelope".to_string(),
        reason: "authentication tag verification failed".to_string(),
    })
}

/// Parse and size-check every envelope field.
pub(crate) fn parse_envelope(envelope: &EciesEnvelope) -> Result<ParsedEnvelope> {
    let eph_pub_bytes = hex::decode(&envelope.eph_pub_hex)?;
    let eph_pub = compress_pubkey(&eph_pub_bytes)?;

    let salt = hex::decode(&envelope.salt_hex)?;
    if salt.len() != 32 {
        return Err(SdkError::InvalidPayload {
            field: "saltHex".to_string(),
            reason: format!("expected 32 bytes, got {}", salt.len()),
        });
    }

    let nonce = hex::decode(&envelope.nonce_hex)?;
    if nonce.len() != NONCE_SIZE {
        return Err(SdkError::InvalidPayload {
            field: "nonceHex".to_string(),
            reason: format!("expected {} bytes, got {}", NONCE_SIZE, nonce.len()),
        });
    }

    let ciphertext = hex::decode(&envelope.ciphertext_hex)?;
    if ciphertext.is_empty() {
        return Err(SdkError::InvalidPayload {
            field: "ciphertextHex".to_string(),
            reason: "empty ciphertext".to_string(),
        });
    }

    let sig_bytes = hex::decode(&envelope.signature_hex)?;
    if sig_bytes.len() != 65 {
        return Err(SdkError::InvalidPayload {
            field: "signatureHex".to_string(),
            reason: format!("expected 65 bytes, got {}", sig_bytes.len()),
        });
    }

    let mut signature = [0u8; 64];
    signature.copy_from_slice(&sig_bytes[..64]);

    // Both the signature's 65th byte and the redundant `recid` field are
    // emitted; either is accepted. An absent field falls back to the
    // signature byte, and when both are present they must agree.
    // Ethereum-style 27/28 values are normalized to 0/1.
    let mut recid_byte = sig_bytes[64];
    if recid_byte >= 27 {
        recid_byte -= 27;
    }
    if recid_byte > 3 {
        return Err(SdkError::InvalidPayload {
            field: "signatureHex".to_string(),
            reason: format!("invalid recovery ID: {}", recid_byte),
        });
    }
    if let Some(field) = envelope.recid {
        let recid_field = if field >= 27 { field - 27 } else { field };
        if recid_field != recid_byte {
            return Err(SdkError::SignatureVerificationFailed(format!(
                "recovery ID mismatch: signature carries {}, recid field {}",
                recid_byte, recid_field
            )));
        }
    }
    let recovery_id = RecoveryId::try_from(recid_byte).map_err(|e| SdkError::InvalidPayload {
        field: "recid".to_string(),
        reason: e.to_string(),
    })?;

    // Empty AAD and absent AAD are the same thing on the wire
    let aad = if envelope.aad_hex.is_empty() {
        Vec::new()
    } else {
        hex::decode(&envelope.aad_hex)?
    };

    Ok(ParsedEnvelope {
        eph_pub,
        salt,
        nonce,
        ciphertext,
        signature,
        recovery_id,
        info: envelope.info.as_bytes().to_vec(),
        aad,
    })
}

/// Recover the sender's key from the envelope signature and re-verify
/// the signature against the recovered key.
///
/// The recovery step alone would accept some malformed signatures; the
/// explicit re-verification closes that gap.
pub(crate) fn verify_envelope_signature(
    parsed: &ParsedEnvelope,
    recipient_compressed: &[u8; 33],
) -> Result<VerifyingKey> {
    let msg = sig_message(
        &parsed.eph_pub,
        recipient_compressed,
        &parsed.salt,
        &parsed.nonce,
        &parsed.info,
        &parsed.aad,
    );

    let signature = Signature::try_from(&parsed.signature[..]).map_err(|e| {
        SdkError::SignatureVerificationFailed(format!("failed to parse signature: {}", e))
    })?;

    let verifying_key = VerifyingKey::recover_from_prehash(&msg, &signature, parsed.recovery_id)
        .map_err(|e| {
            SdkError::SignatureVerificationFailed(format!("public key recovery failed: {}", e))
        })?;

    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    verifying_key
        .verify_prehash(&msg, &signature)
        .map_err(|e| {
            SdkError::SignatureVerificationFailed(format!(
                "signature does not match recovered key: {}",
                e
            ))
        })?;

    Ok(verifying_key)
}
