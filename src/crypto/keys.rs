// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Key Codecs and Derivation Primitives
//!
//! Point compression, EIP-55 address derivation, the canonical
//! signature-message builder for the envelope cipher, and HKDF-SHA256
//! key derivation. The signature-message layout and the HKDF defaults
//! are wire-normative: both endpoints must compute byte-identical
//! values or session init fails.

use hkdf::Hkdf;
use k256::{
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
    EncodedPoint, PublicKey,
};
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::error::{Result, SdkError};

/// Default HKDF salt: 32 zero bytes. Wire-normative.
pub const HKDF_DEFAULT_SALT: [u8; 32] = [0u8; 32];

/// Domain prefix of the canonical signature message. Wire-normative.
const SIG_MESSAGE_PREFIX: &[u8] = b"E2EEv1|";

/// Compress a secp256k1 public key to its 33-byte SEC1 form.
///
/// Accepts 33-byte compressed or 65-byte uncompressed input and rejects
/// any other length or any byte string that is not a valid curve point.
///
/// # Returns
///
/// Exactly 33 bytes starting with 0x02 or 0x03.
pub fn compress_pubkey(bytes: &[u8]) -> Result<[u8; 33]> {
    if bytes.len() != 33 && bytes.len() != 65 {
        return Err(SdkError::InvalidKey {
            key_type: "public_key".to_string(),
            reason: format!("expected 33 or 65 bytes, got {}", bytes.len()),
        });
    }

    let encoded = EncodedPoint::from_bytes(bytes).map_err(|e| SdkError::InvalidKey {
        key_type: "public_key".to_string(),
        reason: format!("failed to parse SEC1 encoding: {}", e),
    })?;

    let pubkey = PublicKey::from_encoded_point(&encoded);
    let pubkey: PublicKey = if pubkey.is_some().into() {
        pubkey.unwrap()
    } else {
        return Err(SdkError::InvalidKey {
            key_type: "public_key".to_string(),
            reason: "not a valid curve point".to_string(),
        });
    };

    let compressed = pubkey.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(compressed.as_bytes());
    Ok(out)
}

/// Derive the EIP-55 checksummed EVM address of a public key.
///
/// Drops the 0x04 prefix of the uncompressed form, hashes the remaining
/// 64 coordinate bytes with Keccak-256 and takes the low-order 20 bytes.
pub fn pubkey_to_address(pubkey: &PublicKey) -> String {
    let uncompressed = pubkey.to_encoded_point(false);
    let bytes = uncompressed.as_bytes();

    let mut hasher = Keccak::v256();
    let mut hash = [0u8; 32];
    hasher.update(&bytes[1..]); // Skip the 0x04 prefix
    hasher.finalize(&mut hash);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    eip55_checksum(&address)
}

/// Apply EIP-55 mixed-case checksumming to a raw 20-byte address.
///
/// Idempotent: re-checksumming a checksummed address produces the same
/// string, because casing is a function of the lowercase hex only.
pub fn eip55_checksum(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);

    let mut hasher = Keccak::v256();
    let mut hash = [0u8; 32];
    hasher.update(lower.as_bytes());
    hasher.finalize(&mut hash);

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Build the canonical 32-byte digest signed by the envelope sender.
///
/// SHA-256 over `"E2EEv1|" || eph_pub || "|" || recipient_pub || "|" ||
/// salt || "|" || nonce || "|" || info`, with `|| "|" || aad` appended
/// iff `aad` is non-empty. Field order and separators are wire-normative;
/// changing them is a protocol version bump.
pub fn sig_message(
    eph_pub: &[u8],
    recipient_pub: &[u8],
    salt: &[u8],
    nonce: &[u8],
    info: &[u8],
    aad: &[u8],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SIG_MESSAGE_PREFIX);
    hasher.update(eph_pub);
    hasher.update(b"|");
    hasher.update(recipient_pub);
    hasher.update(b"|");
    hasher.update(salt);
    hasher.update(b"|");
    hasher.update(nonce);
    hasher.update(b"|");
    hasher.update(info);
    if !aad.is_empty() {
        hasher.update(b"|");
        hasher.update(aad);
    }
    hasher.finalize().into()
}

/// Expand input keying material to a 32-byte key with HKDF-SHA256.
///
/// The defaults (32 zero bytes of salt, empty info) are wire-normative
/// for interoperability with deployed hosts; callers may override, but
/// both endpoints must agree.
pub fn hkdf_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|e| SdkError::InvalidKey {
            key_type: "derived_key".to_string(),
            reason: format!("HKDF expand failed: {}", e),
        })?;
    Ok(okm)
}
