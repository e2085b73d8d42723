// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Envelope Sender Recovery
//!
//! Binds an encrypted envelope to an on-chain identity without prior key
//! exchange: the sender's compressed public key is recovered from the
//! envelope signature, the signature is re-verified against the
//! recovered key, and the EVM address is derived in EIP-55 form.

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;

use super::ecies::{parse_envelope, verify_envelope_signature, EciesEnvelope};
use super::keys::{compress_pubkey, pubkey_to_address};
use crate::error::Result;

/// Recover the sender's compressed public key from an envelope.
///
/// `recipient_pub` is the recipient's own public key, needed to rebuild
/// the signed digest.
pub fn recover_sender_pubkey(
    envelope: &EciesEnvelope,
    recipient_pub: &[u8],
) -> Result<[u8; 33]> {
    let recipient_compressed = compress_pubkey(recipient_pub)?;
    let parsed = parse_envelope(envelope)?;
    let verifying_key = verify_envelope_signature(&parsed, &recipient_compressed)?;

    let point = verifying_key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(point.as_bytes());
    Ok(out)
}

/// Recover the sender's EVM address in EIP-55 form.
pub fn recover_sender_address(envelope: &EciesEnvelope, recipient_pub: &[u8]) -> Result<String> {
    let recipient_compressed = compress_pubkey(recipient_pub)?;
    let parsed = parse_envelope(envelope)?;
    let verifying_key = verify_envelope_signature(&parsed, &recipient_compressed)?;
    Ok(pubkey_to_address(&PublicKey::from(&verifying_key)))
}
