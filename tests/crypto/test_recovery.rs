//! Session Init and Sender Recovery Tests
//!
//! The encrypted session-init payload carries the session key to the
//! host, and the envelope signature binds the payload to the client's
//! on-chain identity.

use ethers::types::U256;
use fabstir_llm_sdk::crypto::SessionKey;
use fabstir_llm_sdk::{EncryptionManager, SdkError, SessionInitPayload, VectorDbRef};

fn payload(key: &SessionKey) -> SessionInitPayload {
    SessionInitPayload {
        session_key_hex: key.to_hex(),
        job_id: U256::from_dec_str("18446744073709551617").unwrap(), // > u64::MAX
        model_name: "bartowski/Llama-3-GGUF/llama-3-q4.gguf".to_string(),
        price_per_token: U256::from(2_000u64),
        vector_db: None,
    }
}

#[test]
fn test_session_init_decrypt_recovers_client_address() {
    let client = EncryptionManager::from_seed(b"client wallet");
    let host = EncryptionManager::from_seed(b"host identity");

    let key = SessionKey::generate();
    let envelope = client
        .session_init_encrypt(&host.public_key(), &payload(&key))
        .unwrap();

    let (decoded, sender) = host.session_init_decrypt(&envelope).unwrap();
    assert_eq!(sender, client.address());
    assert_eq!(decoded.session_key_hex, key.to_hex());
    assert_eq!(
        decoded.job_id,
        U256::from_dec_str("18446744073709551617").unwrap()
    );
    assert_eq!(decoded.price_per_token, U256::from(2_000u64));
}

#[test]
fn test_session_init_carries_vector_db_reference() {
    let client = EncryptionManager::from_seed(b"client wallet");
    let host = EncryptionManager::from_seed(b"host identity");

    let key = SessionKey::generate();
    let mut p = payload(&key);
    p.vector_db = Some(VectorDbRef {
        manifest_path: "s5://manifests/docs.json".to_string(),
        user_address: client.address().to_string(),
    });

    let envelope = client
        .session_init_encrypt(&host.public_key(), &p)
        .unwrap();
    let (decoded, _) = host.session_init_decrypt(&envelope).unwrap();
    assert_eq!(decoded.vector_db, p.vector_db);
}

#[test]
fn test_bigint_sentinel_on_the_wire() {
    let key = SessionKey::generate();
    let p = payload(&key);

    // The JSON form uses the trailing-n convention for bigints
    let json = p.to_json_string();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["jobId"], "18446744073709551617n");
    assert_eq!(value["pricePerToken"], "2000n");
}

#[test]
fn test_tampered_signature_fails_session_init() {
    let client = EncryptionManager::from_seed(b"client wallet");
    let host = EncryptionManager::from_seed(b"host identity");

    let key = SessionKey::generate();
    let mut envelope = client
        .session_init_encrypt(&host.public_key(), &payload(&key))
        .unwrap();

    // Last byte of the 65-byte signature flipped
    let mut sig = hex::decode(&envelope.signature_hex).unwrap();
    sig[64] ^= 0x01;
    envelope.signature_hex = hex::encode(sig);

    let result = host.session_init_decrypt(&envelope);
    assert!(matches!(
        result,
        Err(SdkError::SignatureVerificationFailed(_)) | Err(SdkError::InvalidPayload { .. })
    ));
}

#[test]
fn test_init_decrypt_failure_is_fatal_not_recovered() {
    let client = EncryptionManager::from_seed(b"client wallet");
    let host = EncryptionManager::from_seed(b"host identity");
    let wrong_host = EncryptionManager::from_seed(b"impostor");

    let key = SessionKey::generate();
    // Addressed to a different host: decryption must fail outright
    let envelope = client
        .session_init_encrypt(&wrong_host.public_key(), &payload(&key))
        .unwrap();
    assert!(host.session_init_decrypt(&envelope).is_err());
}
