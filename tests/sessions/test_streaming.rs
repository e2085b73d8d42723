//! Streaming Send Tests
//!
//! Full protocol flow over a manually driven multiplexer standing in
//! for the WebSocket: session establishment (encrypted and plaintext),
//! chunked-response reassembly, replay-protected message indices, and
//! error-frame handling. The responder plays the host, decrypting the
//! init envelope exactly as a real node does.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use super::common::{fixture, Fixture, CHAIN, MODEL};
use fabstir_llm_sdk::crypto::{encrypt_with_aead, SessionKey};
use fabstir_llm_sdk::transport::EncryptedMessage;
use fabstir_llm_sdk::{
    ConversationStore, EciesEnvelope, EncryptionManager, Multiplexer, RagConfig, SdkError,
    SessionConfig, SessionState, VectorDbRef,
};

/// Attach a loopback multiplexer to the session and return it with the
/// outbound frame stream.
async fn attach_loopback(
    fx: &Fixture,
    session_id: ethers::types::U256,
) -> (Arc<Multiplexer>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    fx.manager
        .attach_transport(session_id, Arc::clone(&mux))
        .await
        .unwrap();
    (mux, rx)
}

fn encrypted_chunk_json(key: &SessionKey, text: &str, index: u64, is_final: bool) -> String {
    let mut nonce = [0u8; 24];
    nonce[..8].copy_from_slice(&index.to_be_bytes());
    nonce[8] = 0xc4;
    let aad = format!("chunk_{}", index);
    let ciphertext =
        encrypt_with_aead(text.as_bytes(), &nonce, aad.as_bytes(), key.as_bytes()).unwrap();

    let mut frame = serde_json::json!({
        "type": "encrypted_chunk",
        "payload": {
            "ciphertextHex": hex::encode(ciphertext),
            "nonceHex": hex::encode(nonce),
            "aadHex": hex::encode(aad.as_bytes()),
            "index": index,
        },
    });
    if is_final {
        frame["final"] = serde_json::json!(true);
    }
    frame.to_string()
}

/// Host side of the encrypted flow: decrypt the init, then answer every
/// prompt with "Hello " / "world" / "" (final).
fn spawn_encrypted_host(
    host: Arc<EncryptionManager>,
    mux: Arc<Multiplexer>,
    mut out: mpsc::UnboundedReceiver<String>,
    expected_prompts: Vec<(String, u64)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut session_key: Option<SessionKey> = None;
        let mut prompt_no = 0usize;

        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            match frame["type"].as_str().unwrap() {
                "encrypted_session_init" => {
                    let envelope: EciesEnvelope =
                        serde_json::from_value(frame["payload"].clone()).unwrap();
                    let (payload, _sender) = host.session_init_decrypt(&envelope).unwrap();
                    session_key = Some(SessionKey::from_hex(&payload.session_key_hex).unwrap());
                }
                "encrypted_message" => {
                    let key = session_key.as_ref().expect("init before messages");
                    let payload: EncryptedMessage =
                        serde_json::from_value(frame["payload"].clone()).unwrap();

                    let (expected_text, expected_index) = &expected_prompts[prompt_no];
                    assert_eq!(
                        payload.aad_hex,
                        hex::encode(format!("message_{}", expected_index).as_bytes()),
                        "outbound message index must be monotonic"
                    );
                    let prompt = host.message_decrypt(key, &payload).unwrap();
                    assert_eq!(&prompt, expected_text);
                    prompt_no += 1;

                    mux.handle_incoming(&encrypted_chunk_json(key, "Hello ", 0, false));
                    mux.handle_incoming(&encrypted_chunk_json(key, "world", 1, false));
                    mux.handle_incoming(&encrypted_chunk_json(key, "", 2, true));
                }
                _ => {}
            }
        }
    })
}

#[tokio::test]
async fn test_encrypted_streaming_happy_path() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();
    let (mux, out) = attach_loopback(&fx, job.session_id).await;

    let host = spawn_encrypted_host(
        Arc::clone(&fx.host_identity),
        Arc::clone(&mux),
        out,
        vec![("What is 2+2?".to_string(), 0)],
    );

    let mut tokens = Vec::new();
    let result = fx
        .manager
        .send_prompt_streaming(job.session_id, "What is 2+2?", |t| {
            tokens.push(t.to_string())
        })
        .await
        .unwrap();

    assert_eq!(result, "Hello world");
    assert_eq!(tokens, vec!["Hello ", "world", ""]);
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Active)
    );

    // Both sides of the exchange persisted
    let record = fx
        .store
        .get_session(&job.session_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.messages.len(), 2);
    assert_eq!(record.messages[0].role, "user");
    assert_eq!(record.messages[1].content, "Hello world");
    host.abort();
}

#[tokio::test]
async fn test_message_index_advances_across_sends() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();
    let (mux, out) = attach_loopback(&fx, job.session_id).await;

    let host = spawn_encrypted_host(
        Arc::clone(&fx.host_identity),
        Arc::clone(&mux),
        out,
        vec![("first".to_string(), 0), ("second".to_string(), 1)],
    );

    fx.manager
        .send_prompt_streaming(job.session_id, "first", |_| {})
        .await
        .unwrap();
    // Same transport: no re-init, the index keeps climbing
    fx.manager
        .send_prompt_streaming(job.session_id, "second", |_| {})
        .await
        .unwrap();
    host.abort();
}

#[tokio::test]
async fn test_plaintext_session_flow() {
    let fx = fixture();
    let mut config = SessionConfig::new(CHAIN, MODEL);
    config.encryption = false;
    let job = fx.manager.start_session(config).await.unwrap();
    let (mux, mut out) = attach_loopback(&fx, job.session_id).await;

    let client_address = {
        // Same derivation as the fixture manager's wallet
        EncryptionManager::from_seed(b"fixture client wallet")
            .address()
            .to_string()
    };

    let responder = tokio::spawn(async move {
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            match frame["type"].as_str().unwrap() {
                "session_init" => {
                    assert_eq!(frame["user_address"], client_address.as_str());
                    assert_eq!(frame["chain_id"], CHAIN);
                }
                "prompt" => {
                    assert_eq!(frame["prompt"], "plain question");
                    assert_eq!(frame["request"]["stream"], true);
                    mux.handle_incoming(
                        r#"{"type":"stream_chunk","content":"plain "}"#,
                    );
                    mux.handle_incoming(
                        r#"{"type":"stream_chunk","content":"answer"}"#,
                    );
                    mux.handle_incoming(r#"{"type":"stream_end"}"#);
                }
                _ => {}
            }
        }
    });

    let result = fx
        .manager
        .send_prompt_streaming(job.session_id, "plain question", |_| {})
        .await
        .unwrap();
    assert_eq!(result, "plain answer");
    responder.abort();
}

#[tokio::test]
async fn test_error_frame_fails_send_but_not_session() {
    let fx = fixture();
    let mut config = SessionConfig::new(CHAIN, MODEL);
    config.encryption = false;
    let job = fx.manager.start_session(config).await.unwrap();
    let (mux, mut out) = attach_loopback(&fx, job.session_id).await;

    let responder = tokio::spawn(async move {
        let mut prompts_seen = 0;
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] == "prompt" {
                prompts_seen += 1;
                if prompts_seen == 1 {
                    mux.handle_incoming(
                        r#"{"type":"error","message":"model overloaded"}"#,
                    );
                } else {
                    mux.handle_incoming(r#"{"type":"response","content":"recovered"}"#);
                }
            }
        }
    });

    let first = fx
        .manager
        .send_prompt_streaming(job.session_id, "try one", |_| {})
        .await;
    match first {
        Err(SdkError::RequestError(msg)) => assert_eq!(msg, "model overloaded"),
        other => panic!("unexpected result: {:?}", other),
    }
    // The send failed; the session did not
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Active)
    );

    let second = fx
        .manager
        .send_prompt_streaming(job.session_id, "try two", |_| {})
        .await
        .unwrap();
    assert_eq!(second, "recovered");
    responder.abort();
}

#[tokio::test]
async fn test_rag_failure_degrades_to_original_prompt() {
    let fx = fixture();
    let mut config = SessionConfig::new(CHAIN, MODEL);
    config.encryption = false;
    // Unroutable embed endpoint: augmentation fails fast and gracefully
    config.endpoint = Some("http://127.0.0.1:9".to_string());
    config.rag_config = Some(RagConfig {
        enabled: true,
        top_k: 3,
        threshold: 0.7,
    });
    config.vector_database = Some(VectorDbRef {
        manifest_path: "s5://manifest".to_string(),
        user_address: "0x0".to_string(),
    });
    let job = fx.manager.start_session(config).await.unwrap();
    let (mux, mut out) = attach_loopback(&fx, job.session_id).await;

    let responder = tokio::spawn(async move {
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] == "prompt" {
                // The original question arrives unaugmented
                assert_eq!(frame["prompt"], "What is in my documents?");
                mux.handle_incoming(r#"{"type":"response","content":"nothing"}"#);
            }
        }
    });

    let result = fx
        .manager
        .send_prompt_streaming(job.session_id, "What is in my documents?", |_| {})
        .await
        .unwrap();
    assert_eq!(result, "nothing");
    responder.abort();
}

#[tokio::test]
async fn test_manager_rag_rpcs_over_session_transport() {
    let fx = fixture();
    let mut config = SessionConfig::new(CHAIN, MODEL);
    config.encryption = false;
    let job = fx.manager.start_session(config).await.unwrap();
    let (mux, mut out) = attach_loopback(&fx, job.session_id).await;

    let responder = tokio::spawn(async move {
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            match frame["type"].as_str().unwrap() {
                "uploadVectors" => {
                    let request_id = frame["requestId"].as_str().unwrap();
                    let count = frame["vectors"].as_array().unwrap().len();
                    mux.handle_incoming(&format!(
                        r#"{{"type":"uploadVectorsResponse","requestId":"{}","status":"success","uploaded":{},"rejected":0,"errors":[]}}"#,
                        request_id, count
                    ));
                }
                "searchVectors" => {
                    let request_id = frame["requestId"].as_str().unwrap();
                    mux.handle_incoming(&format!(
                        r#"{{"type":"searchVectorsResponse","requestId":"{}","results":[{{"id":"doc-1","score":0.9,"metadata":{{"text":"chunk"}}}}]}}"#,
                        request_id
                    ));
                }
                _ => {}
            }
        }
    });

    let vectors: Vec<fabstir_llm_sdk::VectorRecord> = (0..3)
        .map(|i| fabstir_llm_sdk::VectorRecord {
            id: format!("doc-{}", i),
            vector: vec![0.25; 384],
            metadata: serde_json::json!({"text": format!("chunk {}", i)}),
        })
        .collect();

    let outcome = fx
        .manager
        .upload_vectors(job.session_id, vectors, true)
        .await
        .unwrap();
    assert_eq!(outcome.uploaded, 3);
    assert_eq!(outcome.rejected, 0);

    let results = fx
        .manager
        .search_vectors(job.session_id, &vec![0.25; 384], 5, 0.7)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "doc-1");
    responder.abort();
}
