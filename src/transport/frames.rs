// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wire Frames
//!
//! JSON frames exchanged over the duplex channel, tagged by a `type`
//! field. Field naming follows the deployed wire format exactly, which
//! mixes snake_case and camelCase for historical reasons; the serde
//! renames below are normative, not stylistic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::VectorDbRef;
use crate::crypto::EciesEnvelope;

/// Encrypted streaming payload: ciphertext plus the parameters needed
/// to decrypt it. Authenticity is inherited from the session key; there
/// is no per-message signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    #[serde(rename = "ciphertextHex")]
    pub ciphertext_hex: String,
    #[serde(rename = "nonceHex")]
    pub nonce_hex: String,
    #[serde(rename = "aadHex", default)]
    pub aad_hex: String,
}

/// Inner request object of a plaintext `prompt` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

/// One vector in an upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Value,
}

/// Single result of a vector search, highest score first.
#[derive(Debug, Clone, Deserialize)]
pub struct VectorSearchResult {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Value,
}

/// Host response to an `uploadVectors` batch.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadVectorsResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub status: String,
    #[serde(default)]
    pub uploaded: u64,
    #[serde(default)]
    pub rejected: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Host response to a `searchVectors` request.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchVectorsResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default)]
    pub results: Vec<VectorSearchResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client → host frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "encrypted_session_init")]
    EncryptedSessionInit {
        payload: EciesEnvelope,
        chain_id: u64,
        session_id: String,
        job_id: String,
    },

    #[serde(rename = "session_init")]
    SessionInit {
        chain_id: u64,
        session_id: String,
        #[serde(rename = "jobId")]
        job_id: String,
        user_address: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        vector_database: Option<VectorDbRef>,
    },

    #[serde(rename = "encrypted_message")]
    EncryptedPrompt {
        session_id: String,
        id: String,
        payload: EncryptedMessage,
    },

    #[serde(rename = "prompt")]
    Prompt {
        chain_id: u64,
        #[serde(rename = "jobId")]
        job_id: String,
        prompt: String,
        request: InferenceRequest,
    },

    #[serde(rename = "uploadVectors")]
    UploadVectors {
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        vectors: Vec<VectorRecord>,
        replace: bool,
    },

    #[serde(rename = "searchVectors")]
    SearchVectors {
        session_id: String,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "queryVector")]
        query_vector: Vec<f32>,
        k: usize,
        threshold: f32,
    },
}

/// Host → client frames.
///
/// Unknown `type` tags are ignored by the dispatcher, so this enum only
/// lists the frames the client acts on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum HostFrame {
    #[serde(rename = "encrypted_chunk")]
    EncryptedChunk {
        payload: EncryptedMessage,
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    #[serde(rename = "encrypted_response")]
    EncryptedResponse { payload: EncryptedMessage },

    #[serde(rename = "stream_chunk")]
    StreamChunk {
        content: String,
        #[serde(rename = "final", default)]
        is_final: bool,
    },

    #[serde(rename = "stream_end")]
    StreamEnd,

    #[serde(rename = "response")]
    Response { content: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "proof_submitted")]
    ProofSubmitted,

    #[serde(rename = "checkpoint_submitted")]
    CheckpointSubmitted,

    #[serde(rename = "session_completed")]
    SessionCompleted,

    #[serde(rename = "uploadVectorsResponse")]
    UploadVectorsResponse(UploadVectorsResponse),

    #[serde(rename = "searchVectorsResponse")]
    SearchVectorsResponse(SearchVectorsResponse),
}

impl HostFrame {
    /// Parse an inbound text frame. Unknown or malformed frames return
    /// `None` and are logged at debug level; the protocol ignores them.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<HostFrame>(text) {
            Ok(frame) => Some(frame),
            Err(e) => {
                let frame_type = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(String::from));
                debug!(
                    "Ignoring inbound frame (type: {:?}): {}",
                    frame_type.as_deref().unwrap_or("<unparseable>"),
                    e
                );
                None
            }
        }
    }
}

impl ClientFrame {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("client frames serialize infallibly")
    }
}
