// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Embedding Client
//!
//! Hosts expose `POST /v1/embed` backed by a sentence transformer, so
//! SDK clients get embeddings without shipping a model. The embedding
//! model is fixed per protocol version; its 384-dimension output is
//! what the vector RPCs validate against.

use serde::Deserialize;

use crate::error::{Result, SdkError};
use crate::rag::VECTOR_DIM;

/// Sentence-transformer model hosts run for `/v1/embed`.
pub const EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";

#[derive(Debug, Deserialize)]
struct EmbedItem {
    embedding: Vec<f32>,
    #[serde(default, rename = "tokenCount")]
    #[allow(dead_code)]
    token_count: u64,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<EmbedItem>,
}

/// Client for a host's embedding endpoint.
#[derive(Clone)]
pub struct EmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    chain_id: u64,
}

impl EmbeddingClient {
    pub fn new(base_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            chain_id,
        }
    }

    /// Embed a batch of texts, one 384-float vector per input.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embed", self.base_url.trim_end_matches('/'));
        let response: EmbedResponse = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "texts": texts,
                "model": EMBEDDING_MODEL,
                "chainId": self.chain_id,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| SdkError::NetworkError(format!("embed request failed: {}", e)))?
            .json()
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(SdkError::InvalidPayload {
                field: "embeddings".to_string(),
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            });
        }

        response
            .embeddings
            .into_iter()
            .map(|item| {
                if item.embedding.len() != VECTOR_DIM {
                    Err(SdkError::InvalidPayload {
                        field: "embedding".to_string(),
                        reason: format!(
                            "expected {} dimensions, got {}",
                            VECTOR_DIM,
                            item.embedding.len()
                        ),
                    })
                } else {
                    Ok(item.embedding)
                }
            })
            .collect()
    }
}
