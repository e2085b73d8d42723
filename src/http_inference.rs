// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Non-Streaming Inference Fallback
//!
//! When a host offers no WebSocket endpoint, a plaintext one-shot
//! request against `POST /v1/inference` still works. Hosts of different
//! vintages name the response text differently; the first present of
//! `response`, `text`, `content`, `generated_text` wins.

use serde_json::Value;

use crate::error::{Result, SdkError};

/// Response field names accepted from heterogeneous hosts, in priority
/// order.
const RESPONSE_FIELDS: &[&str] = &["response", "text", "content", "generated_text"];

/// One-shot inference client.
#[derive(Clone)]
pub struct HttpInferenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Run a non-streaming inference request.
    #[allow(clippy::too_many_arguments)]
    pub async fn infer(
        &self,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        session_id: &str,
        job_id: &str,
    ) -> Result<String> {
        let url = format!("{}/v1/inference", self.base_url.trim_end_matches('/'));
        let body: Value = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "model": model,
                "prompt": prompt,
                "max_tokens": max_tokens,
                "temperature": temperature,
                "sessionId": session_id,
                "jobId": job_id,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| SdkError::NetworkError(format!("inference request failed: {}", e)))?
            .json()
            .await?;

        extract_response_text(&body).ok_or_else(|| SdkError::InvalidPayload {
            field: "response".to_string(),
            reason: "no recognized response field present".to_string(),
        })
    }
}

fn extract_response_text(body: &Value) -> Option<String> {
    RESPONSE_FIELDS
        .iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .map(String::from)
}
