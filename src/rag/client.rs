// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector RPCs
//!
//! `uploadVectors` and `searchVectors` run over the session's transport,
//! correlated by client-chosen request IDs. Each RPC installs the
//! multiplexer's single RAG-response handler for its duration and
//! uninstalls it on the way out; responses are matched to the awaiting
//! request by `requestId`, and stale ones (from an earlier timed-out
//! request) are dropped.
//!
//! Uploads are batched and best-effort: a failed batch counts as fully
//! rejected with its error recorded, and the remaining batches still
//! run. The caller's `replace` flag applies to the first batch only, so
//! one logical upload replaces at most once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SdkError};
use crate::transport::{ClientFrame, HostFrame, Multiplexer, VectorRecord, VectorSearchResult};

/// Required embedding dimension.
pub const VECTOR_DIM: usize = 384;

/// Maximum vectors per upload batch.
pub const UPLOAD_BATCH_SIZE: usize = 1000;

/// Maximum k for a vector search.
pub const MAX_SEARCH_K: usize = 20;

/// Per-batch upload timeout.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Search timeout.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Aggregated result of a batched upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOutcome {
    pub uploaded: u64,
    pub rejected: u64,
    pub errors: Vec<String>,
}

/// RAG RPC client bound to one transport.
pub struct RagClient {
    mux: Arc<Multiplexer>,
}

impl RagClient {
    pub fn new(mux: Arc<Multiplexer>) -> Self {
        Self { mux }
    }

    /// Upload vectors in batches of at most [`UPLOAD_BATCH_SIZE`].
    ///
    /// Every vector must be exactly [`VECTOR_DIM`] values; validation
    /// happens before anything is sent. The RAG handler stays installed
    /// across all batches of one logical upload.
    pub async fn upload_vectors(
        &self,
        session_id: &str,
        vectors: Vec<VectorRecord>,
        replace: bool,
    ) -> Result<UploadOutcome> {
        for v in &vectors {
            if v.vector.len() != VECTOR_DIM {
                return Err(SdkError::InvalidParameter(format!(
                    "vector '{}' has {} dimensions, expected {}",
                    v.id,
                    v.vector.len(),
                    VECTOR_DIM
                )));
            }
        }

        let mut responses = self.mux.install_rag_handler();
        let result = self
            .upload_batches(&mut responses, session_id, vectors, replace)
            .await;
        self.mux.uninstall_rag_handler();
        result
    }

    async fn upload_batches(
        &self,
        responses: &mut mpsc::UnboundedReceiver<HostFrame>,
        session_id: &str,
        vectors: Vec<VectorRecord>,
        replace: bool,
    ) -> Result<UploadOutcome> {
        let mut outcome = UploadOutcome::default();
        let total_batches = vectors.len().div_ceil(UPLOAD_BATCH_SIZE);
        let batches: Vec<Vec<VectorRecord>> = vectors
            .chunks(UPLOAD_BATCH_SIZE)
            .map(|c| c.to_vec())
            .collect();

        for (index, batch) in batches.into_iter().enumerate() {
            let batch_len = batch.len() as u64;
            let request_id = Uuid::new_v4().to_string();
            let frame = ClientFrame::UploadVectors {
                session_id: session_id.to_string(),
                request_id: request_id.clone(),
                vectors: batch,
                // Only the first batch may replace; later batches append
                replace: replace && index == 0,
            };

            debug!(
                "Uploading vector batch {}/{} ({} vectors)",
                index + 1,
                total_batches,
                batch_len
            );

            match self
                .request(responses, &request_id, &frame, UPLOAD_TIMEOUT)
                .await
            {
                Ok(HostFrame::UploadVectorsResponse(resp)) => {
                    if resp.status == "success" {
                        outcome.uploaded += resp.uploaded;
                        outcome.rejected += resp.rejected;
                        outcome.errors.extend(resp.errors);
                    } else {
                        let reason = resp
                            .error
                            .unwrap_or_else(|| format!("batch status: {}", resp.status));
                        warn!("Upload batch {} failed: {}", index + 1, reason);
                        outcome.rejected += batch_len;
                        outcome.errors.push(reason);
                    }
                }
                Ok(other) => {
                    warn!("Unexpected response to upload batch: {:?}", other);
                    outcome.rejected += batch_len;
                    outcome.errors.push("unexpected response frame".to_string());
                }
                Err(e) => {
                    // Best-effort: count this batch as rejected and keep
                    // going
                    warn!("Upload batch {} failed: {}", index + 1, e);
                    outcome.rejected += batch_len;
                    outcome.errors.push(e.to_string());
                }
            }
        }

        Ok(outcome)
    }

    /// Search the session's vector store.
    ///
    /// Results arrive sorted by descending score (host-guaranteed).
    pub async fn search_vectors(
        &self,
        session_id: &str,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorSearchResult>> {
        if query_vector.len() != VECTOR_DIM {
            return Err(SdkError::InvalidParameter(format!(
                "query vector has {} dimensions, expected {}",
                query_vector.len(),
                VECTOR_DIM
            )));
        }
        if k == 0 || k > MAX_SEARCH_K {
            return Err(SdkError::InvalidParameter(format!(
                "k must be in 1..={}, got {}",
                MAX_SEARCH_K, k
            )));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SdkError::InvalidParameter(format!(
                "threshold must be in [0, 1], got {}",
                threshold
            )));
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = ClientFrame::SearchVectors {
            session_id: session_id.to_string(),
            request_id: request_id.clone(),
            query_vector: query_vector.to_vec(),
            k,
            threshold,
        };

        let mut responses = self.mux.install_rag_handler();
        let result = self
            .request(&mut responses, &request_id, &frame, SEARCH_TIMEOUT)
            .await;
        self.mux.uninstall_rag_handler();

        match result? {
            HostFrame::SearchVectorsResponse(resp) => match resp.error {
                Some(error) => Err(SdkError::SearchError(error)),
                None => Ok(resp.results),
            },
            other => Err(SdkError::SearchError(format!(
                "unexpected response frame: {:?}",
                other
            ))),
        }
    }

    /// Send a RAG request and await its response on the installed
    /// handler, matching by request ID. Responses for other IDs (stale
    /// leftovers from an earlier timed-out request) are dropped.
    async fn request(
        &self,
        responses: &mut mpsc::UnboundedReceiver<HostFrame>,
        request_id: &str,
        frame: &ClientFrame,
        window: Duration,
    ) -> Result<HostFrame> {
        self.mux.send(frame)?;

        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SdkError::ResponseTimeout(window));
            }
            match timeout(remaining, responses.recv()).await {
                Err(_) => return Err(SdkError::ResponseTimeout(window)),
                Ok(None) => {
                    return Err(SdkError::NetworkError(
                        "transport closed during RAG request".to_string(),
                    ))
                }
                Ok(Some(response)) => {
                    let id = match &response {
                        HostFrame::UploadVectorsResponse(r) => r.request_id.as_str(),
                        HostFrame::SearchVectorsResponse(r) => r.request_id.as_str(),
                        other => {
                            debug!("Ignoring non-RAG frame on RAG handler: {:?}", other);
                            continue;
                        }
                    };
                    if id == request_id {
                        return Ok(response);
                    }
                    debug!("Dropping stale RAG response for request {}", id);
                }
            }
        }
    }
}
