// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retrieval-Augmented Generation
//!
//! The RAG sub-protocol rides the session transport: vector upload and
//! search RPCs with their own request IDs and timeouts, an embedding
//! client for the host's `/v1/embed`, and the context-injection step
//! that runs before an augmented prompt is transmitted.

pub mod client;
pub mod context;
pub mod embeddings;

pub use client::{
    RagClient, UploadOutcome, MAX_SEARCH_K, SEARCH_TIMEOUT, UPLOAD_BATCH_SIZE, UPLOAD_TIMEOUT,
    VECTOR_DIM,
};
pub use context::augment_prompt;
pub use embeddings::{EmbeddingClient, EMBEDDING_MODEL};
