// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Context Injection
//!
//! Before an augmented prompt is sent, the user's question is embedded,
//! the session's vector store is searched, and the retrieved chunks are
//! prepended. Degradation is graceful by design: any failure along the
//! way sends the original question unchanged, because a lost answer is
//! worse than a less-informed one.

use tracing::{debug, warn};

use crate::rag::{EmbeddingClient, RagClient};

/// Prepend retrieved context chunks to the question.
pub(crate) fn format_augmented(chunks: &[String], question: &str) -> String {
    if chunks.is_empty() {
        return question.to_string();
    }
    format!(
        "Context:\n{}\n\nQuestion: {}",
        chunks.join("\n\n"),
        question
    )
}

/// Build the augmented prompt for a question, or return the question
/// unchanged when retrieval fails or finds nothing.
pub async fn augment_prompt(
    embedder: &EmbeddingClient,
    rag: &RagClient,
    session_id: &str,
    question: &str,
    top_k: usize,
    threshold: f32,
) -> String {
    let embedding = match embedder.embed(&[question.to_string()]).await {
        Ok(mut embeddings) if !embeddings.is_empty() => embeddings.remove(0),
        Ok(_) => {
            warn!("Embedding endpoint returned nothing; sending question unaugmented");
            return question.to_string();
        }
        Err(e) => {
            warn!("Embedding failed ({}); sending question unaugmented", e);
            return question.to_string();
        }
    };

    let results = match rag
        .search_vectors(session_id, &embedding, top_k, threshold)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            warn!("Context search failed ({}); sending question unaugmented", e);
            return question.to_string();
        }
    };

    let chunks: Vec<String> = results
        .iter()
        .filter_map(|r| {
            r.metadata
                .get("text")
                .and_then(serde_json::Value::as_str)
                .map(String::from)
        })
        .collect();

    debug!(
        "Retrieved {} context chunks for prompt augmentation",
        chunks.len()
    );
    format_augmented(&chunks, question)
}
