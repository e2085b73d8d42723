//! Context Injection Tests
//!
//! The augmented-prompt flow: retrieved chunks are prepended in the
//! canonical format, and every failure path degrades to the original
//! question.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use fabstir_llm_sdk::rag::{augment_prompt, EmbeddingClient, RagClient, VECTOR_DIM};
use fabstir_llm_sdk::Multiplexer;

#[tokio::test]
async fn test_embedding_failure_returns_question_unchanged() {
    let (tx, _out) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    let rag = RagClient::new(mux);
    // Connection refused immediately; no embedding, no augmentation
    let embedder = EmbeddingClient::new("http://127.0.0.1:9", 84532);

    let prompt = augment_prompt(&embedder, &rag, "s1", "What changed?", 3, 0.7).await;
    assert_eq!(prompt, "What changed?");
}

#[tokio::test]
async fn test_search_results_missing_text_metadata_are_skipped() {
    // Drive the search path directly; chunks without a text field do
    // not contribute context
    let (tx, mut out) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    let rag = RagClient::new(Arc::clone(&mux));

    let responder_mux = Arc::clone(&mux);
    let responder = tokio::spawn(async move {
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let request_id = frame["requestId"].as_str().unwrap();
            responder_mux.handle_incoming(&format!(
                r#"{{"type":"searchVectorsResponse","requestId":"{}","results":[
                    {{"id":"a","score":0.9,"metadata":{{"text":"useful chunk"}}}},
                    {{"id":"b","score":0.8,"metadata":{{"folder_path":"/tmp"}}}}
                ]}}"#,
                request_id
            ));
        }
    });

    let results = rag
        .search_vectors("s1", &vec![0.5; VECTOR_DIM], 5, 0.7)
        .await
        .unwrap();
    let chunks: Vec<&str> = results
        .iter()
        .filter_map(|r| r.metadata.get("text").and_then(Value::as_str))
        .collect();
    assert_eq!(chunks, vec!["useful chunk"]);
    responder.abort();
}
