//! Upload Batching Tests
//!
//! Batched uploads under partial failure: a batch that times out is
//! counted fully rejected with one recorded error, and the remaining
//! batches still run.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use fabstir_llm_sdk::rag::{RagClient, UPLOAD_BATCH_SIZE, VECTOR_DIM};
use fabstir_llm_sdk::{Multiplexer, VectorRecord};

fn vectors(n: usize) -> Vec<VectorRecord> {
    (0..n)
        .map(|i| VectorRecord {
            id: format!("doc-{}", i),
            vector: vec![0.1; VECTOR_DIM],
            metadata: serde_json::json!({"folder_path": "/docs"}),
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_batch_timeout_counts_rejected_and_continues() {
    let (tx, mut out) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    let client = RagClient::new(Arc::clone(&mux));

    let responder_mux = Arc::clone(&mux);
    let responder = tokio::spawn(async move {
        let mut batch_no = 0usize;
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(frame["type"], "uploadVectors");
            let request_id = frame["requestId"].as_str().unwrap();
            let count = frame["vectors"].as_array().unwrap().len();
            assert_eq!(frame["replace"], batch_no == 0);

            // Batch 2 (index 1) never gets a response; the 30 s timer
            // fires under paused time and the client moves on
            if batch_no != 1 {
                responder_mux.handle_incoming(&format!(
                    r#"{{"type":"uploadVectorsResponse","requestId":"{}","status":"success","uploaded":{},"rejected":0,"errors":[]}}"#,
                    request_id, count
                ));
            }
            batch_no += 1;
        }
    });

    let outcome = client
        .upload_vectors("session-1", vectors(2500), true)
        .await
        .unwrap();

    // Batches of 1000/1000/500; the second timed out in full
    assert_eq!(outcome.uploaded, 1500);
    assert_eq!(outcome.rejected, 1000);
    assert_eq!(outcome.errors.len(), 1);
    assert!(outcome.errors[0].to_lowercase().contains("timed out"));
    responder.abort();
}

#[tokio::test]
async fn test_exact_batch_boundary() {
    let (tx, mut out) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    let client = RagClient::new(Arc::clone(&mux));

    let responder_mux = Arc::clone(&mux);
    let responder = tokio::spawn(async move {
        let mut sizes = Vec::new();
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let request_id = frame["requestId"].as_str().unwrap();
            let count = frame["vectors"].as_array().unwrap().len();
            sizes.push(count);
            // A full batch is exactly the limit, never one more
            assert!(count <= UPLOAD_BATCH_SIZE);
            responder_mux.handle_incoming(&format!(
                r#"{{"type":"uploadVectorsResponse","requestId":"{}","status":"success","uploaded":{},"rejected":0,"errors":[]}}"#,
                request_id, count
            ));
        }
    });

    let outcome = client
        .upload_vectors("session-1", vectors(UPLOAD_BATCH_SIZE), false)
        .await
        .unwrap();
    assert_eq!(outcome.uploaded, UPLOAD_BATCH_SIZE as u64);
    assert_eq!(outcome.rejected, 0);
    responder.abort();
}

#[tokio::test]
async fn test_host_reported_partial_rejection_aggregated() {
    let (tx, mut out) = mpsc::unbounded_channel();
    let mux = Arc::new(Multiplexer::new(tx));
    let client = RagClient::new(Arc::clone(&mux));

    let responder_mux = Arc::clone(&mux);
    let responder = tokio::spawn(async move {
        while let Some(text) = out.recv().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            let request_id = frame["requestId"].as_str().unwrap();
            // success with a nonzero rejected count is accepted as-is
            responder_mux.handle_incoming(&format!(
                r#"{{"type":"uploadVectorsResponse","requestId":"{}","status":"success","uploaded":8,"rejected":2,"errors":["doc-3: duplicate id","doc-7: bad metadata"]}}"#,
                request_id
            ));
        }
    });

    let outcome = client
        .upload_vectors("session-1", vectors(10), false)
        .await
        .unwrap();
    assert_eq!(outcome.uploaded, 8);
    assert_eq!(outcome.rejected, 2);
    assert_eq!(outcome.errors.len(), 2);
    responder.abort();
}
