// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Transport Layer
//!
//! Wire frames, the pending-request table, and the WebSocket
//! multiplexer that carries a session's inference stream and RAG RPCs
//! over one full-duplex channel.

pub mod connection;
pub mod frames;
pub mod pending;

pub use connection::{Multiplexer, TransportEvent, WsTransport};
pub use frames::{
    ClientFrame, EncryptedMessage, HostFrame, InferenceRequest, SearchVectorsResponse,
    UploadVectorsResponse, VectorRecord, VectorSearchResult,
};
pub use pending::PendingRequests;
