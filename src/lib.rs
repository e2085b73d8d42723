// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Client SDK for the Fabstir decentralized LLM-inference marketplace.
//!
//! The core is the secure session protocol: an end-to-end encrypted,
//! authenticated, streaming conversation channel between a user client
//! and a compute host, with ephemeral-static key exchange at session
//! init, per-message replay protection, chunked-response reassembly,
//! and a vector-database (RAG) sub-protocol multiplexed over the same
//! connection.
//!
//! Blockchain payments, the host directory, and conversation
//! persistence are external collaborators behind traits in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod host_caps;
pub mod host_key;
pub mod http_inference;
pub mod model;
pub mod pricing;
pub mod rag;
pub mod session;
pub mod transport;

pub use collaborators::{
    CheckpointProof, ConversationStore, HostDirectory, HostRecord, HostSelectionMode,
    InMemoryConversationStore, InMemoryHostDirectory, InMemorySettingsStore, PaymentClient,
    SessionJob, SettingsStore, UserSettings,
};
pub use config::{RagConfig, SessionConfig, VectorDbRef};
pub use crypto::{EciesEnvelope, EciesOptions, SessionKey};
pub use encryption::{EncryptionManager, IdentityKind, SessionInitPayload};
pub use error::{Result, SdkError};
pub use host_caps::HostCapabilities;
pub use host_key::HostKeyResolver;
pub use model::ModelRef;
pub use pricing::{token_cost, validate_price, PriceKind, PRICE_PRECISION};
pub use session::{SessionManager, SessionState};
pub use transport::{Multiplexer, VectorRecord, VectorSearchResult, WsTransport};
