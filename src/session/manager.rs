// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Session Manager
//!
//! Drives the conversation lifecycle: start a paid session against the
//! directory and payment collaborators, establish the encrypted channel
//! on first send, stream prompts and reassemble chunked responses,
//! forward checkpoints, and settle completion. One manager serves many
//! sessions; each session's sends are serialized behind its own lock,
//! matching the cooperative single-threaded model the protocol assumes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ethers::types::U256;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{
    CheckpointProof, ConversationStore, CreateJobRequest, HostDirectory, HostRecord,
    HostSelectionMode, PaymentClient, SessionJob, SessionMetadata, SessionRecord, SettingsStore,
    StoredMessage,
};
use crate::config::{RagConfig, SessionConfig};
use crate::crypto::SessionKey;
use crate::encryption::{EncryptionManager, SessionInitPayload};
use crate::error::{Result, SdkError};
use crate::host_key::HostKeyResolver;
use crate::model::ModelRef;
use crate::pricing::{validate_price, PriceKind};
use crate::rag::{augment_prompt, EmbeddingClient, RagClient, UploadOutcome};
use crate::session::reassembly::{drive_response, ResponseAssembler, RESPONSE_WINDOW};
use crate::session::state::{Session, SessionState};
use crate::transport::{
    ClientFrame, InferenceRequest, Multiplexer, VectorRecord, VectorSearchResult, WsTransport,
};

/// Default generation parameters for plaintext prompt frames.
const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_TEMPERATURE: f32 = 0.7;

/// How a session reaches its host.
enum TransportHandle {
    /// SDK-owned WebSocket.
    Socket(WsTransport),
    /// Externally supplied multiplexer (embedders, tests).
    External(Arc<Multiplexer>),
}

impl TransportHandle {
    fn mux(&self) -> Arc<Multiplexer> {
        match self {
            TransportHandle::Socket(ws) => ws.multiplexer(),
            TransportHandle::External(mux) => Arc::clone(mux),
        }
    }

    fn close(&self) {
        match self {
            TransportHandle::Socket(ws) => ws.close(),
            TransportHandle::External(mux) => mux.on_disconnect(),
        }
    }
}

struct SessionEntry {
    session: Session,
    transport: Option<TransportHandle>,
    init_sent: bool,
    rag: Option<RagConfig>,
}

/// Orchestrates sessions against the marketplace collaborators.
pub struct SessionManager {
    encryption: Arc<EncryptionManager>,
    host_keys: HostKeyResolver,
    payment: Arc<dyn PaymentClient>,
    directory: Arc<dyn HostDirectory>,
    store: Arc<dyn ConversationStore>,
    settings: Arc<dyn SettingsStore>,
    supported_chains: HashSet<u64>,
    sessions: RwLock<HashMap<U256, Arc<Mutex<SessionEntry>>>>,
}

impl SessionManager {
    pub fn new(
        encryption: Arc<EncryptionManager>,
        payment: Arc<dyn PaymentClient>,
        directory: Arc<dyn HostDirectory>,
        store: Arc<dyn ConversationStore>,
        settings: Arc<dyn SettingsStore>,
        supported_chains: HashSet<u64>,
    ) -> Self {
        Self {
            encryption,
            host_keys: HostKeyResolver::new(),
            payment,
            directory,
            store,
            settings,
            supported_chains,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session: pick a host, resolve the authoritative price,
    /// create the payment job, and record the session as active.
    pub async fn start_session(&self, config: SessionConfig) -> Result<SessionJob> {
        if config.chain_id == 0 {
            return Err(SdkError::MissingChainId);
        }
        if !self.supported_chains.contains(&config.chain_id) {
            return Err(SdkError::UnsupportedChain(config.chain_id));
        }

        let model = ModelRef::parse(&config.model)?;
        let model_id = model.canonical_id();

        let record = self.select_host(&config, model_id).await?;
        let host = record.address;
        let endpoint = config.endpoint.clone().or(record.api_endpoint.clone());

        // The directory price is authoritative, whatever the caller asked
        // for; a non-positive or out-of-range price never reaches payment
        let price = self
            .directory
            .resolve_price(config.chain_id, host, model_id, config.payment_token)
            .await?;
        validate_price(price, PriceKind::from_payment_token(config.payment_token))?;

        let job = self
            .payment
            .create_session_job(&CreateJobRequest {
                chain_id: config.chain_id,
                host,
                model_id,
                price_per_token: price,
                payment_token: config.payment_token,
                deposit_amount: config.deposit_amount,
                proof_interval: config.proof_interval,
                duration: config.duration,
            })
            .await?;

        let mut session = Session::new(
            job.session_id,
            job.job_id,
            config.chain_id,
            host,
            endpoint.clone(),
            model,
            price,
            config.encryption,
        );
        session.vector_db_ref = config.vector_database.clone();
        session.group_id = config.group_id.clone();

        let metadata = SessionMetadata {
            chain_id: config.chain_id,
            model: session.model.display_name(),
            provider: format!("{:?}", host),
            endpoint,
            job_id: job.job_id.to_string(),
            status: SessionState::Active.as_str().to_string(),
            total_tokens: 0,
            start_time: session.start_time.to_rfc3339(),
            encryption: config.encryption,
        };
        let now = session.start_time.to_rfc3339();
        self.store
            .save_session(SessionRecord {
                id: job.session_id.to_string(),
                metadata,
                messages: Vec::new(),
                created_at: now.clone(),
                updated_at: now,
            })
            .await?;

        self.sessions.write().await.insert(
            job.session_id,
            Arc::new(Mutex::new(SessionEntry {
                session,
                transport: None,
                init_sent: false,
                rag: config.rag_config.clone(),
            })),
        );

        self.settings.set_last_host(host).await?;
        info!(
            "Session {} started with host {:?} at price {}",
            job.session_id, host, price
        );
        Ok(job)
    }

    /// Pick a host for the model according to the user's selection mode.
    async fn select_host(
        &self,
        config: &SessionConfig,
        model_id: ethers::types::H256,
    ) -> Result<HostRecord> {
        if let Some(host) = config.host {
            if let Some(record) = self.directory.host_record(config.chain_id, host).await? {
                return Ok(record);
            }
            // An explicitly chosen host outside the directory needs an
            // endpoint supplied alongside it; otherwise there is nothing
            // to connect to
            if config.endpoint.is_some() {
                return Ok(HostRecord {
                    address: host,
                    api_endpoint: None,
                    public_key: None,
                    models: vec![model_id],
                    price_per_token: U256::zero(),
                });
            }
            return Err(SdkError::NoHostsAvailable {
                chain_id: config.chain_id,
                model: config.model.clone(),
            });
        }

        let candidates = self
            .directory
            .hosts_for_model(config.chain_id, model_id)
            .await?;
        if candidates.is_empty() {
            return Err(SdkError::NoHostsAvailable {
                chain_id: config.chain_id,
                model: config.model.clone(),
            });
        }

        let settings = self.settings.get().await?;
        let chosen = match settings.host_selection_mode {
            HostSelectionMode::Specific => {
                let preferred = settings.preferred_host_address.ok_or_else(|| {
                    SdkError::NoHostsAvailable {
                        chain_id: config.chain_id,
                        model: config.model.clone(),
                    }
                })?;
                candidates
                    .into_iter()
                    .find(|c| c.address == preferred)
                    .ok_or_else(|| SdkError::NoHostsAvailable {
                        chain_id: config.chain_id,
                        model: config.model.clone(),
                    })?
            }
            HostSelectionMode::Cheapest => {
                let mut best: Option<(U256, HostRecord)> = None;
                for candidate in candidates {
                    let price = self
                        .directory
                        .resolve_price(
                            config.chain_id,
                            candidate.address,
                            model_id,
                            config.payment_token,
                        )
                        .await?;
                    match &best {
                        Some((cheapest, _)) if price >= *cheapest => {}
                        _ => best = Some((price, candidate)),
                    }
                }
                best.map(|(_, record)| record).unwrap()
            }
            HostSelectionMode::Auto => {
                // Sticky: keep the last host when it still serves the model
                match settings.last_host_address {
                    Some(last) => candidates
                        .iter()
                        .find(|c| c.address == last)
                        .cloned()
                        .unwrap_or_else(|| candidates[0].clone()),
                    None => candidates[0].clone(),
                }
            }
        };
        Ok(chosen)
    }

    /// Send a prompt and stream the response tokens through `on_token`,
    /// returning the assembled response.
    ///
    /// The first send on a fresh transport performs session
    /// establishment: encrypted sessions generate a new session key,
    /// rebind the message index to zero, and transmit the encrypted
    /// init envelope.
    pub async fn send_prompt_streaming(
        &self,
        session_id: U256,
        prompt: &str,
        mut on_token: impl FnMut(&str),
    ) -> Result<String> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        let entry = &mut *guard;

        if entry.session.state != SessionState::Active {
            return Err(SdkError::SessionNotActive {
                session_id: session_id.to_string(),
                state: entry.session.state.as_str().to_string(),
            });
        }

        self.ensure_transport(entry).await?;
        self.ensure_session_init(entry).await?;
        let mux = entry.transport.as_ref().unwrap().mux();

        // Context injection happens before encryption so the host only
        // ever sees one opaque prompt
        let outgoing = self.maybe_augment(entry, &mux, prompt).await;

        let rx_frame;
        let key;
        if entry.session.encryption_enabled {
            key = Some(entry.session.session_key()?.clone());
            let index = entry.session.next_message_index();
            let payload = self.encryption.message_encrypt(
                key.as_ref().unwrap(),
                &outgoing,
                index,
            )?;
            rx_frame = ClientFrame::EncryptedPrompt {
                session_id: entry.session.session_id.to_string(),
                id: Uuid::new_v4().to_string(),
                payload,
            };
        } else {
            key = None;
            rx_frame = ClientFrame::Prompt {
                chain_id: entry.session.chain_id,
                job_id: entry.session.job_id.to_string(),
                prompt: outgoing.clone(),
                request: InferenceRequest {
                    model: entry.session.model.display_name(),
                    prompt: outgoing.clone(),
                    max_tokens: DEFAULT_MAX_TOKENS,
                    temperature: DEFAULT_TEMPERATURE,
                    stream: true,
                },
            };
        }

        let mut rx = mux.install_inference_handler();
        let send_result = mux.send(&rx_frame);

        let result = match send_result {
            Ok(()) => {
                let mut assembler = match key.as_ref() {
                    Some(k) => ResponseAssembler::encrypted(&self.encryption, k),
                    None => ResponseAssembler::plaintext(),
                };
                drive_response(&mut rx, &mut assembler, RESPONSE_WINDOW, &mut on_token).await
            }
            Err(e) => Err(e),
        };
        mux.uninstall_inference_handler();

        match result {
            Ok(response) => {
                entry.session.prompts.push(prompt.to_string());
                entry.session.responses.push(response.clone());
                self.persist_exchange(&entry.session, prompt, &response).await;
                Ok(response)
            }
            Err(e) => {
                // A failed send leaves the session active; the next send
                // may reopen the transport
                if matches!(&e, SdkError::NetworkError(_)) {
                    entry.transport = None;
                    entry.init_sent = false;
                }
                Err(e)
            }
        }
    }

    /// Forward a checkpoint proof and record it on the session.
    pub async fn submit_checkpoint(
        &self,
        session_id: U256,
        proof: CheckpointProof,
    ) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;

        if guard.session.state.is_terminal() {
            return Err(SdkError::SessionNotActive {
                session_id: session_id.to_string(),
                state: guard.session.state.as_str().to_string(),
            });
        }

        self.payment.submit_checkpoint(session_id, &proof).await?;
        guard
            .session
            .add_checkpoint(proof.cumulative_tokens, proof.proof.clone())?;

        let totals = guard.session.total_tokens();
        let state = guard.session.state.as_str().to_string();
        drop(guard);
        let _ = self
            .store
            .update_status(&session_id.to_string(), &state, totals)
            .await;
        Ok(())
    }

    /// Settle the session. Idempotent: completing a session the host
    /// already completed, or one this process no longer tracks, still
    /// attempts on-chain completion and never raises a not-found error.
    pub async fn complete_session(
        &self,
        session_id: U256,
        total_tokens: u64,
        final_proof: &[u8],
    ) -> Result<()> {
        let maybe_entry = self.sessions.read().await.get(&session_id).cloned();

        let Some(entry) = maybe_entry else {
            debug!(
                "Completing untracked session {} (host may have settled first)",
                session_id
            );
            return self
                .payment
                .complete_session(session_id, total_tokens, final_proof)
                .await;
        };

        let mut guard = entry.lock().await;
        self.payment
            .complete_session(session_id, total_tokens, final_proof)
            .await?;

        if !guard.session.state.is_terminal() {
            guard.session.transition(SessionState::Completed)?;
        }
        if let Some(transport) = guard.transport.take() {
            transport.close();
        }
        let final_state = guard.session.state;
        drop(guard);

        let _ = self
            .store
            .update_status(&session_id.to_string(), final_state.as_str(), total_tokens)
            .await;
        info!("Session {} completed ({} tokens)", session_id, total_tokens);
        Ok(())
    }

    /// User-initiated close. The host settles any outstanding balance.
    pub async fn end_session(&self, session_id: U256) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;

        if !guard.session.state.is_terminal() {
            guard.session.transition(SessionState::Ended)?;
        }
        if let Some(transport) = guard.transport.take() {
            transport.close();
        }
        let totals = guard.session.total_tokens();
        drop(guard);

        let _ = self
            .store
            .update_status(&session_id.to_string(), SessionState::Ended.as_str(), totals)
            .await;
        info!("Session {} ended by user", session_id);
        Ok(())
    }

    /// Pause an active session.
    pub async fn pause_session(&self, session_id: U256) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let result = entry.lock().await.session.transition(SessionState::Paused);
        result
    }

    /// Resume a paused session.
    pub async fn resume_session(&self, session_id: U256) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let result = entry.lock().await.session.transition(SessionState::Active);
        result
    }

    /// Upload vectors into the session's store on the host.
    pub async fn upload_vectors(
        &self,
        session_id: U256,
        vectors: Vec<VectorRecord>,
        replace: bool,
    ) -> Result<UploadOutcome> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        self.ensure_transport(&mut *guard).await?;
        self.ensure_session_init(&mut *guard).await?;
        let mux = guard.transport.as_ref().unwrap().mux();
        let sid = guard.session.session_id.to_string();
        drop(guard);

        RagClient::new(mux)
            .upload_vectors(&sid, vectors, replace)
            .await
    }

    /// Search the session's vector store on the host.
    pub async fn search_vectors(
        &self,
        session_id: U256,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorSearchResult>> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        self.ensure_transport(&mut *guard).await?;
        self.ensure_session_init(&mut *guard).await?;
        let mux = guard.transport.as_ref().unwrap().mux();
        let sid = guard.session.session_id.to_string();
        drop(guard);

        RagClient::new(mux)
            .search_vectors(&sid, query_vector, k, threshold)
            .await
    }

    /// Attach an externally managed transport to a session. Intended for
    /// embedders that own the socket and for tests; SDK-owned sockets
    /// are opened lazily on the first send.
    pub async fn attach_transport(&self, session_id: U256, mux: Arc<Multiplexer>) -> Result<()> {
        let entry = self.entry(session_id).await?;
        let mut guard = entry.lock().await;
        guard.transport = Some(TransportHandle::External(mux));
        guard.init_sent = false;
        Ok(())
    }

    /// Current state of a session, if tracked.
    pub async fn session_state(&self, session_id: U256) -> Option<SessionState> {
        let entry = self.sessions.read().await.get(&session_id).cloned()?;
        let guard = entry.lock().await;
        Some(guard.session.state)
    }

    async fn entry(&self, session_id: U256) -> Result<Arc<Mutex<SessionEntry>>> {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .ok_or_else(|| SdkError::SessionNotFound(session_id.to_string()))
    }

    async fn ensure_transport(&self, entry: &mut SessionEntry) -> Result<()> {
        if let Some(handle) = &entry.transport {
            if handle.mux().is_connected() {
                return Ok(());
            }
            // Stale handle from a disconnect; reopen below
            entry.transport = None;
            entry.init_sent = false;
        }

        let endpoint = entry.session.host_endpoint.clone().ok_or_else(|| {
            SdkError::NetworkError("no endpoint known for session host".to_string())
        })?;
        let ws = WsTransport::connect(&ws_url(&endpoint)?).await?;
        entry.transport = Some(TransportHandle::Socket(ws));
        entry.init_sent = false;
        Ok(())
    }

    /// Transmit the session init exactly once per transport.
    async fn ensure_session_init(&self, entry: &mut SessionEntry) -> Result<()> {
        if entry.init_sent {
            return Ok(());
        }
        let mux = entry.transport.as_ref().unwrap().mux();

        if entry.session.encryption_enabled {
            // Fresh key per establishment; the index rebinds to zero
            let key = SessionKey::generate();
            entry.session.install_session_key(key);

            let record = self
                .directory
                .host_record(entry.session.chain_id, entry.session.host_address)
                .await?;
            let directory_key = record.as_ref().and_then(|r| r.public_key.clone());
            let host_pub = self
                .host_keys
                .resolve(
                    &format!("{:?}", entry.session.host_address),
                    entry.session.host_endpoint.as_deref(),
                    directory_key.as_deref(),
                )
                .await?;

            let payload = SessionInitPayload {
                session_key_hex: entry.session.session_key()?.to_hex(),
                job_id: entry.session.job_id,
                model_name: entry.session.model.display_name(),
                price_per_token: entry.session.price_per_token,
                vector_db: entry.session.vector_db_ref.clone(),
            };
            let envelope = self.encryption.session_init_encrypt(&host_pub, &payload)?;

            mux.send(&ClientFrame::EncryptedSessionInit {
                payload: envelope,
                chain_id: entry.session.chain_id,
                session_id: entry.session.session_id.to_string(),
                job_id: entry.session.job_id.to_string(),
            })?;
            debug!("Encrypted session init sent for {}", entry.session.session_id);
        } else {
            mux.send(&ClientFrame::SessionInit {
                chain_id: entry.session.chain_id,
                session_id: entry.session.session_id.to_string(),
                job_id: entry.session.job_id.to_string(),
                user_address: self.encryption.address().to_string(),
                vector_database: entry.session.vector_db_ref.clone(),
            })?;
            debug!("Plaintext session init sent for {}", entry.session.session_id);
        }

        entry.init_sent = true;
        Ok(())
    }

    /// Run context injection when the session has a RAG config; any
    /// failure falls back to the unmodified prompt.
    async fn maybe_augment(
        &self,
        entry: &SessionEntry,
        mux: &Arc<Multiplexer>,
        prompt: &str,
    ) -> String {
        let Some(rag) = entry.rag.as_ref().filter(|r| r.enabled) else {
            return prompt.to_string();
        };
        let Some(endpoint) = entry.session.host_endpoint.as_deref() else {
            warn!("RAG enabled but no endpoint for embeddings; sending prompt unaugmented");
            return prompt.to_string();
        };

        let embedder = EmbeddingClient::new(endpoint, entry.session.chain_id);
        let rag_client = RagClient::new(Arc::clone(mux));
        augment_prompt(
            &embedder,
            &rag_client,
            &entry.session.session_id.to_string(),
            prompt,
            rag.top_k,
            rag.threshold,
        )
        .await
    }

    async fn persist_exchange(&self, session: &Session, prompt: &str, response: &str) {
        let sid = session.session_id.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let _ = self
            .store
            .append_message(
                &sid,
                StoredMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                    timestamp: now.clone(),
                },
            )
            .await;
        let _ = self
            .store
            .append_message(
                &sid,
                StoredMessage {
                    role: "assistant".to_string(),
                    content: response.to_string(),
                    timestamp: now,
                },
            )
            .await;
    }
}

/// Derive the WebSocket URL from a host's HTTP endpoint.
fn ws_url(endpoint: &str) -> Result<String> {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| SdkError::InvalidParameter(format!("invalid endpoint: {}", e)))?;
    let scheme = match parsed.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SdkError::InvalidParameter(format!(
                "unsupported endpoint scheme: {}",
                other
            )))
        }
    };
    let host = parsed
        .host_str()
        .ok_or_else(|| SdkError::InvalidParameter("endpoint has no host".to_string()))?;
    let port = parsed
        .port()
        .map(|p| format!(":{}", p))
        .unwrap_or_default();
    Ok(format!("{}://{}{}/v1/ws", scheme, host, port))
}
