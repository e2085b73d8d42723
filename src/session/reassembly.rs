// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inference Response Reassembly
//!
//! Per send, inbound frames are folded into one response string. A
//! response terminates on the first of: a chunk flagged `final`, a
//! whole-response frame, or a `stream_end`; later terminators for the
//! same send are idempotently ignored behind a single resolved flag.
//! The terminator set is a compatibility surface: different host
//! versions and mobile browsers fire different ones.
//!
//! A sliding inactivity window applies: every accepted chunk resets the
//! timer, so the timeout measures silence, not total duration. On an
//! encrypted stream a chunk that fails to decrypt is logged and skipped
//! without failing the send; a terminator that fails to decrypt still
//! resolves the send with the accumulated text when prior chunks
//! succeeded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::crypto::SessionKey;
use crate::encryption::EncryptionManager;
use crate::error::{Result, SdkError};
use crate::transport::{HostFrame, TransportEvent};

/// Sliding inactivity window for streamed inference.
pub const RESPONSE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of feeding one frame to the assembler.
pub enum Step {
    /// Informational or ignored frame; the window does not reset.
    Idle,
    /// A chunk was accepted; the caller resets the window.
    ChunkAccepted,
    /// The response terminated with the accumulated text.
    Done(String),
}

/// Folds inference frames into a response.
pub struct ResponseAssembler<'a> {
    encryption: Option<(&'a EncryptionManager, &'a SessionKey)>,
    parts: Vec<String>,
    resolved: bool,
}

impl<'a> ResponseAssembler<'a> {
    /// Assembler for an encrypted session.
    pub fn encrypted(manager: &'a EncryptionManager, key: &'a SessionKey) -> Self {
        Self {
            encryption: Some((manager, key)),
            parts: Vec::new(),
            resolved: false,
        }
    }

    /// Assembler for a plaintext session.
    pub fn plaintext() -> Self {
        Self {
            encryption: None,
            parts: Vec::new(),
            resolved: false,
        }
    }

    fn assembled(&self) -> String {
        self.parts.concat()
    }

    fn accept(&mut self, text: String, on_token: &mut dyn FnMut(&str)) {
        on_token(&text);
        self.parts.push(text);
    }

    fn resolve(&mut self) -> Step {
        self.resolved = true;
        Step::Done(self.assembled())
    }

    /// Terminator whose payload could not be read: resolve with what we
    /// have, or fail when nothing was accumulated.
    fn resolve_degraded(&mut self, error: SdkError) -> Result<Step> {
        if self.parts.is_empty() {
            Err(error)
        } else {
            warn!("Final message unreadable, resolving with accumulated content");
            Ok(self.resolve())
        }
    }

    fn decrypt(&self, payload: &crate::transport::EncryptedMessage) -> Result<String> {
        match self.encryption {
            Some((manager, key)) => manager.message_decrypt(key, payload),
            None => Err(SdkError::EncryptionNotAvailable(
                "encrypted frame on a plaintext session".to_string(),
            )),
        }
    }

    /// Feed one inbound frame.
    pub fn handle(
        &mut self,
        frame: HostFrame,
        on_token: &mut dyn FnMut(&str),
    ) -> Result<Step> {
        if self.resolved {
            // Double-resolution guard: anything after the terminator is
            // ignored
            return Ok(Step::Idle);
        }

        match frame {
            HostFrame::EncryptedChunk { payload, is_final } => match self.decrypt(&payload) {
                Ok(text) => {
                    self.accept(text, on_token);
                    if is_final {
                        Ok(self.resolve())
                    } else {
                        Ok(Step::ChunkAccepted)
                    }
                }
                Err(e) if is_final => self.resolve_degraded(e),
                Err(e) => {
                    warn!("Skipping undecryptable chunk: {}", e);
                    Ok(Step::ChunkAccepted)
                }
            },

            HostFrame::EncryptedResponse { payload } => match self.decrypt(&payload) {
                Ok(text) => {
                    self.accept(text, on_token);
                    Ok(self.resolve())
                }
                Err(e) => self.resolve_degraded(e),
            },

            HostFrame::StreamChunk { content, is_final } => {
                self.accept(content, on_token);
                if is_final {
                    Ok(self.resolve())
                } else {
                    Ok(Step::ChunkAccepted)
                }
            }

            HostFrame::Response { content } => {
                self.accept(content, on_token);
                Ok(self.resolve())
            }

            HostFrame::StreamEnd => Ok(self.resolve()),

            HostFrame::Error { message } => Err(SdkError::RequestError(message)),

            HostFrame::ProofSubmitted
            | HostFrame::CheckpointSubmitted
            | HostFrame::SessionCompleted => {
                debug!("Observed informational frame during send");
                Ok(Step::Idle)
            }

            // RAG responses are routed by request id and never reach the
            // active-send handler
            HostFrame::UploadVectorsResponse(_) | HostFrame::SearchVectorsResponse(_) => {
                Ok(Step::Idle)
            }
        }
    }
}

/// Drive one send to completion against the transport event stream.
pub async fn drive_response(
    rx: &mut mpsc::UnboundedReceiver<TransportEvent>,
    assembler: &mut ResponseAssembler<'_>,
    window: Duration,
    on_token: &mut dyn FnMut(&str),
) -> Result<String> {
    let mut deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SdkError::ResponseTimeout(window));
        }

        match timeout(remaining, rx.recv()).await {
            Err(_) => return Err(SdkError::ResponseTimeout(window)),
            Ok(None) | Ok(Some(TransportEvent::Disconnected)) => {
                return Err(SdkError::NetworkError(
                    "transport disconnected during send".to_string(),
                ))
            }
            Ok(Some(TransportEvent::Frame(frame))) => {
                match assembler.handle(frame, on_token)? {
                    Step::Done(text) => return Ok(text),
                    Step::ChunkAccepted => deadline = Instant::now() + window,
                    Step::Idle => {}
                }
            }
        }
    }
}
