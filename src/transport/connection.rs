// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Transport Multiplexer
//!
//! A single full-duplex WebSocket carries everything a session does:
//! streamed inference frames and request-scoped RAG RPCs. The
//! [`Multiplexer`] owns the dispatch logic and is driven by explicit
//! inbound-frame callbacks, so the protocol state machine is identical
//! whether frames come from a live socket or a test harness.
//!
//! Dispatch rules:
//!
//! - `uploadVectorsResponse` / `searchVectorsResponse` go to the single
//!   installed RAG-response handler, which matches them to the awaiting
//!   request by `requestId` and drops stale ones. Install and uninstall
//!   are paired; installing replaces (and closes) any prior handler, so
//!   a session re-established on one connection never double-dispatches
//!   a response. With no handler installed they fall back to the
//!   pending table, keeping `send_and_await` usable for one-off RPCs.
//! - All inference-family frames go to the single active-send handler.
//!   Installing a handler replaces any prior one, which keeps dispatch
//!   single-homed when a session is re-established on one connection.
//! - Frames with unknown `type` tags are ignored.
//!
//! The pending table backs [`send_and_await`] for generic one-shot
//! request correlation; entries leave it only on resolution, rejection
//! or cancellation.
//!
//! [`send_and_await`]: Multiplexer::send_and_await
//!
//! Frames are processed sequentially per connection; sends may be issued
//! concurrently and are queued at the socket writer in submission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::frames::{ClientFrame, HostFrame};
use super::pending::PendingRequests;
use crate::error::{Result, SdkError};

/// What the active-send handler receives from the dispatch loop.
#[derive(Debug)]
pub enum TransportEvent {
    Frame(HostFrame),
    Disconnected,
}

/// Frame dispatcher shared by the socket pump and the session layer.
pub struct Multiplexer {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingRequests,
    inference: RwLock<Option<mpsc::UnboundedSender<TransportEvent>>>,
    rag: RwLock<Option<mpsc::UnboundedSender<HostFrame>>>,
    connected: AtomicBool,
}

impl Multiplexer {
    pub fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound,
            pending: PendingRequests::new(),
            inference: RwLock::new(None),
            rag: RwLock::new(None),
            connected: AtomicBool::new(true),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a frame for transmission without awaiting a response.
    pub fn send(&self, frame: &ClientFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(SdkError::NetworkError("transport closed".to_string()));
        }
        self.outbound
            .send(frame.to_json())
            .map_err(|_| SdkError::NetworkError("transport closed".to_string()))
    }

    /// Send a request frame and await the response correlated by
    /// `request_id`, failing after `timeout` of total elapsed time.
    ///
    /// On timeout the pending entry is cancelled, so a late response is
    /// dropped instead of resolving a request nobody awaits.
    pub async fn send_and_await(
        &self,
        request_id: &str,
        frame: &ClientFrame,
        timeout: Duration,
    ) -> Result<HostFrame> {
        let rx = self.pending.insert(request_id)?;
        if let Err(e) = self.send(frame) {
            self.pending.cancel(request_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SdkError::NetworkError(
                "request cancelled by transport teardown".to_string(),
            )),
            Err(_) => {
                self.pending.cancel(request_id);
                Err(SdkError::ResponseTimeout(timeout))
            }
        }
    }

    /// Install the active-send handler, replacing any prior one.
    ///
    /// Paired with [`uninstall_inference_handler`]; the returned channel
    /// receives every inference-family frame until then.
    ///
    /// [`uninstall_inference_handler`]: Multiplexer::uninstall_inference_handler
    pub fn install_inference_handler(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.inference.write().unwrap();
        if slot.replace(tx).is_some() {
            debug!("Replacing previously installed inference handler");
        }
        rx
    }

    pub fn uninstall_inference_handler(&self) {
        self.inference.write().unwrap().take();
    }

    /// Install the RAG-response handler, replacing any prior one.
    ///
    /// At most one handler is active at a time: installing closes the
    /// previous handler's channel. Paired with
    /// [`uninstall_rag_handler`]; the returned channel receives every
    /// RAG response frame until then, and the handler matches them to
    /// its awaiting request by `requestId`.
    ///
    /// [`uninstall_rag_handler`]: Multiplexer::uninstall_rag_handler
    pub fn install_rag_handler(&self) -> mpsc::UnboundedReceiver<HostFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut slot = self.rag.write().unwrap();
        if slot.replace(tx).is_some() {
            debug!("Replacing previously installed RAG handler");
        }
        rx
    }

    pub fn uninstall_rag_handler(&self) {
        self.rag.write().unwrap().take();
    }

    /// Process one inbound text frame. Called sequentially per
    /// connection.
    pub fn handle_incoming(&self, text: &str) {
        let Some(frame) = HostFrame::parse(text) else {
            return;
        };

        match frame {
            HostFrame::UploadVectorsResponse(ref resp) => {
                let id = resp.request_id.clone();
                self.dispatch_rag(&id, frame);
            }
            HostFrame::SearchVectorsResponse(ref resp) => {
                let id = resp.request_id.clone();
                self.dispatch_rag(&id, frame);
            }
            other => {
                let slot = self.inference.read().unwrap();
                match slot.as_ref() {
                    Some(tx) => {
                        let _ = tx.send(TransportEvent::Frame(other));
                    }
                    None => debug!("No active send; dropping frame {:?}", other),
                }
            }
        }
    }

    /// Deliver a RAG response: the installed handler takes precedence;
    /// with none live, fall back to the generic pending table so
    /// [`send_and_await`] callers still resolve.
    ///
    /// [`send_and_await`]: Multiplexer::send_and_await
    fn dispatch_rag(&self, request_id: &str, frame: HostFrame) {
        let frame = {
            let slot = self.rag.read().unwrap();
            match slot.as_ref() {
                Some(tx) => match tx.send(frame) {
                    Ok(()) => return,
                    // Receiver dropped without uninstall; treat as absent
                    Err(mpsc::error::SendError(frame)) => frame,
                },
                None => frame,
            }
        };
        self.pending.resolve(request_id, frame);
    }

    /// Tear down dispatch state after the socket closes: every pending
    /// request fails, the active send observes a disconnect, and the
    /// RAG handler's channel closes.
    pub fn on_disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return; // already torn down
        }
        self.pending
            .reject_all(|| SdkError::NetworkError("connection closed".to_string()));
        if let Some(tx) = self.inference.read().unwrap().as_ref() {
            let _ = tx.send(TransportEvent::Disconnected);
        }
        self.rag.write().unwrap().take();
        info!("Transport disconnected, pending requests rejected");
    }
}

/// A live WebSocket connection to a host, pumping frames in and out of
/// a [`Multiplexer`].
pub struct WsTransport {
    mux: Arc<Multiplexer>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl WsTransport {
    /// Connect to the host's WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| SdkError::InvalidParameter(format!("invalid WebSocket URL: {}", e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(SdkError::InvalidParameter(format!(
                "expected ws:// or wss:// URL, got {}",
                parsed.scheme()
            )));
        }

        info!("Connecting to host WebSocket: {}", url);
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| SdkError::NetworkError(format!("WebSocket connect failed: {}", e)))?;
        let (mut sink, mut stream) = socket.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let mux = Arc::new(Multiplexer::new(out_tx));

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
        });

        let reader_mux = Arc::clone(&mux);
        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_mux.handle_incoming(&text),
                    Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                        Ok(text) => reader_mux.handle_incoming(text),
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {} // ping/pong handled by tungstenite
                    Err(e) => {
                        warn!("WebSocket read failed: {}", e);
                        break;
                    }
                }
            }
            reader_mux.on_disconnect();
        });

        Ok(Self { mux, reader, writer })
    }

    pub fn multiplexer(&self) -> Arc<Multiplexer> {
        Arc::clone(&self.mux)
    }

    /// Close the connection and fail anything still in flight.
    pub fn close(&self) {
        self.mux.on_disconnect();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}
