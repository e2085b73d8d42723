// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Pending Request Table
//!
//! Correlates outbound request IDs with their response channels. An
//! entry leaves the table on exactly three conditions: resolution,
//! rejection, or cancellation. A response arriving for an absent ID is
//! dropped by the dispatcher, which is what makes duplicate host
//! responses and late frames after a timeout harmless.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use super::frames::HostFrame;
use crate::error::{Result, SdkError};

type ResponseSender = oneshot::Sender<std::result::Result<HostFrame, SdkError>>;

/// Table of in-flight requests keyed by request ID.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, ResponseSender>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the channel its response arrives on.
    ///
    /// Duplicate IDs are rejected; request IDs are caller-generated
    /// UUIDs, so a collision is a caller bug.
    pub fn insert(
        &self,
        request_id: &str,
    ) -> Result<oneshot::Receiver<std::result::Result<HostFrame, SdkError>>> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(request_id) {
            return Err(SdkError::InvalidParameter(format!(
                "duplicate request id: {}",
                request_id
            )));
        }
        inner.insert(request_id.to_string(), tx);
        Ok(rx)
    }

    /// Deliver a response, removing the entry. Returns false when no
    /// entry matched (late or duplicate response).
    pub fn resolve(&self, request_id: &str, frame: HostFrame) -> bool {
        match self.inner.lock().unwrap().remove(request_id) {
            Some(tx) => tx.send(Ok(frame)).is_ok(),
            None => {
                debug!("No pending request for id {}, dropping response", request_id);
                false
            }
        }
    }

    /// Fail a request, removing the entry.
    pub fn reject(&self, request_id: &str, error: SdkError) -> bool {
        match self.inner.lock().unwrap().remove(request_id) {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Remove an entry without resolving it. The awaiting side observes
    /// a closed channel; a cancelled request never resolves.
    pub fn cancel(&self, request_id: &str) {
        self.inner.lock().unwrap().remove(request_id);
    }

    /// Fail every in-flight request, e.g. on transport disconnect.
    pub fn reject_all(&self, make_error: impl Fn() -> SdkError) {
        let entries: Vec<_> = {
            let mut inner = self.inner.lock().unwrap();
            inner.drain().collect()
        };
        for (_, tx) in entries {
            let _ = tx.send(Err(make_error()));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
