// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Persistence Collaborators
//!
//! The SDK persists only minimal session metadata and messages through
//! the conversation store, and user preferences through the settings
//! store. Both are external systems behind traits; the in-memory
//! implementations here back tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

/// Minimal per-session metadata kept by the conversation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub chain_id: u64,
    pub model: String,
    /// Host address serving the session.
    pub provider: String,
    pub endpoint: Option<String>,
    pub job_id: String,
    pub status: String,
    pub total_tokens: u64,
    pub start_time: String,
    pub encryption: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub metadata: SessionMetadata,
    pub messages: Vec<StoredMessage>,
    pub created_at: String,
    pub updated_at: String,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_session(&self, record: SessionRecord) -> Result<()>;
    async fn update_status(&self, session_id: &str, status: &str, total_tokens: u64)
        -> Result<()>;
    async fn append_message(&self, session_id: &str, message: StoredMessage) -> Result<()>;
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;
}

/// How a host is chosen when the caller does not name one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostSelectionMode {
    Auto,
    Cheapest,
    Specific,
}

/// User preferences consulted at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub selected_model: Option<String>,
    pub preferred_payment_token: Option<Address>,
    pub host_selection_mode: HostSelectionMode,
    pub preferred_host_address: Option<Address>,
    pub last_host_address: Option<Address>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            selected_model: None,
            preferred_payment_token: None,
            host_selection_mode: HostSelectionMode::Auto,
            preferred_host_address: None,
            last_host_address: None,
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> Result<UserSettings>;
    async fn save(&self, settings: UserSettings) -> Result<()>;
    async fn set_last_host(&self, address: Address) -> Result<()>;
}

/// In-memory conversation store.
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save_session(&self, record: SessionRecord) -> Result<()> {
        self.sessions
            .lock()
            .unwrap()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_status(
        &self,
        session_id: &str,
        status: &str,
        total_tokens: u64,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| SdkError::SessionNotFound(session_id.to_string()))?;
        record.metadata.status = status.to_string();
        record.metadata.total_tokens = total_tokens;
        record.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }

    async fn append_message(&self, session_id: &str, message: StoredMessage) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| SdkError::SessionNotFound(session_id.to_string()))?;
        record.messages.push(message);
        record.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }
}

/// In-memory settings store.
#[derive(Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<UserSettings>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: UserSettings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self) -> Result<UserSettings> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn save(&self, settings: UserSettings) -> Result<()> {
        *self.settings.lock().unwrap() = settings;
        Ok(())
    }

    async fn set_last_host(&self, address: Address) -> Result<()> {
        self.settings.lock().unwrap().last_host_address = Some(address);
        Ok(())
    }
}
