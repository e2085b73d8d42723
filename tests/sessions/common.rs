//! Shared fixtures for session tests.

use std::collections::HashSet;
use std::sync::Arc;

use ethers::types::{Address, H256, U256};
use fabstir_llm_sdk::{
    EncryptionManager, HostRecord, InMemoryConversationStore, InMemoryHostDirectory,
    InMemorySettingsStore, ModelRef, SessionManager,
};

pub const CHAIN: u64 = 84532;
pub const MODEL: &str = "bartowski/Llama-3-GGUF:llama-3-q4.gguf";

pub struct Fixture {
    pub manager: SessionManager,
    pub directory: Arc<InMemoryHostDirectory>,
    pub store: Arc<InMemoryConversationStore>,
    pub settings: Arc<InMemorySettingsStore>,
    pub payment: Arc<fabstir_llm_sdk::collaborators::payment::MockPaymentClient>,
    pub host_identity: Arc<EncryptionManager>,
}

pub fn model_id() -> H256 {
    ModelRef::parse(MODEL).unwrap().canonical_id()
}

pub fn host_record(addr: u8, price: u64, host_pub: Option<Vec<u8>>) -> HostRecord {
    HostRecord {
        address: Address::repeat_byte(addr),
        api_endpoint: Some("https://host.example:8080".to_string()),
        public_key: host_pub,
        models: vec![model_id()],
        price_per_token: U256::from(price),
    }
}

/// Manager wired to in-memory collaborators, with one host (0x01)
/// registered for [`MODEL`]. The host's static key is published in the
/// directory so encrypted establishment needs no challenge handshake.
pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let directory = Arc::new(InMemoryHostDirectory::new());
    let store = Arc::new(InMemoryConversationStore::new());
    let settings = Arc::new(InMemorySettingsStore::new());
    let payment = Arc::new(fabstir_llm_sdk::collaborators::payment::MockPaymentClient::new());
    let host_identity = Arc::new(EncryptionManager::from_seed(b"fixture host identity"));

    directory
        .register_host(
            CHAIN,
            host_record(0x01, 300_000, Some(host_identity.public_key().to_vec())),
        )
        .unwrap();

    let encryption = Arc::new(EncryptionManager::from_seed(b"fixture client wallet"));
    let manager = SessionManager::new(
        encryption,
        payment.clone(),
        directory.clone(),
        store.clone(),
        settings.clone(),
        HashSet::from([CHAIN, 5611]),
    );

    Fixture {
        manager,
        directory,
        store,
        settings,
        payment,
        host_identity,
    }
}
