//! Session Lifecycle Tests
//!
//! Start, checkpoint, complete and end against in-memory collaborators,
//! covering host selection modes, price validation at session start,
//! and completion idempotency.

use super::common::{fixture, host_record, CHAIN, MODEL};
use ethers::types::{Address, U256};
use fabstir_llm_sdk::collaborators::payment::{CreateJobRequest, PaymentClient};
use fabstir_llm_sdk::{
    CheckpointProof, ConversationStore, HostSelectionMode, SdkError, SessionConfig, SessionJob,
    SessionState, SettingsStore, UserSettings,
};

#[tokio::test]
async fn test_start_session_records_everything() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();

    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Active)
    );

    let record = fx
        .store
        .get_session(&job.session_id.to_string())
        .await
        .unwrap()
        .expect("minimal record persisted");
    assert_eq!(record.metadata.chain_id, CHAIN);
    assert_eq!(record.metadata.status, "active");
    assert!(record.metadata.encryption);

    // The chosen host becomes the user's last host
    let settings = fx.settings.get().await.unwrap();
    assert_eq!(settings.last_host_address, Some(Address::repeat_byte(0x01)));
}

#[tokio::test]
async fn test_start_session_rejects_unsupported_chain() {
    let fx = fixture();
    assert!(matches!(
        fx.manager.start_session(SessionConfig::new(1, MODEL)).await,
        Err(SdkError::UnsupportedChain(1))
    ));
    assert!(matches!(
        fx.manager.start_session(SessionConfig::new(0, MODEL)).await,
        Err(SdkError::MissingChainId)
    ));
}

#[tokio::test]
async fn test_start_session_rejects_bad_model() {
    let fx = fixture();
    assert!(matches!(
        fx.manager
            .start_session(SessionConfig::new(CHAIN, "not a model"))
            .await,
        Err(SdkError::InvalidModelId(_))
    ));
}

#[tokio::test]
async fn test_no_hosts_for_unknown_model() {
    let fx = fixture();
    let result = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, "other/repo:unknown.gguf"))
        .await;
    assert!(matches!(result, Err(SdkError::NoHostsAvailable { .. })));
}

#[tokio::test]
async fn test_cheapest_mode_picks_lowest_price() {
    let fx = fixture();
    fx.directory
        .register_host(CHAIN, host_record(0x02, 250_000, None))
        .unwrap();
    fx.settings
        .save(UserSettings {
            host_selection_mode: HostSelectionMode::Cheapest,
            ..Default::default()
        })
        .await
        .unwrap();

    fx.manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();
    let settings = fx.settings.get().await.unwrap();
    assert_eq!(settings.last_host_address, Some(Address::repeat_byte(0x02)));
}

#[tokio::test]
async fn test_specific_mode_requires_preferred_host() {
    let fx = fixture();
    fx.settings
        .save(UserSettings {
            host_selection_mode: HostSelectionMode::Specific,
            preferred_host_address: Some(Address::repeat_byte(0x09)), // not registered
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(matches!(
        fx.manager.start_session(SessionConfig::new(CHAIN, MODEL)).await,
        Err(SdkError::NoHostsAvailable { .. })
    ));

    fx.settings
        .save(UserSettings {
            host_selection_mode: HostSelectionMode::Specific,
            preferred_host_address: Some(Address::repeat_byte(0x01)),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_stable_price_out_of_range_surfaces_unwrapped() {
    let fx = fixture();
    // Valid native default, but far above the stablecoin ceiling
    fx.directory
        .register_host(5611, host_record(0x03, 200_000_000, None))
        .unwrap();

    let mut config = SessionConfig::new(5611, MODEL);
    config.payment_token = Some(Address::repeat_byte(0xee));
    let result = fx.manager.start_session(config).await;

    match result {
        Err(SdkError::PricingValidation { kind, max, .. }) => {
            assert_eq!(kind, "stable");
            assert_eq!(max, 100_000_000);
        }
        other => panic!("expected unwrapped PricingValidation, got {:?}", other),
    }
    // No session record was created
    assert_eq!(fx.store.session_count(), 0);
}

#[tokio::test]
async fn test_checkpoint_totals_monotonic() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();

    fx.manager
        .submit_checkpoint(
            job.session_id,
            CheckpointProof {
                cumulative_tokens: 100,
                proof: vec![1],
            },
        )
        .await
        .unwrap();
    fx.manager
        .submit_checkpoint(
            job.session_id,
            CheckpointProof {
                cumulative_tokens: 250,
                proof: vec![2],
            },
        )
        .await
        .unwrap();
    assert_eq!(fx.payment.checkpoint_count(job.session_id), 2);

    // A regressing total is rejected after the payment call is made;
    // the recorded total stays at 250
    let result = fx
        .manager
        .submit_checkpoint(
            job.session_id,
            CheckpointProof {
                cumulative_tokens: 200,
                proof: vec![3],
            },
        )
        .await;
    assert!(result.is_err());

    let record = fx
        .store
        .get_session(&job.session_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.metadata.total_tokens, 250);
}

#[tokio::test]
async fn test_complete_session_is_idempotent() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();

    fx.manager
        .complete_session(job.session_id, 500, &[9, 9])
        .await
        .unwrap();
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Completed)
    );
    assert_eq!(fx.payment.completed_tokens(job.session_id), Some(500));

    // Completing again, and completing a session this process never
    // tracked, both succeed without a not-found error
    fx.manager
        .complete_session(job.session_id, 500, &[9, 9])
        .await
        .unwrap();
    fx.manager
        .complete_session(U256::from(424242u64), 10, &[])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_end_session_terminal_and_blocks_sends() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();

    fx.manager.end_session(job.session_id).await.unwrap();
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Ended)
    );

    let result = fx
        .manager
        .send_prompt_streaming(job.session_id, "hello?", |_| {})
        .await;
    assert!(matches!(result, Err(SdkError::SessionNotActive { .. })));

    let record = fx
        .store
        .get_session(&job.session_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.metadata.status, "ended");
}

#[tokio::test]
async fn test_pause_resume_cycle() {
    let fx = fixture();
    let job = fx
        .manager
        .start_session(SessionConfig::new(CHAIN, MODEL))
        .await
        .unwrap();

    fx.manager.pause_session(job.session_id).await.unwrap();
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Paused)
    );
    let result = fx
        .manager
        .send_prompt_streaming(job.session_id, "while paused", |_| {})
        .await;
    assert!(matches!(result, Err(SdkError::SessionNotActive { .. })));

    fx.manager.resume_session(job.session_id).await.unwrap();
    assert_eq!(
        fx.manager.session_state(job.session_id).await,
        Some(SessionState::Active)
    );
}

#[tokio::test]
async fn test_unknown_session_operations_fail() {
    let fx = fixture();
    let ghost = U256::from(777u64);

    assert!(matches!(
        fx.manager.end_session(ghost).await,
        Err(SdkError::SessionNotFound(_))
    ));
    assert!(matches!(
        fx.manager
            .submit_checkpoint(
                ghost,
                CheckpointProof {
                    cumulative_tokens: 1,
                    proof: vec![]
                }
            )
            .await,
        Err(SdkError::SessionNotFound(_))
    ));
}

mockall::mock! {
    FlakyPayment {}

    #[async_trait::async_trait]
    impl PaymentClient for FlakyPayment {
        async fn create_session_job(
            &self,
            request: &CreateJobRequest,
        ) -> fabstir_llm_sdk::Result<SessionJob>;
        async fn submit_checkpoint(
            &self,
            session_id: U256,
            proof: &CheckpointProof,
        ) -> fabstir_llm_sdk::Result<()>;
        async fn complete_session(
            &self,
            session_id: U256,
            total_tokens: u64,
            final_proof: &[u8],
        ) -> fabstir_llm_sdk::Result<()>;
    }
}

#[tokio::test]
async fn test_payment_failure_leaves_no_session_behind() {
    use std::collections::HashSet;
    use std::sync::Arc;

    let mut payment = MockFlakyPayment::new();
    payment
        .expect_create_session_job()
        .returning(|_| Err(SdkError::NetworkError("rpc unavailable".to_string())));

    let directory = Arc::new(fabstir_llm_sdk::InMemoryHostDirectory::new());
    directory
        .register_host(CHAIN, host_record(0x01, 300_000, None))
        .unwrap();
    let store = Arc::new(fabstir_llm_sdk::InMemoryConversationStore::new());

    let manager = fabstir_llm_sdk::SessionManager::new(
        Arc::new(fabstir_llm_sdk::EncryptionManager::from_seed(b"w")),
        Arc::new(payment),
        directory,
        store.clone(),
        Arc::new(fabstir_llm_sdk::InMemorySettingsStore::new()),
        HashSet::from([CHAIN]),
    );

    let result = manager.start_session(SessionConfig::new(CHAIN, MODEL)).await;
    assert!(matches!(result, Err(SdkError::NetworkError(_))));
    assert_eq!(store.session_count(), 0);
}
