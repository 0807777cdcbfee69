// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete engine with mock adapters, a temp
//! SQLite database, a manual clock, and a seeded demo campaign. Provides
//! `send()` to drive the full turn pipeline in tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use flowline_config::model::{FlowlineConfig, StorageConfig};
use flowline_core::flow::{ApiCall, BranchRule, FlowDefinition, FlowNode, NodeKind, Predicate};
use flowline_core::types::{Campaign, CampaignStatus, InboundMessage, Session};
use flowline_core::{FlowlineError, StorageAdapter};
use flowline_engine::{EngineServices, FlowEngine, Job, SessionLifecycle, TurnReport};
use flowline_storage::SqliteStorage;

use crate::clock::ManualClock;
use crate::mock_api::MockApiCaller;
use crate::mock_provider::MockProvider;

/// Start time of every harness clock.
pub const HARNESS_T0: &str = "2026-03-01T10:00:00.000Z";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: FlowlineConfig,
    seed: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: FlowlineConfig::default(),
            seed: true,
        }
    }

    /// Adjust the configuration before the engine is built.
    pub fn with_config(mut self, f: impl FnOnce(&mut FlowlineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    /// Start from an empty database.
    pub fn without_seed(mut self) -> Self {
        self.seed = false;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(self) -> Result<TestHarness, FlowlineError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| FlowlineError::Storage { source: e.into() })?;
        let mut config = self.config;
        config.storage = StorageConfig {
            database_path: temp_dir.path().join("test.db").to_string_lossy().into_owned(),
            wal_mode: true,
        };

        let storage = SqliteStorage::new(config.storage.clone());
        storage.initialize().await?;
        let storage: Arc<dyn StorageAdapter + Send + Sync> = Arc::new(storage);

        if self.seed {
            seed_demo(&storage).await?;
        }

        let clock = Arc::new(ManualClock::at(HARNESS_T0));
        let provider = Arc::new(MockProvider::new());
        let api = Arc::new(MockApiCaller::new());
        let services = EngineServices::new(
            &config,
            storage.clone(),
            provider.clone(),
            api.clone(),
            clock.clone(),
        );

        Ok(TestHarness {
            jobs: services.job_list(),
            engine: services.engine,
            lifecycle: services.lifecycle,
            storage,
            clock,
            provider,
            api,
            config,
            next_id: AtomicU64::new(1),
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with mock adapters and temp storage.
pub struct TestHarness {
    pub engine: Arc<FlowEngine>,
    pub lifecycle: Arc<SessionLifecycle>,
    /// Every scheduled job, in the order `serve` starts them.
    pub jobs: Vec<Arc<dyn Job>>,
    /// SQLite storage adapter (temp DB, cleaned up on drop).
    pub storage: Arc<dyn StorageAdapter + Send + Sync>,
    pub clock: Arc<ManualClock>,
    pub provider: Arc<MockProvider>,
    pub api: Arc<MockApiCaller>,
    pub config: FlowlineConfig,
    next_id: AtomicU64,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Deliver a text from `contact` with a fresh provider message id.
    pub async fn send(&self, contact: &str, text: &str) -> Result<TurnReport, FlowlineError> {
        let id = format!("wamid.in.{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.send_with_id(contact, text, &id).await
    }

    /// Deliver a text with a chosen provider message id, for redelivery tests.
    pub async fn send_with_id(
        &self,
        contact: &str,
        text: &str,
        provider_message_id: &str,
    ) -> Result<TurnReport, FlowlineError> {
        let msg = InboundMessage {
            provider_message_id: provider_message_id.to_string(),
            contact_id: contact.to_string(),
            text: text.to_string(),
            received_at: None,
        };
        self.engine.handle_inbound(&msg).await
    }

    pub async fn active_session(&self, contact: &str) -> Option<Session> {
        self.storage
            .active_session_for_contact(contact)
            .await
            .ok()
            .flatten()
    }

    /// Run every job once, in order.
    pub async fn run_jobs(&self) -> Result<u64, FlowlineError> {
        let mut total = 0;
        for job in &self.jobs {
            total += job.run_once().await?;
        }
        Ok(total)
    }
}

/// The seeded campaign flow.
///
/// `START` asks for a reply: `yes` completes at `COUPON`, `info` loops back
/// through `INFO`, `points` runs the `CHECK` api step, anything else gets
/// `HELP` and stays on `START`.
pub fn demo_flow() -> FlowDefinition {
    fn node(key: &str, kind: NodeKind) -> FlowNode {
        FlowNode {
            key: key.into(),
            kind,
            allowed_inputs: vec![],
            wait_timeout_secs: None,
        }
    }
    fn rule(input: &str, target: &str) -> BranchRule {
        BranchRule {
            when: Predicate::Equals(input.into()),
            target: target.into(),
        }
    }

    FlowDefinition {
        id: "promo".into(),
        name: "Spring promo".into(),
        entry_key: "START".into(),
        fallback_key: "HELP".into(),
        nodes: vec![
            node(
                "START",
                NodeKind::Message {
                    body: "Welcome to the spring promo! Reply YES for a coupon.".into(),
                    next: None,
                    rules: vec![
                        rule("yes", "COUPON"),
                        rule("info", "INFO"),
                        rule("points", "CHECK"),
                    ],
                    fallback: Some("HELP".into()),
                },
            ),
            node(
                "COUPON",
                NodeKind::Message {
                    body: "Your coupon code is SPRING20.".into(),
                    next: None,
                    rules: vec![],
                    fallback: None,
                },
            ),
            node(
                "INFO",
                NodeKind::Message {
                    body: "The promo runs until the end of March.".into(),
                    next: Some("START".into()),
                    rules: vec![],
                    fallback: None,
                },
            ),
            node(
                "HELP",
                NodeKind::Fallback {
                    body: "Please reply YES or INFO.".into(),
                    next: None,
                },
            ),
            node(
                "CHECK",
                NodeKind::Api {
                    call: ApiCall {
                        method: "GET".into(),
                        url: "http://points.test/balance".into(),
                        params: BTreeMap::from([(
                            "phone".to_string(),
                            "{{contact_id}}".to_string(),
                        )]),
                    },
                    on_success: "POINTS_OK".into(),
                    on_error: "POINTS_ERR".into(),
                },
            ),
            node(
                "POINTS_OK",
                NodeKind::Message {
                    body: "Your points are on the way.".into(),
                    next: None,
                    rules: vec![],
                    fallback: None,
                },
            ),
            node(
                "POINTS_ERR",
                NodeKind::Message {
                    body: "We could not check your points right now.".into(),
                    next: None,
                    rules: vec![],
                    fallback: None,
                },
            ),
        ],
    }
}

/// Flow `promo`, active campaign `42` owning keyword `promo`, and system
/// keyword `restart` pointing at the same flow.
async fn seed_demo(storage: &Arc<dyn StorageAdapter + Send + Sync>) -> Result<(), FlowlineError> {
    storage.upsert_flow(&demo_flow()).await?;
    storage
        .upsert_campaign(&Campaign {
            id: "42".into(),
            name: "Spring promo".into(),
            flow_id: "promo".into(),
            status: CampaignStatus::Active,
            starts_at: None,
            ends_at: None,
            activated_at: Some("2026-03-01T09:00:00.000Z".into()),
        })
        .await?;
    storage.bind_keyword("promo", "42").await?;
    storage.bind_system_keyword("restart", "promo").await?;
    Ok(())
}
