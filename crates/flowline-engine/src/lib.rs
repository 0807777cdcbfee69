// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session and flow execution engine for Flowline.
//!
//! The [`FlowEngine`] is the central coordinator that:
//! - Deduplicates inbound webhook messages
//! - Routes keywords to campaign and system flows
//! - Walks flow graphs and persists each turn atomically
//! - Hands outbound messages to the delivery dispatcher
//!
//! Background [`jobs`] expire idle sessions, retry deliveries, drive campaign
//! windows, and nudge quiet contacts.

pub mod api;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod jobs;
pub mod lifecycle;
pub mod locks;
pub mod retry;
pub mod router;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use flowline_config::model::FlowlineConfig;
use flowline_core::{ApiCaller, Clock, MessagingProvider, StorageAdapter};

pub use api::HttpApiCaller;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::{FlowEngine, TurnKind, TurnReport};
pub use executor::FlowExecutor;
pub use jobs::Job;
pub use lifecycle::SessionLifecycle;
pub use retry::{RetryPolicy, RetryScheduler};

/// The engine and its jobs wired against one set of adapters.
pub struct EngineServices {
    pub engine: Arc<FlowEngine>,
    pub lifecycle: Arc<SessionLifecycle>,
    /// Each job with its run interval.
    pub jobs: Vec<(Arc<dyn Job>, Duration)>,
}

impl EngineServices {
    pub fn new(
        config: &FlowlineConfig,
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        provider: Arc<dyn MessagingProvider + Send + Sync>,
        api: Arc<dyn ApiCaller + Send + Sync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            provider,
            clock.clone(),
            &config.delivery,
        ));
        let engine = Arc::new(FlowEngine::new(
            storage.clone(),
            dispatcher.clone(),
            api,
            clock.clone(),
            config.engine.clone(),
        ));
        let lifecycle = Arc::new(SessionLifecycle::new(
            storage.clone(),
            clock.clone(),
            config.engine.idle_window_mins,
        ));

        let jobs_cfg = &config.jobs;
        let jobs: Vec<(Arc<dyn Job>, Duration)> = vec![
            (
                Arc::new(jobs::CampaignScheduleJob::new(storage.clone(), clock.clone())),
                Duration::from_secs(jobs_cfg.campaign_interval_secs),
            ),
            (
                Arc::new(jobs::SessionExpiryJob::new(SessionLifecycle::new(
                    storage.clone(),
                    clock.clone(),
                    config.engine.idle_window_mins,
                ))),
                Duration::from_secs(jobs_cfg.expiry_interval_secs),
            ),
            (
                Arc::new(jobs::RetryJob::new(RetryScheduler::new(
                    storage.clone(),
                    dispatcher.clone(),
                    clock.clone(),
                    &config.delivery,
                ))),
                Duration::from_secs(jobs_cfg.retry_interval_secs),
            ),
            (
                Arc::new(jobs::FeedbackJob::new(
                    storage,
                    dispatcher,
                    clock,
                    &config.engine,
                    &config.delivery,
                )),
                Duration::from_secs(jobs_cfg.feedback_interval_secs),
            ),
        ];

        Self {
            engine,
            lifecycle,
            jobs,
        }
    }

    /// Job handles only, for one-shot runs.
    pub fn job_list(&self) -> Vec<Arc<dyn Job>> {
        self.jobs.iter().map(|(job, _)| job.clone()).collect()
    }
}
