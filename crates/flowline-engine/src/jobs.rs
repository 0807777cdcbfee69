// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scheduled jobs.
//!
//! Each job is a single idempotent pass over storage. Every write a job makes
//! is conditional, so overlapping runs and concurrent turns are safe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flowline_config::model::{DeliveryConfig, EngineConfig};
use flowline_core::types::{OutboundPayload, OutboundRecord};
use flowline_core::{format_ts, Clock, FlowlineError, StorageAdapter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::lifecycle::SessionLifecycle;
use crate::retry::RetryScheduler;

/// A periodic maintenance pass.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one pass. Returns the number of rows affected.
    async fn run_once(&self) -> Result<u64, FlowlineError>;
}

/// Expires idle and timed-out ACTIVE sessions.
pub struct SessionExpiryJob {
    lifecycle: SessionLifecycle,
}

impl SessionExpiryJob {
    pub fn new(lifecycle: SessionLifecycle) -> Self {
        Self { lifecycle }
    }
}

#[async_trait]
impl Job for SessionExpiryJob {
    fn name(&self) -> &'static str {
        "session-expiry"
    }

    async fn run_once(&self) -> Result<u64, FlowlineError> {
        self.lifecycle.expire_idle().await
    }
}

/// Reclaims lapsed leases and re-dispatches due delivery attempts.
pub struct RetryJob {
    scheduler: RetryScheduler,
}

impl RetryJob {
    pub fn new(scheduler: RetryScheduler) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl Job for RetryJob {
    fn name(&self) -> &'static str {
        "delivery-retry"
    }

    async fn run_once(&self) -> Result<u64, FlowlineError> {
        Ok(self.scheduler.run_once().await?.total())
    }
}

/// Activates scheduled campaigns whose window opened and ends campaigns
/// whose window closed.
pub struct CampaignScheduleJob {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    clock: Arc<dyn Clock>,
}

impl CampaignScheduleJob {
    pub fn new(storage: Arc<dyn StorageAdapter + Send + Sync>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }
}

#[async_trait]
impl Job for CampaignScheduleJob {
    fn name(&self) -> &'static str {
        "campaign-schedule"
    }

    async fn run_once(&self) -> Result<u64, FlowlineError> {
        let now = format_ts(self.clock.now());
        let activated = self.storage.activate_due_campaigns(&now).await?;
        let ended = self.storage.end_due_campaigns(&now).await?;
        if activated + ended > 0 {
            info!(activated, ended, "campaign windows updated");
        }
        Ok(activated + ended)
    }
}

/// Nudges quiet sessions once, then expires the ones that never answered.
pub struct FeedbackJob {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    prompt_after: chrono::Duration,
    discard_after: chrono::Duration,
    idle_window: chrono::Duration,
    text: String,
    batch_size: u32,
}

impl FeedbackJob {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        engine: &EngineConfig,
        delivery: &DeliveryConfig,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            clock,
            prompt_after: chrono::Duration::minutes(engine.feedback_prompt_after_mins as i64),
            discard_after: chrono::Duration::minutes(engine.feedback_discard_after_mins as i64),
            idle_window: chrono::Duration::minutes(engine.idle_window_mins as i64),
            text: engine.feedback_text.clone(),
            batch_size: delivery.batch_size,
        }
    }
}

#[async_trait]
impl Job for FeedbackJob {
    fn name(&self) -> &'static str {
        "feedback"
    }

    async fn run_once(&self) -> Result<u64, FlowlineError> {
        let now = self.clock.now();
        let ts = format_ts(now);
        let prompt_cutoff = format_ts(now - self.prompt_after);
        let idle_cutoff = format_ts(now - self.idle_window);

        let due = self
            .storage
            .sessions_due_feedback(&prompt_cutoff, &idle_cutoff, self.batch_size)
            .await?;
        let payload = OutboundPayload::text(self.text.clone());
        let mut prompted = 0u64;
        for session in due {
            let record =
                OutboundRecord::pending(Some(&session.id), &session.contact_id, &payload, &ts)?;
            if !self
                .storage
                .record_feedback_prompt(&session, &record, &ts)
                .await?
            {
                debug!(session_id = %session.id, "session moved before the prompt, skipped");
                continue;
            }
            prompted += 1;
            if let Err(e) = self.dispatcher.dispatch(&record.attempt.id).await {
                warn!(session_id = %session.id, error = %e, "feedback prompt dispatch failed");
            }
        }

        let discard_cutoff = format_ts(now - self.discard_after);
        let discarded = self
            .storage
            .discard_unanswered_feedback(&ts, &discard_cutoff)
            .await?;
        if prompted + discarded > 0 {
            info!(prompted, discarded, "feedback pass complete");
        }
        Ok(prompted + discarded)
    }
}

/// Run `job` every `every` until `cancel` fires. A failed pass is logged and
/// retried on the next tick.
pub fn spawn_job(job: Arc<dyn Job>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(job = job.name(), ?every, "job started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match job.run_once().await {
                        Ok(n) => debug!(job = job.name(), affected = n, "job pass complete"),
                        Err(e) => error!(job = job.name(), error = %e, "job pass failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!(job = job.name(), "job stopped");
                    break;
                }
            }
        }
    })
}

/// Run every job once, in order. Used by the one-shot CLI mode.
pub async fn run_all_once(jobs: &[Arc<dyn Job>]) -> Vec<(&'static str, Result<u64, FlowlineError>)> {
    let mut results = Vec::with_capacity(jobs.len());
    for job in jobs {
        results.push((job.name(), job.run_once().await));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::types::{Campaign, CampaignStatus, SessionStatus};
    use flowline_test_utils::TestHarness;

    const CONTACT: &str = "15550001";

    fn feedback_job(h: &TestHarness) -> FeedbackJob {
        let dispatcher = Arc::new(Dispatcher::new(
            h.storage.clone(),
            h.provider.clone(),
            h.clock.clone(),
            &h.config.delivery,
        ));
        FeedbackJob::new(
            h.storage.clone(),
            dispatcher,
            h.clock.clone(),
            &h.config.engine,
            &h.config.delivery,
        )
    }

    #[tokio::test]
    async fn expiry_job_expires_after_idle_window() {
        let h = TestHarness::builder().build().await.unwrap();
        h.send(CONTACT, "PROMO").await.unwrap();
        let session = h.active_session(CONTACT).await.unwrap();

        let job = SessionExpiryJob::new(SessionLifecycle::new(
            h.storage.clone(),
            h.clock.clone(),
            120,
        ));
        h.clock.advance(Duration::from_secs(90 * 60));
        assert_eq!(job.run_once().await.unwrap(), 0);

        h.clock.advance(Duration::from_secs(60 * 60));
        assert_eq!(job.run_once().await.unwrap(), 1);
        let expired = h.storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(expired.status, SessionStatus::Expired);
        // Idempotent.
        assert_eq!(job.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn feedback_prompts_once_then_discards() {
        let h = TestHarness::builder().build().await.unwrap();
        h.send(CONTACT, "PROMO").await.unwrap();
        let session = h.active_session(CONTACT).await.unwrap();
        let job = feedback_job(&h);

        h.clock.advance(Duration::from_secs(61 * 60));
        assert_eq!(job.run_once().await.unwrap(), 1);
        assert_eq!(h.provider.sent().len(), 2);
        // Already prompted.
        assert_eq!(job.run_once().await.unwrap(), 0);

        h.clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(job.run_once().await.unwrap(), 1);
        let discarded = h.storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(discarded.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn reply_after_prompt_keeps_session_alive() {
        let h = TestHarness::builder().build().await.unwrap();
        h.send(CONTACT, "PROMO").await.unwrap();
        let job = feedback_job(&h);

        h.clock.advance(Duration::from_secs(61 * 60));
        job.run_once().await.unwrap();
        h.send(CONTACT, "maybe").await.unwrap();

        h.clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(job.run_once().await.unwrap(), 0);
        let session = h.active_session(CONTACT).await.unwrap();
        assert!(session.feedback_prompted_at.is_none());
    }

    #[tokio::test]
    async fn campaign_job_opens_and_closes_windows() {
        let h = TestHarness::builder().build().await.unwrap();
        h.storage
            .upsert_campaign(&Campaign {
                id: "spring".into(),
                name: "Spring".into(),
                flow_id: "promo".into(),
                status: CampaignStatus::Scheduled,
                starts_at: Some("2026-03-01T09:00:00.000Z".into()),
                ends_at: Some("2026-03-01T12:00:00.000Z".into()),
                activated_at: None,
            })
            .await
            .unwrap();
        let job = CampaignScheduleJob::new(h.storage.clone(), h.clock.clone());

        assert_eq!(job.run_once().await.unwrap(), 1);
        let spring = h.storage.get_campaign("spring").await.unwrap().unwrap();
        assert_eq!(spring.status, CampaignStatus::Active);

        h.clock.advance(Duration::from_secs(3 * 3600));
        job.run_once().await.unwrap();
        let spring = h.storage.get_campaign("spring").await.unwrap().unwrap();
        assert_eq!(spring.status, CampaignStatus::Ended);
    }

    struct Counting(std::sync::atomic::AtomicU64);

    #[async_trait]
    impl Job for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) -> Result<u64, FlowlineError> {
            Ok(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_job_ticks_until_cancelled() {
        let job = Arc::new(Counting(std::sync::atomic::AtomicU64::new(0)));
        let cancel = CancellationToken::new();
        let handle = spawn_job(job.clone(), Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        cancel.cancel();
        handle.await.unwrap();
        // Immediate first tick, then at 60s and 120s.
        assert_eq!(job.0.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_all_once_reports_each_job() {
        let h = TestHarness::builder().build().await.unwrap();
        let jobs: Vec<Arc<dyn Job>> = vec![
            Arc::new(CampaignScheduleJob::new(h.storage.clone(), h.clock.clone())),
            Arc::new(feedback_job(&h)),
        ];
        let results = run_all_once(&jobs).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "campaign-schedule");
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
