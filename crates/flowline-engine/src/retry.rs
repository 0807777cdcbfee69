// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policy and the retry scan.

use std::sync::Arc;
use std::time::Duration;

use flowline_config::model::DeliveryConfig;
use flowline_core::types::{DeliveryStatus, FailureKind};
use flowline_core::{format_ts, Clock, FlowlineError, StorageAdapter};
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};

/// Exponential backoff with a ceiling on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

/// What a failed attempt turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDecision {
    pub status: DeliveryStatus,
    pub retry_count: u32,
    /// Delay before the next try. `None` once dead.
    pub retry_after: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_secs(config.backoff_base_secs),
            cap: Duration::from_secs(config.backoff_cap_secs),
        }
    }

    /// Delay after the `retry_count`-th failure: `base * 2^(n-1)`, capped.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    /// Outcome of a failed send for an attempt that had `retry_count`
    /// failures before it.
    pub fn on_failure(&self, retry_count: u32, kind: FailureKind) -> FailureDecision {
        let next = retry_count.saturating_add(1).min(self.max_retries);
        if kind == FailureKind::Permanent || next >= self.max_retries {
            return FailureDecision {
                status: DeliveryStatus::Dead,
                retry_count: next.max(retry_count),
                retry_after: None,
            };
        }
        FailureDecision {
            status: DeliveryStatus::Failed,
            retry_count: next,
            retry_after: Some(self.backoff(next)),
        }
    }
}

/// Counters from one retry scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub reclaimed: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead: u64,
    pub skipped: u64,
}

impl RetrySummary {
    pub fn total(&self) -> u64 {
        self.reclaimed + self.sent + self.failed + self.dead + self.skipped
    }

    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent { .. } => self.sent += 1,
            DispatchOutcome::Failed { .. } => self.failed += 1,
            DispatchOutcome::Dead { .. } => self.dead += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Periodic scan of the delivery log.
///
/// Reclaims lapsed leases first so a crashed worker's rows re-enter the
/// normal schedule, then re-dispatches up to `batch_size` due attempts.
pub struct RetryScheduler {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    batch_size: u32,
}

impl RetryScheduler {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            clock,
            max_retries: config.max_retries,
            batch_size: config.batch_size,
        }
    }

    pub async fn run_once(&self) -> Result<RetrySummary, FlowlineError> {
        let mut summary = RetrySummary::default();
        let now = format_ts(self.clock.now());

        for attempt in self.storage.expired_leases(&now).await? {
            match self.dispatcher.reclaim(&attempt).await {
                Ok(true) => summary.reclaimed += 1,
                Ok(false) => debug!(attempt_id = %attempt.id, "lease already settled"),
                Err(e) => warn!(attempt_id = %attempt.id, error = %e, "lease reclaim failed"),
            }
        }

        let due = self
            .storage
            .due_attempts(&now, self.max_retries, self.batch_size)
            .await?;
        for attempt in due {
            match self.dispatcher.dispatch(&attempt.id).await {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    warn!(attempt_id = %attempt.id, error = %e, "retry dispatch failed");
                }
            }
        }

        if summary.total() > 0 {
            info!(
                reclaimed = summary.reclaimed,
                sent = summary.sent,
                failed = summary.failed,
                dead = summary.dead,
                "retry scan complete"
            );
        }
        Ok(summary)
    }
}
