// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delivery dispatcher.
//!
//! Every call leases one attempt (`pending|failed -> retrying`), sends the
//! stored payload exactly as it was queued, and settles the attempt with a
//! single conditional update.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_config::model::DeliveryConfig;
use flowline_core::types::{
    AttemptUpdate, ClaimedAttempt, DeliveryAttempt, DeliveryFailure, DeliveryStatus, FailureKind,
    OutboundPayload,
};
use flowline_core::{format_ts, Clock, FlowlineError, MessagingProvider, StorageAdapter};
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// Result of one dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent {
        provider_message_id: Option<String>,
    },
    /// Transient failure, rescheduled.
    Failed {
        retry_count: u32,
        next_retry_at: String,
    },
    /// Permanent failure, retry ceiling, or unreadable payload.
    Dead { reason: String },
    /// Not claimable: already leased, settled, or not yet due.
    Skipped,
}

pub struct Dispatcher {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    provider: Arc<dyn MessagingProvider + Send + Sync>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    send_timeout: Duration,
    lease: Duration,
}

impl Dispatcher {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        provider: Arc<dyn MessagingProvider + Send + Sync>,
        clock: Arc<dyn Clock>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            storage,
            provider,
            clock,
            policy: RetryPolicy::from_config(config),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
            lease: Duration::from_secs(config.lease_secs),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Lease, send, and settle one attempt.
    pub async fn dispatch(&self, attempt_id: &str) -> Result<DispatchOutcome, FlowlineError> {
        let now = self.clock.now();
        let lease_until = offset_ts(now, self.lease);
        let Some(claimed) = self
            .storage
            .claim_attempt(attempt_id, &format_ts(now), &lease_until)
            .await?
        else {
            debug!(attempt_id, "attempt not claimable, skipping");
            return Ok(DispatchOutcome::Skipped);
        };

        let payload = match serde_json::from_str::<OutboundPayload>(&claimed.message.payload) {
            Ok(p) => p,
            Err(e) => {
                let reason = format!("stored payload cannot be reconstructed: {e}");
                return self
                    .settle_dead(&claimed, claimed.attempt.retry_count, reason)
                    .await;
            }
        };

        let sent = tokio::time::timeout(
            self.send_timeout,
            self.provider.send(&claimed.message.contact_id, &payload),
        )
        .await
        .unwrap_or_else(|_| {
            Err(DeliveryFailure::transient(format!(
                "send timed out after {:?}",
                self.send_timeout
            )))
        });

        match sent {
            Ok(receipt) => {
                let finished = format_ts(self.clock.now());
                let update = AttemptUpdate {
                    attempt_id: claimed.attempt.id.clone(),
                    message_id: claimed.message.id.clone(),
                    from: DeliveryStatus::Retrying,
                    expected_retry_count: claimed.attempt.retry_count,
                    to: DeliveryStatus::Sent,
                    retry_count: claimed.attempt.retry_count,
                    next_retry_at: None,
                    last_attempt_at: Some(finished.clone()),
                    error_message: None,
                    provider_message_id: receipt.provider_message_id.clone(),
                    now: finished,
                };
                if !self.storage.update_attempt(&update).await? {
                    warn!(attempt_id, "lease lost before settling a sent attempt");
                    return Ok(DispatchOutcome::Skipped);
                }
                info!(
                    attempt_id,
                    contact_id = %claimed.message.contact_id,
                    "message delivered"
                );
                Ok(DispatchOutcome::Sent {
                    provider_message_id: receipt.provider_message_id,
                })
            }
            Err(failure) => self.settle_failure(&claimed.attempt, failure).await,
        }
    }

    /// Count a lapsed lease as a failed attempt.
    pub async fn reclaim(&self, attempt: &DeliveryAttempt) -> Result<bool, FlowlineError> {
        let failure = DeliveryFailure::transient("lease expired before the attempt settled");
        let outcome = self.settle_failure(attempt, failure).await?;
        Ok(outcome != DispatchOutcome::Skipped)
    }

    async fn settle_failure(
        &self,
        attempt: &DeliveryAttempt,
        failure: DeliveryFailure,
    ) -> Result<DispatchOutcome, FlowlineError> {
        let decision = self.policy.on_failure(attempt.retry_count, failure.kind);
        let finished = self.clock.now();
        let next_retry_at = decision
            .retry_after
            .map(|delay| offset_ts(finished, delay));

        let update = AttemptUpdate {
            attempt_id: attempt.id.clone(),
            message_id: attempt.message_id.clone(),
            from: DeliveryStatus::Retrying,
            expected_retry_count: attempt.retry_count,
            to: decision.status,
            retry_count: decision.retry_count,
            next_retry_at: next_retry_at.clone(),
            last_attempt_at: Some(format_ts(finished)),
            error_message: Some(failure.to_string()),
            provider_message_id: None,
            now: format_ts(finished),
        };
        if !self.storage.update_attempt(&update).await? {
            warn!(attempt_id = %attempt.id, "lease lost before settling a failed attempt");
            return Ok(DispatchOutcome::Skipped);
        }

        match (decision.status, next_retry_at) {
            (DeliveryStatus::Failed, Some(next_retry_at)) => {
                warn!(
                    attempt_id = %attempt.id,
                    retry_count = decision.retry_count,
                    next_retry_at = %next_retry_at,
                    error = %failure,
                    "delivery failed, retry scheduled"
                );
                Ok(DispatchOutcome::Failed {
                    retry_count: decision.retry_count,
                    next_retry_at,
                })
            }
            _ => {
                let reason = match failure.kind {
                    FailureKind::Permanent => failure.to_string(),
                    FailureKind::Transient => {
                        format!("retry limit {} reached: {failure}", self.policy.max_retries)
                    }
                };
                error!(attempt_id = %attempt.id, reason = %reason, "delivery dead-lettered");
                Ok(DispatchOutcome::Dead { reason })
            }
        }
    }

    async fn settle_dead(
        &self,
        claimed: &ClaimedAttempt,
        retry_count: u32,
        reason: String,
    ) -> Result<DispatchOutcome, FlowlineError> {
        let now = format_ts(self.clock.now());
        let update = AttemptUpdate {
            attempt_id: claimed.attempt.id.clone(),
            message_id: claimed.message.id.clone(),
            from: DeliveryStatus::Retrying,
            expected_retry_count: retry_count,
            to: DeliveryStatus::Dead,
            retry_count,
            next_retry_at: None,
            last_attempt_at: Some(now.clone()),
            error_message: Some(reason.clone()),
            provider_message_id: None,
            now,
        };
        if !self.storage.update_attempt(&update).await? {
            return Ok(DispatchOutcome::Skipped);
        }
        error!(attempt_id = %claimed.attempt.id, reason = %reason, "delivery dead-lettered");
        Ok(DispatchOutcome::Dead { reason })
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// `now + delay` in storage format.
pub fn offset_ts(now: DateTime<Utc>, delay: Duration) -> String {
    format_ts(now + to_chrono(delay))
}
