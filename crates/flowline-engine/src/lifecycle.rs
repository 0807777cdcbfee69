// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle operations outside the turn path.

use std::sync::Arc;

use chrono::Duration;
use flowline_core::types::{Session, SessionStatus};
use flowline_core::{format_ts, Clock, FlowlineError, StorageAdapter};
use tracing::info;

/// Operator transitions and the idle expiry sweep.
pub struct SessionLifecycle {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    clock: Arc<dyn Clock>,
    idle_window: Duration,
}

impl SessionLifecycle {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        clock: Arc<dyn Clock>,
        idle_window_mins: u64,
    ) -> Self {
        Self {
            storage,
            clock,
            idle_window: Duration::minutes(idle_window_mins as i64),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Session, FlowlineError> {
        self.storage
            .get_session(id)
            .await?
            .ok_or_else(|| FlowlineError::NotFound {
                entity: "session",
                id: id.to_string(),
            })
    }

    pub async fn pause(&self, id: &str) -> Result<Session, FlowlineError> {
        self.move_to(id, SessionStatus::Paused).await
    }

    pub async fn resume(&self, id: &str) -> Result<Session, FlowlineError> {
        self.move_to(id, SessionStatus::Active).await
    }

    /// Irreversible. Work already in flight for the session finishes and
    /// then finds it terminal.
    pub async fn cancel(&self, id: &str) -> Result<Session, FlowlineError> {
        self.move_to(id, SessionStatus::Cancelled).await
    }

    async fn move_to(&self, id: &str, to: SessionStatus) -> Result<Session, FlowlineError> {
        let current = self.get(id).await?;
        if !current.status.can_transition_to(to) {
            return Err(FlowlineError::InvalidTransition {
                entity: "session",
                from: current.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = format_ts(self.clock.now());
        let moved = self
            .storage
            .transition_session(id, current.status, to, &now)
            .await?;
        if !moved {
            let latest = self.get(id).await?;
            return Err(FlowlineError::Conflict(format!(
                "session {id} changed to {} before it could move to {to}",
                latest.status
            )));
        }
        info!(session_id = id, from = %current.status, to = %to, "session transitioned");
        self.get(id).await
    }

    /// ACTIVE sessions idle longer than the window, or past their node wait
    /// deadline, become EXPIRED. PAUSED sessions are never touched.
    pub async fn expire_idle(&self) -> Result<u64, FlowlineError> {
        let now = self.clock.now();
        let cutoff = format_ts(now - self.idle_window);
        let expired = self
            .storage
            .expire_idle_sessions(&format_ts(now), &cutoff)
            .await?;
        if expired > 0 {
            info!(expired, cutoff = %cutoff, "expired idle sessions");
        }
        Ok(expired)
    }
}
