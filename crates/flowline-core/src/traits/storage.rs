// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage adapter trait for the flow, session, and delivery stores.

use async_trait::async_trait;

use crate::error::FlowlineError;
use crate::flow::FlowDefinition;
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    AttemptUpdate, Campaign, ClaimedAttempt, CommitOutcome, DeliveryAttempt, KeywordBinding,
    Message, OutboundRecord, Session, SessionStatus, SystemKeyword, TurnCommit,
};

/// Adapter for persistence backends.
///
/// Every mutation of sessions and delivery attempts is conditional on the
/// row's current state; a `false` or [`CommitOutcome::Conflict`] result means
/// another writer got there first and the caller should treat it as a no-op.
#[async_trait]
pub trait StorageAdapter: PluginAdapter {
    /// Initializes the storage backend (migrations, connection, etc.).
    async fn initialize(&self) -> Result<(), FlowlineError>;

    /// Closes the storage backend, flushing pending writes.
    async fn close(&self) -> Result<(), FlowlineError>;

    // --- Flow store ---

    async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowDefinition>, FlowlineError>;

    /// Insert or replace a validated flow.
    async fn upsert_flow(&self, flow: &FlowDefinition) -> Result<(), FlowlineError>;

    // --- Campaigns and keywords ---

    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<(), FlowlineError>;

    async fn get_campaign(&self, id: &str) -> Result<Option<Campaign>, FlowlineError>;

    /// Bind a keyword to a campaign. Fails with `Conflict` if another open
    /// campaign already owns it.
    async fn bind_keyword(&self, keyword: &str, campaign_id: &str) -> Result<(), FlowlineError>;

    async fn bind_system_keyword(
        &self,
        keyword: &str,
        flow_id: &str,
    ) -> Result<(), FlowlineError>;

    async fn find_system_keyword(
        &self,
        normalized: &str,
    ) -> Result<Option<SystemKeyword>, FlowlineError>;

    /// Keyword bindings of active campaigns, most recently activated first.
    async fn find_campaign_keywords(
        &self,
        normalized: &str,
    ) -> Result<Vec<KeywordBinding>, FlowlineError>;

    /// `scheduled -> active` for campaigns whose window has opened.
    async fn activate_due_campaigns(&self, now: &str) -> Result<u64, FlowlineError>;

    /// `active|paused -> ended` for campaigns whose window has closed.
    async fn end_due_campaigns(&self, now: &str) -> Result<u64, FlowlineError>;

    // --- Session store ---

    async fn get_session(&self, id: &str) -> Result<Option<Session>, FlowlineError>;

    async fn active_session_for_contact(
        &self,
        contact_id: &str,
    ) -> Result<Option<Session>, FlowlineError>;

    async fn is_processed(&self, provider_message_id: &str) -> Result<bool, FlowlineError>;

    /// Persist a whole turn atomically: dedupe marker, session write, and
    /// outbound messages with their pending attempts.
    async fn commit_turn(&self, commit: &TurnCommit) -> Result<CommitOutcome, FlowlineError>;

    /// Move a session from `from` to `to` if it is still in `from`.
    async fn transition_session(
        &self,
        id: &str,
        from: SessionStatus,
        to: SessionStatus,
        now: &str,
    ) -> Result<bool, FlowlineError>;

    /// Expire ACTIVE sessions idle since before `idle_cutoff` or past their
    /// own `expires_at`.
    async fn expire_idle_sessions(
        &self,
        now: &str,
        idle_cutoff: &str,
    ) -> Result<u64, FlowlineError>;

    /// ACTIVE, unprompted sessions idle between the two cutoffs.
    async fn sessions_due_feedback(
        &self,
        prompt_cutoff: &str,
        idle_cutoff: &str,
        limit: u32,
    ) -> Result<Vec<Session>, FlowlineError>;

    /// Stamp the prompt and queue its message if the session has not moved.
    async fn record_feedback_prompt(
        &self,
        session: &Session,
        outbound: &OutboundRecord,
        now: &str,
    ) -> Result<bool, FlowlineError>;

    /// Expire ACTIVE sessions prompted before `discard_cutoff` that never replied.
    async fn discard_unanswered_feedback(
        &self,
        now: &str,
        discard_cutoff: &str,
    ) -> Result<u64, FlowlineError>;

    async fn messages_for_session(&self, session_id: &str) -> Result<Vec<Message>, FlowlineError>;

    // --- Delivery log ---

    async fn get_attempt(&self, id: &str) -> Result<Option<DeliveryAttempt>, FlowlineError>;

    /// Take the lease on a `pending` or `failed` attempt by moving it to
    /// `retrying`. Returns `None` if the row is not claimable.
    async fn claim_attempt(
        &self,
        id: &str,
        now: &str,
        lease_until: &str,
    ) -> Result<Option<ClaimedAttempt>, FlowlineError>;

    /// Apply a validated, conditional attempt transition and mirror the new
    /// status onto the message row.
    async fn update_attempt(&self, update: &AttemptUpdate) -> Result<bool, FlowlineError>;

    /// Attempts due for another try, oldest due first.
    async fn due_attempts(
        &self,
        now: &str,
        max_retries: u32,
        limit: u32,
    ) -> Result<Vec<DeliveryAttempt>, FlowlineError>;

    /// `retrying` attempts whose lease lapsed before `now`.
    async fn expired_leases(&self, now: &str) -> Result<Vec<DeliveryAttempt>, FlowlineError>;
}
