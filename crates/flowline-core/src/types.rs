// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Flowline engine.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::FlowlineError;

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the type of adapter plugged into the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Storage,
    ApiCaller,
}

// --- Sessions ---

/// Lifecycle state of a conversation session.
///
/// `Active` and `Paused` are the only non-terminal states. Terminal rows are
/// retained for reporting and never leave their state again.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    /// Returns true for states a session can never leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }

    /// Returns true if the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, Paused)
                | (Active, Completed)
                | (Active, Expired)
                | (Active, Cancelled)
                | (Paused, Active)
                | (Paused, Cancelled)
        )
    }
}

/// A contact's position inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub contact_id: String,
    /// `None` for system flows that are not owned by a campaign.
    pub campaign_id: Option<String>,
    pub flow_id: String,
    /// Key of the node the session is parked on.
    pub checkpoint: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub last_active_at: String,
    /// Hard deadline set by a node wait timeout.
    pub expires_at: Option<String>,
    pub feedback_prompted_at: Option<String>,
    pub ended_at: Option<String>,
}

// --- Campaigns and keywords ---

/// Campaign lifecycle as driven by the schedule job and the admin surface.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    Ended,
}

impl CampaignStatus {
    /// Campaigns that still own their keywords.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Ended)
    }
}

/// A marketing campaign bound to one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub flow_id: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub starts_at: Option<String>,
    #[serde(default)]
    pub ends_at: Option<String>,
    #[serde(default)]
    pub activated_at: Option<String>,
}

/// A campaign keyword resolved to the flow entry it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordBinding {
    pub keyword: String,
    pub campaign_id: String,
    pub flow_id: String,
    pub entry_key: String,
    pub activated_at: Option<String>,
}

/// A command keyword that starts a system flow regardless of session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemKeyword {
    pub keyword: String,
    pub flow_id: String,
    pub entry_key: String,
}

// --- Messages and delivery ---

/// Direction of a stored message relative to the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// An inbound message extracted from a provider webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Provider-assigned id, used for redelivery deduplication.
    pub provider_message_id: String,
    pub contact_id: String,
    pub text: String,
    #[serde(default)]
    pub received_at: Option<String>,
}

/// Serialized outbound content. Stored verbatim so retries send exactly
/// what the original turn produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Template {
        name: String,
        language: String,
        #[serde(default)]
        params: Vec<String>,
    },
}

impl OutboundPayload {
    /// Shorthand for a plain text payload.
    pub fn text(body: impl Into<String>) -> Self {
        OutboundPayload::Text { body: body.into() }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutboundPayload::Text { .. } => "text",
            OutboundPayload::Template { .. } => "template",
        }
    }
}

/// A stored message row, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: Option<String>,
    pub direction: Direction,
    pub contact_id: String,
    pub content_type: String,
    /// JSON for outbound payloads, raw text for inbound messages.
    pub payload: String,
    /// Mirror of the latest delivery attempt status for outbound rows.
    pub status: String,
    pub provider_message_id: Option<String>,
    pub created_at: String,
}

/// Delivery attempt state machine.
///
/// `pending -> retrying -> {sent | failed | dead}` and `failed -> retrying`.
/// `pending` and `failed` may also go straight to `dead` when the stored
/// payload cannot be reconstructed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Sent,
    Failed,
    Dead,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }

    /// Returns true if the delivery state machine allows `self -> next`.
    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Retrying)
                | (Failed, Retrying)
                | (Retrying, Sent)
                | (Retrying, Failed)
                | (Retrying, Dead)
                | (Pending, Dead)
                | (Failed, Dead)
        )
    }
}

/// One row of the delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub message_id: String,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<String>,
    pub last_attempt_at: Option<String>,
    /// Set while the row is `retrying`; a lapsed lease marks a crashed worker.
    pub lease_until: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A claimed attempt together with the message it delivers.
#[derive(Debug, Clone)]
pub struct ClaimedAttempt {
    pub attempt: DeliveryAttempt,
    pub message: Message,
}

/// Provider acknowledgement of a successful send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReceipt {
    pub provider_message_id: Option<String>,
}

/// Whether a failed send may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum FailureKind {
    /// Timeouts, 5xx, rate limiting.
    Transient,
    /// Bad recipient, policy violation, malformed payload.
    Permanent,
}

/// A classified send failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind} delivery failure: {message}")]
pub struct DeliveryFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DeliveryFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }
}

// --- Turn persistence ---

/// A freshly queued outbound message and its first delivery attempt.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub message: Message,
    pub attempt: DeliveryAttempt,
}

impl OutboundRecord {
    /// Build a pending record that is immediately due for delivery.
    pub fn pending(
        session_id: Option<&str>,
        contact_id: &str,
        payload: &OutboundPayload,
        now: &str,
    ) -> Result<Self, FlowlineError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let message = Message {
            id: message_id.clone(),
            session_id: session_id.map(str::to_string),
            direction: Direction::Outbound,
            contact_id: contact_id.to_string(),
            content_type: payload.content_type().to_string(),
            payload: serde_json::to_string(payload)?,
            status: DeliveryStatus::Pending.to_string(),
            provider_message_id: None,
            created_at: now.to_string(),
        };
        let attempt = DeliveryAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            message_id,
            status: DeliveryStatus::Pending,
            retry_count: 0,
            next_retry_at: Some(now.to_string()),
            last_attempt_at: None,
            lease_until: None,
            error_message: None,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        };
        Ok(Self { message, attempt })
    }
}

/// The inbound half of a turn: dedupe key plus the stored message row.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub provider_message_id: String,
    pub message: Message,
}

/// Conditional checkpoint move for an existing session.
///
/// Applied only while the row is still `ACTIVE` and parked on
/// `expected_checkpoint`.
#[derive(Debug, Clone)]
pub struct CheckpointUpdate {
    pub session_id: String,
    pub expected_checkpoint: String,
    pub checkpoint: String,
    /// `Active` or `Completed`.
    pub status: SessionStatus,
    pub last_active_at: String,
    pub expires_at: Option<String>,
    /// Clears `feedback_prompted_at` when the contact has replied.
    pub clear_feedback: bool,
}

/// Session side of a turn.
#[derive(Debug, Clone)]
pub enum SessionWrite {
    /// Insert a new ACTIVE session.
    Create(Session),
    /// Move an existing session.
    Advance(CheckpointUpdate),
    /// Reply without touching any session (no keyword matched).
    Untouched,
}

/// Everything one turn writes, committed in a single transaction.
#[derive(Debug, Clone)]
pub struct TurnCommit {
    pub inbound: Option<InboundRecord>,
    /// ACTIVE session to cancel first (system keyword restarts).
    pub cancel_session: Option<String>,
    pub session: SessionWrite,
    pub outbound: Vec<OutboundRecord>,
    pub now: String,
}

/// Result of committing a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The provider message id was already processed.
    Duplicate,
    /// A guard failed: the session moved, ended, or another ACTIVE session exists.
    Conflict,
}

/// Conditional delivery attempt transition.
///
/// Applied only while the row is in `from` with `expected_retry_count`.
#[derive(Debug, Clone)]
pub struct AttemptUpdate {
    pub attempt_id: String,
    pub message_id: String,
    pub from: DeliveryStatus,
    pub expected_retry_count: u32,
    pub to: DeliveryStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<String>,
    pub last_attempt_at: Option<String>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub now: String,
}

impl AttemptUpdate {
    /// Rejects transitions the delivery state machine does not allow and
    /// retry counts that would move backwards.
    pub fn validate(&self) -> Result<(), FlowlineError> {
        if !self.from.can_transition_to(self.to) {
            return Err(FlowlineError::InvalidTransition {
                entity: "delivery attempt",
                from: self.from.to_string(),
                to: self.to.to_string(),
            });
        }
        if self.retry_count < self.expected_retry_count {
            return Err(FlowlineError::Internal(format!(
                "retry count for attempt {} would decrease from {} to {}",
                self.attempt_id, self.expected_retry_count, self.retry_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn session_status_uses_uppercase_names() {
        assert_eq!(SessionStatus::Active.to_string(), "ACTIVE");
        assert_eq!(
            SessionStatus::from_str("CANCELLED").unwrap(),
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn paused_is_the_only_reversible_state() {
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Expired.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Cancelled.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Paused.can_transition_to(SessionStatus::Expired));
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Cancelled));
    }

    #[test]
    fn terminal_delivery_states_have_no_exits() {
        for next in [
            DeliveryStatus::Pending,
            DeliveryStatus::Retrying,
            DeliveryStatus::Failed,
            DeliveryStatus::Sent,
            DeliveryStatus::Dead,
        ] {
            assert!(!DeliveryStatus::Sent.can_transition_to(next));
            assert!(!DeliveryStatus::Dead.can_transition_to(next));
        }
    }

    #[test]
    fn failed_must_pass_through_retrying_before_sent() {
        assert!(!DeliveryStatus::Failed.can_transition_to(DeliveryStatus::Sent));
        assert!(DeliveryStatus::Failed.can_transition_to(DeliveryStatus::Retrying));
    }

    #[test]
    fn outbound_payload_is_tagged_by_type() {
        let json = serde_json::to_value(OutboundPayload::text("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "body": "hi"}));

        let parsed: OutboundPayload = serde_json::from_str(
            r#"{"type":"template","name":"promo_v2","language":"en_US"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            OutboundPayload::Template {
                name: "promo_v2".into(),
                language: "en_US".into(),
                params: vec![],
            }
        );
    }

    #[test]
    fn pending_record_is_due_immediately() {
        let now = "2026-03-01T10:00:00.000Z";
        let record =
            OutboundRecord::pending(Some("s1"), "15550001", &OutboundPayload::text("hi"), now)
                .unwrap();
        assert_eq!(record.attempt.status, DeliveryStatus::Pending);
        assert_eq!(record.attempt.retry_count, 0);
        assert_eq!(record.attempt.next_retry_at.as_deref(), Some(now));
        assert_eq!(record.attempt.message_id, record.message.id);
        assert_eq!(record.message.status, "pending");
    }

    #[test]
    fn attempt_update_rejects_skipping_the_lease() {
        let update = AttemptUpdate {
            attempt_id: "a".into(),
            message_id: "m".into(),
            from: DeliveryStatus::Pending,
            expected_retry_count: 0,
            to: DeliveryStatus::Sent,
            retry_count: 0,
            next_retry_at: None,
            last_attempt_at: None,
            error_message: None,
            provider_message_id: None,
            now: "2026-03-01T10:00:00.000Z".into(),
        };
        assert!(matches!(
            update.validate(),
            Err(FlowlineError::InvalidTransition { .. })
        ));
    }
}
