// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn processing.
//!
//! One inbound message is one turn: dedupe, route, execute, persist the whole
//! turn atomically, then dispatch what it queued. Turns for one contact are
//! serialized by [`ContactLocks`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowline_config::model::EngineConfig;
use flowline_core::flow::{ApiCall, FlowDefinition};
use flowline_core::traits::ApiRequest;
use flowline_core::types::{
    CheckpointUpdate, CommitOutcome, Direction, InboundMessage, InboundRecord, Message,
    OutboundPayload, OutboundRecord, Session, SessionStatus, SessionWrite, TurnCommit,
};
use flowline_core::{format_ts, normalize_input, ApiCaller, Clock, FlowlineError, StorageAdapter};
use tracing::{debug, error, info, warn};

use crate::dispatcher::{offset_ts, Dispatcher};
use crate::executor::{ExecutionResult, FlowExecutor, StepOutcome};
use crate::locks::ContactLocks;
use crate::router::{EntryRouter, Route};

/// Idle lock entries are pruned once the table grows past this.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// What a turn did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// Provider redelivery of an already processed message.
    Duplicate,
    /// A campaign or system keyword opened a new session.
    Started,
    /// A system keyword cancelled the active session and opened a new one.
    Restarted,
    Advanced,
    /// The session reached a node with no outgoing transition.
    Completed,
    /// Input failed the node's allowed-input gate.
    Rejected,
    /// Broken flow data; fallback sent, session untouched.
    FlowError,
    /// No keyword and no active session; fallback sent.
    NoMatch,
    /// A concurrent writer won; nothing was applied.
    Conflict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub kind: TurnKind,
    pub session_id: Option<String>,
    /// Checkpoint after the turn and any API continuation.
    pub checkpoint: Option<String>,
    /// Delivery attempts queued by the turn.
    pub attempts: Vec<String>,
}

impl TurnReport {
    fn bare(kind: TurnKind) -> Self {
        Self {
            kind,
            session_id: None,
            checkpoint: None,
            attempts: Vec::new(),
        }
    }
}

/// A turn ready to commit.
struct TurnPlan {
    kind: TurnKind,
    session_id: Option<String>,
    checkpoint: Option<String>,
    flow: Option<FlowDefinition>,
    api: Option<(ApiCall, String, String)>,
    commit: TurnCommit,
}

pub struct FlowEngine {
    storage: Arc<dyn StorageAdapter + Send + Sync>,
    dispatcher: Arc<Dispatcher>,
    api: Arc<dyn ApiCaller + Send + Sync>,
    router: EntryRouter,
    executor: FlowExecutor,
    locks: ContactLocks,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl FlowEngine {
    pub fn new(
        storage: Arc<dyn StorageAdapter + Send + Sync>,
        dispatcher: Arc<Dispatcher>,
        api: Arc<dyn ApiCaller + Send + Sync>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            router: EntryRouter::new(storage.clone()),
            executor: FlowExecutor::new(config.hop_limit, config.fallback_text.clone()),
            locks: ContactLocks::new(),
            storage,
            dispatcher,
            api,
            clock,
            config,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Process one inbound message end to end.
    pub async fn handle_inbound(&self, msg: &InboundMessage) -> Result<TurnReport, FlowlineError> {
        let guard = self.locks.lock(&msg.contact_id).await;
        let report = self.turn(msg).await;
        drop(guard);
        if self.locks.len() > LOCK_PRUNE_THRESHOLD {
            self.locks.prune();
        }
        report
    }

    async fn turn(&self, msg: &InboundMessage) -> Result<TurnReport, FlowlineError> {
        if self.storage.is_processed(&msg.provider_message_id).await? {
            debug!(
                provider_message_id = %msg.provider_message_id,
                "duplicate inbound message ignored"
            );
            return Ok(TurnReport::bare(TurnKind::Duplicate));
        }

        let now = self.clock.now();
        let input = normalize_input(&msg.text);
        let active = self
            .storage
            .active_session_for_contact(&msg.contact_id)
            .await?;
        let route = self.router.resolve(&input, active.is_some()).await?;

        let plan = match (route, active) {
            (Route::System(kw), active) => {
                self.plan_start(msg, &kw.flow_id, None, active.map(|s| s.id), now)
                    .await?
            }
            (Route::Campaign(binding), _) => {
                self.plan_start(msg, &binding.flow_id, Some(binding.campaign_id), None, now)
                    .await?
            }
            (Route::NoMatch, Some(session)) => self.plan_advance(msg, session, &input, now).await?,
            (Route::NoMatch, None) => {
                debug!(contact_id = %msg.contact_id, "no keyword match and no active session");
                let payload = OutboundPayload::text(self.config.fallback_text.clone());
                self.untouched_plan(msg, None, TurnKind::NoMatch, [&payload], now)?
            }
        };

        self.commit_and_dispatch(msg, &input, plan).await
    }

    async fn plan_start(
        &self,
        msg: &InboundMessage,
        flow_id: &str,
        campaign_id: Option<String>,
        cancel_session: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TurnPlan, FlowlineError> {
        let Some(flow) = self.storage.get_flow(flow_id).await? else {
            error!(flow_id, contact_id = %msg.contact_id, "keyword points at a missing flow");
            let payload = OutboundPayload::text(self.config.fallback_text.clone());
            return self.untouched_plan(msg, None, TurnKind::FlowError, [&payload], now);
        };

        let result = self.executor.start(&flow);
        if result.is_flow_error() {
            return self.untouched_plan(msg, None, TurnKind::FlowError, result.sends(), now);
        }

        let ts = format_ts(now);
        let completed = result.status == SessionStatus::Completed;
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            contact_id: msg.contact_id.clone(),
            campaign_id,
            flow_id: flow.id.clone(),
            checkpoint: result.checkpoint.clone(),
            status: result.status,
            created_at: ts.clone(),
            last_active_at: ts.clone(),
            expires_at: wait_deadline(&result, now),
            feedback_prompted_at: None,
            ended_at: completed.then(|| ts.clone()),
        };
        let kind = match (completed, cancel_session.is_some()) {
            (true, _) => TurnKind::Completed,
            (false, true) => TurnKind::Restarted,
            (false, false) => TurnKind::Started,
        };
        info!(
            session_id = %session.id,
            contact_id = %msg.contact_id,
            flow_id = %flow.id,
            campaign_id = ?session.campaign_id,
            "starting session"
        );

        let session_id = session.id.clone();
        let outbound = self.records(Some(&session_id), &msg.contact_id, result.sends(), &ts)?;
        Ok(TurnPlan {
            kind,
            session_id: Some(session_id.clone()),
            checkpoint: Some(result.checkpoint.clone()),
            api: pending_api(&result),
            flow: Some(flow),
            commit: TurnCommit {
                inbound: Some(inbound_record(msg, Some(&session_id), &ts)),
                cancel_session,
                session: SessionWrite::Create(session),
                outbound,
                now: ts,
            },
        })
    }

    async fn plan_advance(
        &self,
        msg: &InboundMessage,
        session: Session,
        input: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnPlan, FlowlineError> {
        let Some(flow) = self.storage.get_flow(&session.flow_id).await? else {
            error!(
                flow_id = %session.flow_id,
                session_id = %session.id,
                "active session points at a missing flow"
            );
            let payload = OutboundPayload::text(self.config.fallback_text.clone());
            return self.untouched_plan(msg, Some(&session.id), TurnKind::FlowError, [&payload], now);
        };

        let result = self.executor.advance(&flow, &session.checkpoint, input);
        let kind = match (&result.outcome, result.status) {
            (StepOutcome::FlowError(_), _) => {
                return self.untouched_plan(
                    msg,
                    Some(&session.id),
                    TurnKind::FlowError,
                    result.sends(),
                    now,
                );
            }
            (StepOutcome::InputRejected, _) => TurnKind::Rejected,
            (StepOutcome::Advanced, SessionStatus::Completed) => TurnKind::Completed,
            (StepOutcome::Advanced, _) => TurnKind::Advanced,
        };
        debug!(
            session_id = %session.id,
            from = %session.checkpoint,
            to = %result.checkpoint,
            ?kind,
            "advancing session"
        );

        let ts = format_ts(now);
        let outbound = self.records(Some(&session.id), &msg.contact_id, result.sends(), &ts)?;
        Ok(TurnPlan {
            kind,
            session_id: Some(session.id.clone()),
            checkpoint: Some(result.checkpoint.clone()),
            api: pending_api(&result),
            commit: TurnCommit {
                inbound: Some(inbound_record(msg, Some(&session.id), &ts)),
                cancel_session: None,
                session: SessionWrite::Advance(CheckpointUpdate {
                    session_id: session.id.clone(),
                    expected_checkpoint: session.checkpoint.clone(),
                    checkpoint: result.checkpoint.clone(),
                    status: result.status,
                    last_active_at: ts.clone(),
                    expires_at: wait_deadline(&result, now),
                    clear_feedback: true,
                }),
                outbound,
                now: ts,
            },
            flow: Some(flow),
        })
    }

    /// A turn that only records the inbound message and replies.
    fn untouched_plan<'a>(
        &self,
        msg: &InboundMessage,
        session_id: Option<&str>,
        kind: TurnKind,
        sends: impl IntoIterator<Item = &'a OutboundPayload>,
        now: DateTime<Utc>,
    ) -> Result<TurnPlan, FlowlineError> {
        let ts = format_ts(now);
        let outbound = self.records(session_id, &msg.contact_id, sends, &ts)?;
        Ok(TurnPlan {
            kind,
            session_id: session_id.map(str::to_string),
            checkpoint: None,
            flow: None,
            api: None,
            commit: TurnCommit {
                inbound: Some(inbound_record(msg, session_id, &ts)),
                cancel_session: None,
                session: SessionWrite::Untouched,
                outbound,
                now: ts,
            },
        })
    }

    fn records<'a>(
        &self,
        session_id: Option<&str>,
        contact_id: &str,
        sends: impl IntoIterator<Item = &'a OutboundPayload>,
        now: &str,
    ) -> Result<Vec<OutboundRecord>, FlowlineError> {
        sends
            .into_iter()
            .map(|payload| OutboundRecord::pending(session_id, contact_id, payload, now))
            .collect()
    }

    async fn commit_and_dispatch(
        &self,
        msg: &InboundMessage,
        input: &str,
        plan: TurnPlan,
    ) -> Result<TurnReport, FlowlineError> {
        match self.storage.commit_turn(&plan.commit).await? {
            CommitOutcome::Duplicate => return Ok(TurnReport::bare(TurnKind::Duplicate)),
            CommitOutcome::Conflict => {
                warn!(
                    contact_id = %msg.contact_id,
                    session_id = ?plan.session_id,
                    "turn lost a concurrent update, nothing applied"
                );
                return Ok(TurnReport {
                    session_id: plan.session_id,
                    ..TurnReport::bare(TurnKind::Conflict)
                });
            }
            CommitOutcome::Committed => {}
        }

        let mut attempts: Vec<String> = plan
            .commit
            .outbound
            .iter()
            .map(|r| r.attempt.id.clone())
            .collect();
        self.dispatch_all(&attempts).await;

        let mut checkpoint = plan.checkpoint;
        if let (Some((call, on_success, on_error)), Some(flow), Some(session_id)) =
            (plan.api, plan.flow.as_ref(), plan.session_id.as_deref())
        {
            let (more, last) = self
                .run_api_steps(flow, session_id, &msg.contact_id, input, call, on_success, on_error)
                .await?;
            attempts.extend(more);
            if last.is_some() {
                checkpoint = last;
            }
        }

        Ok(TurnReport {
            kind: plan.kind,
            session_id: plan.session_id,
            checkpoint,
            attempts,
        })
    }

    /// Execute API steps after their turn committed, then commit each
    /// continuation as a compensating checkpoint write guarded on the success
    /// target. Returns queued attempts and the final checkpoint.
    #[allow(clippy::too_many_arguments)]
    async fn run_api_steps(
        &self,
        flow: &FlowDefinition,
        session_id: &str,
        contact_id: &str,
        input: &str,
        call: ApiCall,
        on_success: String,
        on_error: String,
    ) -> Result<(Vec<String>, Option<String>), FlowlineError> {
        let timeout = Duration::from_secs(self.config.api_timeout_secs);
        let mut attempts = Vec::new();
        let mut checkpoint = None;
        let mut pending = Some((call, on_success, on_error));
        let mut rounds = 0u32;

        while let Some((call, on_success, on_error)) = pending.take() {
            rounds += 1;
            if rounds > self.config.hop_limit {
                error!(session_id, flow_id = %flow.id, "api step chain exceeded the hop limit");
                break;
            }

            let request = ApiRequest {
                method: call.method.clone(),
                url: call.url.clone(),
                params: call.render_params(input, contact_id),
                timeout,
            };
            let succeeded = match tokio::time::timeout(timeout, self.api.call(&request)).await {
                Ok(Ok(resp)) if resp.is_success() => true,
                Ok(Ok(resp)) => {
                    warn!(session_id, url = %call.url, status = resp.status, "api step returned an error status");
                    false
                }
                Ok(Err(e)) => {
                    warn!(session_id, url = %call.url, error = %e, "api step failed");
                    false
                }
                Err(_) => {
                    warn!(session_id, url = %call.url, ?timeout, "api step timed out");
                    false
                }
            };

            let from = if succeeded { &on_success } else { &on_error };
            let result = self.executor.resume(flow, from);
            let now = self.clock.now();
            let ts = format_ts(now);
            let outbound = self.records(Some(session_id), contact_id, result.sends(), &ts)?;
            let session = if result.is_flow_error() {
                SessionWrite::Untouched
            } else {
                SessionWrite::Advance(CheckpointUpdate {
                    session_id: session_id.to_string(),
                    expected_checkpoint: on_success.clone(),
                    checkpoint: result.checkpoint.clone(),
                    status: result.status,
                    last_active_at: ts.clone(),
                    expires_at: wait_deadline(&result, now),
                    clear_feedback: false,
                })
            };
            let commit = TurnCommit {
                inbound: None,
                cancel_session: None,
                session,
                outbound,
                now: ts,
            };

            match self.storage.commit_turn(&commit).await? {
                CommitOutcome::Committed => {
                    let ids: Vec<String> =
                        commit.outbound.iter().map(|r| r.attempt.id.clone()).collect();
                    self.dispatch_all(&ids).await;
                    attempts.extend(ids);
                    if !result.is_flow_error() {
                        checkpoint = Some(result.checkpoint.clone());
                        pending = pending_api(&result);
                    }
                }
                CommitOutcome::Conflict | CommitOutcome::Duplicate => {
                    info!(
                        session_id,
                        "session moved or ended during the api step, continuation dropped"
                    );
                }
            }
        }

        Ok((attempts, checkpoint))
    }

    /// First send of each queued attempt. Failures stay in the delivery log
    /// for the retry job.
    async fn dispatch_all(&self, attempt_ids: &[String]) {
        for id in attempt_ids {
            if let Err(e) = self.dispatcher.dispatch(id).await {
                error!(attempt_id = %id, error = %e, "dispatch failed, left for the retry job");
            }
        }
    }
}

fn pending_api(result: &ExecutionResult) -> Option<(ApiCall, String, String)> {
    result
        .api_call()
        .map(|(call, ok, err)| (call.clone(), ok.to_string(), err.to_string()))
}

fn wait_deadline(result: &ExecutionResult, now: DateTime<Utc>) -> Option<String> {
    match (result.status, result.wait_timeout_secs) {
        (SessionStatus::Active, Some(secs)) => Some(offset_ts(now, Duration::from_secs(secs))),
        _ => None,
    }
}

fn inbound_record(msg: &InboundMessage, session_id: Option<&str>, now: &str) -> InboundRecord {
    InboundRecord {
        provider_message_id: msg.provider_message_id.clone(),
        message: Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.map(str::to_string),
            direction: Direction::Inbound,
            contact_id: msg.contact_id.clone(),
            content_type: "text".to_string(),
            payload: msg.text.clone(),
            status: "received".to_string(),
            provider_message_id: Some(msg.provider_message_id.clone()),
            created_at: msg.received_at.clone().unwrap_or_else(|| now.to_string()),
        },
    }
}
