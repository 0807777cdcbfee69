// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn-level behavior of the engine over a real SQLite database.

use std::time::Duration;

use flowline_core::flow::{BranchRule, FlowDefinition, FlowNode, NodeKind, Predicate};
use flowline_core::types::{Campaign, CampaignStatus, DeliveryFailure, SessionStatus};
use flowline_core::{DeliveryStatus, FlowlineError};
use flowline_engine::TurnKind;
use flowline_test_utils::TestHarness;

const CONTACT: &str = "15550001";

fn node(key: &str, kind: NodeKind) -> FlowNode {
    FlowNode {
        key: key.into(),
        kind,
        allowed_inputs: vec![],
        wait_timeout_secs: None,
    }
}

fn text(body: &str, next: Option<&str>) -> NodeKind {
    NodeKind::Message {
        body: body.into(),
        next: next.map(str::to_string),
        rules: vec![],
        fallback: None,
    }
}

/// Register `flow` under an active campaign of the same id owning `keyword`.
async fn add_campaign_flow(h: &TestHarness, flow: FlowDefinition, keyword: &str) {
    let id = flow.id.clone();
    h.storage.upsert_flow(&flow).await.unwrap();
    h.storage
        .upsert_campaign(&Campaign {
            id: id.clone(),
            name: id.clone(),
            flow_id: id.clone(),
            status: CampaignStatus::Active,
            starts_at: None,
            ends_at: None,
            activated_at: Some("2026-03-01T09:30:00.000Z".into()),
        })
        .await
        .unwrap();
    h.storage.bind_keyword(keyword, &id).await.unwrap();
}

/// Messages `line 0` .. `line {len-1}` linked by `next`; the last one waits
/// for any reply.
fn line_chain(id: &str, len: usize) -> FlowDefinition {
    let mut nodes: Vec<FlowNode> = (0..len - 1)
        .map(|i| {
            let next = format!("L{}", i + 1);
            node(&format!("L{i}"), text(&format!("line {i}"), Some(&next)))
        })
        .collect();
    nodes.push(node(
        &format!("L{}", len - 1),
        NodeKind::Message {
            body: format!("line {}", len - 1),
            next: None,
            rules: vec![BranchRule {
                when: Predicate::Any,
                target: "HELP".into(),
            }],
            fallback: None,
        },
    ));
    nodes.push(node(
        "HELP",
        NodeKind::Fallback {
            body: "Reply with anything.".into(),
            next: None,
        },
    ));
    FlowDefinition {
        id: id.into(),
        name: id.into(),
        entry_key: "L0".into(),
        fallback_key: "HELP".into(),
        nodes,
    }
}

#[tokio::test]
async fn keyword_starts_and_reply_completes() {
    let h = TestHarness::builder().build().await.unwrap();

    let started = h.send(CONTACT, "  Promo ").await.unwrap();
    assert_eq!(started.kind, TurnKind::Started);
    assert_eq!(started.checkpoint.as_deref(), Some("START"));
    let session_id = started.session_id.unwrap();

    let done = h.send(CONTACT, "YES").await.unwrap();
    assert_eq!(done.kind, TurnKind::Completed);
    assert_eq!(done.session_id.as_deref(), Some(session_id.as_str()));

    let session = h.storage.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.campaign_id.as_deref(), Some("42"));
    assert!(session.ended_at.is_some());
    assert!(h.active_session(CONTACT).await.is_none());
    assert_eq!(
        h.provider.texts_to(CONTACT).last().map(String::as_str),
        Some("Your coupon code is SPRING20.")
    );
}

#[tokio::test]
async fn redelivered_webhook_is_a_no_op() {
    let h = TestHarness::builder().build().await.unwrap();

    let first = h.send_with_id(CONTACT, "PROMO", "wamid.dup").await.unwrap();
    assert_eq!(first.kind, TurnKind::Started);
    let again = h.send_with_id(CONTACT, "PROMO", "wamid.dup").await.unwrap();
    assert_eq!(again.kind, TurnKind::Duplicate);

    assert_eq!(h.provider.sent().len(), 1);
    let session = h.active_session(CONTACT).await.unwrap();
    let messages = h.storage.messages_for_session(&session.id).await.unwrap();
    // One inbound, one outbound.
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn unmatched_reply_gets_node_fallback_and_stays() {
    let h = TestHarness::builder().build().await.unwrap();
    h.send(CONTACT, "PROMO").await.unwrap();

    let report = h.send(CONTACT, "maybe").await.unwrap();
    assert_eq!(report.kind, TurnKind::Advanced);
    assert_eq!(report.checkpoint.as_deref(), Some("START"));
    assert_eq!(
        h.provider.texts_to(CONTACT).last().map(String::as_str),
        Some("Please reply YES or INFO.")
    );
    assert_eq!(h.active_session(CONTACT).await.unwrap().checkpoint, "START");
}

#[tokio::test]
async fn unknown_text_without_session_gets_global_fallback() {
    let h = TestHarness::builder().build().await.unwrap();

    let report = h.send(CONTACT, "hello?").await.unwrap();
    assert_eq!(report.kind, TurnKind::NoMatch);
    assert!(report.session_id.is_none());
    assert_eq!(
        h.provider.texts_to(CONTACT),
        vec![h.config.engine.fallback_text.clone()]
    );
    assert!(h.active_session(CONTACT).await.is_none());
}

#[tokio::test]
async fn campaign_keyword_inside_a_session_is_plain_input() {
    let h = TestHarness::builder().build().await.unwrap();
    let first = h.send(CONTACT, "PROMO").await.unwrap();

    let second = h.send(CONTACT, "PROMO").await.unwrap();
    assert_eq!(second.kind, TurnKind::Advanced);
    assert_eq!(second.session_id, first.session_id);
}

#[tokio::test]
async fn system_keyword_cancels_and_restarts() {
    let h = TestHarness::builder().build().await.unwrap();
    let first = h.send(CONTACT, "PROMO").await.unwrap();
    let old_id = first.session_id.unwrap();

    let restarted = h.send(CONTACT, "RESTART").await.unwrap();
    assert_eq!(restarted.kind, TurnKind::Restarted);
    let new_id = restarted.session_id.unwrap();
    assert_ne!(new_id, old_id);

    let old = h.storage.get_session(&old_id).await.unwrap().unwrap();
    assert_eq!(old.status, SessionStatus::Cancelled);
    let active = h.active_session(CONTACT).await.unwrap();
    assert_eq!(active.id, new_id);
    assert!(active.campaign_id.is_none());
}

#[tokio::test]
async fn api_step_success_continues_on_success_branch() {
    let h = TestHarness::builder().build().await.unwrap();
    let started = h.send(CONTACT, "PROMO").await.unwrap();

    let report = h.send(CONTACT, "points").await.unwrap();
    assert_eq!(report.checkpoint.as_deref(), Some("POINTS_OK"));

    let calls = h.api.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].params.get("phone").map(String::as_str), Some(CONTACT));

    let session = h
        .storage
        .get_session(&started.session_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(
        h.provider.texts_to(CONTACT).last().map(String::as_str),
        Some("Your points are on the way.")
    );
}

#[tokio::test]
async fn api_step_error_status_takes_error_branch() {
    let h = TestHarness::builder().build().await.unwrap();
    h.api.push_status(503, "");
    let started = h.send(CONTACT, "PROMO").await.unwrap();

    let report = h.send(CONTACT, "points").await.unwrap();
    assert_eq!(report.checkpoint.as_deref(), Some("POINTS_ERR"));
    let session = h
        .storage
        .get_session(&started.session_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.checkpoint, "POINTS_ERR");
    assert_eq!(
        h.provider.texts_to(CONTACT).last().map(String::as_str),
        Some("We could not check your points right now.")
    );
}

#[tokio::test]
async fn api_transport_error_takes_error_branch() {
    let h = TestHarness::builder().build().await.unwrap();
    h.api.push(Err(FlowlineError::Provider {
        message: "connection refused".into(),
        source: None,
    }));
    h.send(CONTACT, "PROMO").await.unwrap();

    let report = h.send(CONTACT, "points").await.unwrap();
    assert_eq!(report.checkpoint.as_deref(), Some("POINTS_ERR"));
}

#[tokio::test]
async fn cancel_during_api_call_drops_the_continuation() {
    let h = TestHarness::builder().build().await.unwrap();
    let started = h.send(CONTACT, "PROMO").await.unwrap();
    let session_id = started.session_id.unwrap();
    h.api.set_delay(Duration::from_millis(300));

    let (report, cancelled) = tokio::join!(h.send(CONTACT, "points"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.lifecycle.cancel(&session_id).await
    });
    report.unwrap();
    assert_eq!(cancelled.unwrap().status, SessionStatus::Cancelled);

    let session = h.storage.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Cancelled);
    assert_eq!(session.checkpoint, "POINTS_OK");
    assert!(
        !h.provider
            .texts_to(CONTACT)
            .contains(&"Your points are on the way.".to_string())
    );
}

#[tokio::test]
async fn allowed_inputs_gate_rejects_and_holds_position() {
    let h = TestHarness::builder().build().await.unwrap();
    let mut q1 = node(
        "Q1",
        NodeKind::Message {
            body: "Rate us from 1 to 3.".into(),
            next: None,
            rules: vec![BranchRule {
                when: Predicate::Any,
                target: "THANKS".into(),
            }],
            fallback: None,
        },
    );
    q1.allowed_inputs = vec![Predicate::OneOf(vec!["1".into(), "2".into(), "3".into()])];
    add_campaign_flow(
        &h,
        FlowDefinition {
            id: "survey".into(),
            name: "Survey".into(),
            entry_key: "Q1".into(),
            fallback_key: "OOPS".into(),
            nodes: vec![
                q1,
                node("THANKS", text("Thanks!", None)),
                node(
                    "OOPS",
                    NodeKind::Fallback {
                        body: "Please answer 1, 2 or 3.".into(),
                        next: None,
                    },
                ),
            ],
        },
        "survey",
    )
    .await;

    h.send(CONTACT, "SURVEY").await.unwrap();
    let rejected = h.send(CONTACT, "7").await.unwrap();
    assert_eq!(rejected.kind, TurnKind::Rejected);
    assert_eq!(rejected.checkpoint.as_deref(), Some("Q1"));
    assert_eq!(
        h.provider.texts_to(CONTACT).last().map(String::as_str),
        Some("Please answer 1, 2 or 3.")
    );

    let accepted = h.send(CONTACT, "2").await.unwrap();
    assert_eq!(accepted.kind, TurnKind::Completed);
}

#[tokio::test]
async fn node_wait_timeout_expires_the_session() {
    let h = TestHarness::builder().build().await.unwrap();
    let mut wait = node(
        "WAIT",
        NodeKind::Decision {
            rules: vec![BranchRule {
                when: Predicate::Any,
                target: "DONE".into(),
            }],
            fallback: None,
        },
    );
    wait.wait_timeout_secs = Some(300);
    add_campaign_flow(
        &h,
        FlowDefinition {
            id: "quick".into(),
            name: "Quick".into(),
            entry_key: "WAIT".into(),
            fallback_key: "DONE".into(),
            nodes: vec![wait, node("DONE", text("Done.", None))],
        },
        "quick",
    )
    .await;

    h.send(CONTACT, "quick").await.unwrap();
    let session = h.active_session(CONTACT).await.unwrap();
    assert_eq!(session.expires_at.as_deref(), Some("2026-03-01T10:05:00.000Z"));

    h.clock.advance(Duration::from_secs(6 * 60));
    h.run_jobs().await.unwrap();
    let expired = h.storage.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(expired.status, SessionStatus::Expired);
}

#[tokio::test]
async fn flow_without_waiting_nodes_completes_on_start() {
    let h = TestHarness::builder().build().await.unwrap();
    add_campaign_flow(
        &h,
        FlowDefinition {
            id: "hello".into(),
            name: "Hello".into(),
            entry_key: "HI".into(),
            fallback_key: "HI".into(),
            nodes: vec![
                node("HI", text("Hi there.", Some("BYE"))),
                node("BYE", text("Bye.", None)),
            ],
        },
        "hello",
    )
    .await;

    let report = h.send(CONTACT, "hello").await.unwrap();
    assert_eq!(report.kind, TurnKind::Completed);
    assert_eq!(report.attempts.len(), 2);
    assert!(h.active_session(CONTACT).await.is_none());
    assert_eq!(h.provider.texts_to(CONTACT), vec!["Hi there.", "Bye."]);
}

#[tokio::test]
async fn jump_cycle_is_a_flow_error_not_a_session() {
    let h = TestHarness::builder().build().await.unwrap();
    add_campaign_flow(
        &h,
        FlowDefinition {
            id: "loop".into(),
            name: "Loop".into(),
            entry_key: "A".into(),
            fallback_key: "A".into(),
            nodes: vec![
                node("A", NodeKind::Jump { target: "B".into() }),
                node("B", NodeKind::Jump { target: "A".into() }),
            ],
        },
        "loop",
    )
    .await;

    let report = h.send(CONTACT, "loop").await.unwrap();
    assert_eq!(report.kind, TurnKind::FlowError);
    assert!(report.session_id.is_none());
    assert!(h.active_session(CONTACT).await.is_none());
    assert_eq!(
        h.provider.texts_to(CONTACT),
        vec![h.config.engine.fallback_text.clone()]
    );
}

#[tokio::test]
async fn long_message_chain_runs_past_the_jump_hop_limit() {
    let h = TestHarness::builder().build().await.unwrap();
    add_campaign_flow(&h, line_chain("news", 12), "join").await;

    let report = h.send(CONTACT, "join").await.unwrap();
    assert_eq!(report.kind, TurnKind::Started);
    assert_eq!(report.checkpoint.as_deref(), Some("L11"));
    assert_eq!(report.attempts.len(), 12);
    let expected: Vec<String> = (0..12).map(|i| format!("line {i}")).collect();
    assert_eq!(h.provider.texts_to(CONTACT), expected);
    assert!(h.active_session(CONTACT).await.is_some());
}

#[tokio::test]
async fn retried_messages_keep_their_turn_order() {
    let h = TestHarness::builder().build().await.unwrap();
    add_campaign_flow(&h, line_chain("news", 6), "join").await;
    for _ in 0..6 {
        h.provider
            .push_outcome(Err(DeliveryFailure::transient("HTTP 503")));
    }

    let report = h.send(CONTACT, "join").await.unwrap();
    assert_eq!(report.kind, TurnKind::Started);
    for id in &report.attempts {
        let attempt = h.storage.get_attempt(id).await.unwrap().unwrap();
        assert_eq!(attempt.status, DeliveryStatus::Failed);
    }

    h.clock.advance(Duration::from_secs(120));
    h.run_jobs().await.unwrap();

    let texts = h.provider.texts_to(CONTACT);
    assert_eq!(texts.len(), 12);
    let expected: Vec<String> = (0..6).map(|i| format!("line {i}")).collect();
    assert_eq!(texts[..6], expected[..]);
    assert_eq!(texts[6..], expected[..]);
}

#[tokio::test]
async fn failed_first_send_is_retried_with_the_same_payload() {
    let h = TestHarness::builder().build().await.unwrap();
    h.provider
        .push_outcome(Err(DeliveryFailure::transient("HTTP 503")));

    let report = h.send(CONTACT, "PROMO").await.unwrap();
    let attempt_id = report.attempts[0].clone();
    let attempt = h.storage.get_attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, DeliveryStatus::Failed);
    assert_eq!(attempt.retry_count, 1);

    h.clock.advance(Duration::from_secs(120));
    h.run_jobs().await.unwrap();

    let attempt = h.storage.get_attempt(&attempt_id).await.unwrap().unwrap();
    assert_eq!(attempt.status, DeliveryStatus::Sent);
    let sent = h.provider.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test]
async fn concurrent_turns_for_one_contact_are_serialized() {
    let h = TestHarness::builder().build().await.unwrap();

    let (a, b) = tokio::join!(h.send(CONTACT, "PROMO"), h.send(CONTACT, "PROMO"));
    let kinds = [a.unwrap().kind, b.unwrap().kind];
    assert!(kinds.contains(&TurnKind::Started));
    assert!(kinds.contains(&TurnKind::Advanced));
    assert!(h.active_session(CONTACT).await.is_some());
}

#[tokio::test]
async fn different_contacts_get_independent_sessions() {
    let h = TestHarness::builder().build().await.unwrap();
    let (a, b) = tokio::join!(h.send("15550001", "PROMO"), h.send("15550002", "PROMO"));
    assert_eq!(a.unwrap().kind, TurnKind::Started);
    assert_eq!(b.unwrap().kind, TurnKind::Started);
}
