// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow executor.
//!
//! Pure graph walk: given a flow, a checkpoint, and normalized input it
//! decides the next checkpoint and the outbound actions of the turn. Nothing
//! here touches storage, so a turn can be persisted atomically before any
//! action runs.

use std::collections::HashSet;

use flowline_core::flow::{ApiCall, FlowDefinition, NodeKind};
use flowline_core::types::{OutboundPayload, SessionStatus};
use tracing::{error, warn};

/// Side effect requested by a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(OutboundPayload),
    /// External call. The checkpoint already sits on `on_success`; the
    /// engine runs the continuation once the call resolves.
    CallApi {
        call: ApiCall,
        on_success: String,
        on_error: String,
    },
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The session moved (or parked again) normally.
    Advanced,
    /// Input failed the node's allowed-input gate; checkpoint unchanged.
    InputRejected,
    /// Broken flow data. Checkpoint unchanged, fallback reply only.
    FlowError(String),
}

/// Result of one executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub checkpoint: String,
    pub status: SessionStatus,
    pub actions: Vec<Action>,
    /// Wait timeout of the node the session parks on.
    pub wait_timeout_secs: Option<u64>,
    pub outcome: StepOutcome,
}

impl ExecutionResult {
    /// Outbound payloads in emission order.
    pub fn sends(&self) -> impl Iterator<Item = &OutboundPayload> {
        self.actions.iter().filter_map(|a| match a {
            Action::Send(p) => Some(p),
            Action::CallApi { .. } => None,
        })
    }

    /// The pending API call, if the run stopped on one.
    pub fn api_call(&self) -> Option<(&ApiCall, &str, &str)> {
        self.actions.iter().find_map(|a| match a {
            Action::CallApi {
                call,
                on_success,
                on_error,
            } => Some((call, on_success.as_str(), on_error.as_str())),
            Action::Send(_) => None,
        })
    }

    pub fn is_flow_error(&self) -> bool {
        matches!(self.outcome, StepOutcome::FlowError(_))
    }
}

/// Walks flow graphs. Jump nodes are bounded by `hop_limit` per turn; any
/// node reached twice in one walk is a cycle that never waits for input.
#[derive(Debug, Clone)]
pub struct FlowExecutor {
    hop_limit: u32,
    fallback_text: String,
}

impl FlowExecutor {
    pub fn new(hop_limit: u32, fallback_text: impl Into<String>) -> Self {
        Self {
            hop_limit,
            fallback_text: fallback_text.into(),
        }
    }

    /// Run a fresh session from the flow's entry node.
    pub fn start(&self, flow: &FlowDefinition) -> ExecutionResult {
        self.run(flow, &flow.entry_key, None, &flow.entry_key)
    }

    /// Continue from `key` without evaluating input (API continuations).
    pub fn resume(&self, flow: &FlowDefinition, key: &str) -> ExecutionResult {
        self.run(flow, key, None, key)
    }

    /// Evaluate `input` against the node at `checkpoint` and walk on.
    pub fn advance(&self, flow: &FlowDefinition, checkpoint: &str, input: &str) -> ExecutionResult {
        let Some(node) = flow.node(checkpoint) else {
            return self.flow_error(
                flow,
                checkpoint,
                format!("checkpoint `{checkpoint}` does not exist"),
            );
        };

        if !node.accepts(input) {
            return ExecutionResult {
                checkpoint: checkpoint.to_string(),
                status: SessionStatus::Active,
                actions: vec![Action::Send(self.global_fallback(flow))],
                wait_timeout_secs: node.wait_timeout_secs,
                outcome: StepOutcome::InputRejected,
            };
        }

        // A session parked on a node that does not capture input (an
        // interrupted API continuation) re-runs that node.
        if !node.kind.waits_for_input() {
            return self.run(flow, checkpoint, None, checkpoint);
        }

        let target = node
            .kind
            .rules()
            .iter()
            .find(|rule| rule.when.matches(input))
            .map(|rule| rule.target.as_str())
            .or_else(|| node.kind.fallback())
            .unwrap_or(flow.fallback_key.as_str());

        self.run(flow, target, Some(checkpoint), checkpoint)
    }

    /// Walk from `start`. `return_to` is the node whose input is being
    /// evaluated; a fallback node without `next` parks there again.
    fn run(
        &self,
        flow: &FlowDefinition,
        start: &str,
        return_to: Option<&str>,
        origin: &str,
    ) -> ExecutionResult {
        let mut key = start.to_string();
        let mut hops = 0u32;
        let mut visited = HashSet::new();
        let mut actions = Vec::new();

        loop {
            let Some(node) = flow.node(&key) else {
                return self.flow_error(flow, origin, format!("dangling node reference `{key}`"));
            };
            if !visited.insert(key.clone()) {
                return self.flow_error(
                    flow,
                    origin,
                    format!("node `{key}` reached twice without waiting for input"),
                );
            }

            let next = match &node.kind {
                NodeKind::Message {
                    body, next, rules, ..
                } => {
                    actions.push(Action::Send(OutboundPayload::text(body.clone())));
                    if !rules.is_empty() {
                        return parked(key, node.wait_timeout_secs, actions);
                    }
                    next.clone()
                }
                NodeKind::Template {
                    template,
                    next,
                    rules,
                    ..
                } => {
                    actions.push(Action::Send(OutboundPayload::Template {
                        name: template.name.clone(),
                        language: template.language.clone(),
                        params: template.params.clone(),
                    }));
                    if !rules.is_empty() {
                        return parked(key, node.wait_timeout_secs, actions);
                    }
                    next.clone()
                }
                NodeKind::Decision { .. } => {
                    return parked(key, node.wait_timeout_secs, actions);
                }
                NodeKind::Jump { target } => {
                    hops += 1;
                    if hops > self.hop_limit {
                        return self.flow_error(
                            flow,
                            origin,
                            format!("hop limit {} exceeded at `{target}`", self.hop_limit),
                        );
                    }
                    Some(target.clone())
                }
                NodeKind::Api {
                    call,
                    on_success,
                    on_error,
                } => {
                    actions.push(Action::CallApi {
                        call: call.clone(),
                        on_success: on_success.clone(),
                        on_error: on_error.clone(),
                    });
                    return parked(on_success.clone(), None, actions);
                }
                NodeKind::Fallback { body, next } => {
                    actions.push(Action::Send(OutboundPayload::text(body.clone())));
                    match (next, return_to) {
                        (Some(next), _) => Some(next.clone()),
                        (None, Some(back)) => {
                            let wait = flow.node(back).and_then(|n| n.wait_timeout_secs);
                            return parked(back.to_string(), wait, actions);
                        }
                        (None, None) => None,
                    }
                }
            };

            match next {
                Some(next) => key = next,
                None => {
                    return ExecutionResult {
                        checkpoint: key,
                        status: SessionStatus::Completed,
                        actions,
                        wait_timeout_secs: None,
                        outcome: StepOutcome::Advanced,
                    };
                }
            }
        }
    }

    fn flow_error(&self, flow: &FlowDefinition, checkpoint: &str, reason: String) -> ExecutionResult {
        error!(flow_id = %flow.id, checkpoint, reason = %reason, "flow definition error");
        ExecutionResult {
            checkpoint: checkpoint.to_string(),
            status: SessionStatus::Active,
            actions: vec![Action::Send(self.global_fallback(flow))],
            wait_timeout_secs: None,
            outcome: StepOutcome::FlowError(reason),
        }
    }

    /// Body of the flow's global fallback node, else the configured text.
    fn global_fallback(&self, flow: &FlowDefinition) -> OutboundPayload {
        match flow.node(&flow.fallback_key).map(|n| &n.kind) {
            Some(NodeKind::Fallback { body, .. }) | Some(NodeKind::Message { body, .. }) => {
                OutboundPayload::text(body.clone())
            }
            _ => {
                warn!(flow_id = %flow.id, "global fallback node has no text body");
                OutboundPayload::text(self.fallback_text.clone())
            }
        }
    }
}

fn parked(key: String, wait_timeout_secs: Option<u64>, actions: Vec<Action>) -> ExecutionResult {
    ExecutionResult {
        checkpoint: key,
        status: SessionStatus::Active,
        actions,
        wait_timeout_secs,
        outcome: StepOutcome::Advanced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowline_core::flow::{BranchRule, FlowNode, Predicate, TemplateRef};

    fn node(key: &str, kind: NodeKind) -> FlowNode {
        FlowNode {
            key: key.into(),
            kind,
            allowed_inputs: vec![],
            wait_timeout_secs: None,
        }
    }

    fn text(body: &str) -> NodeKind {
        NodeKind::Message {
            body: body.into(),
            next: None,
            rules: vec![],
            fallback: None,
        }
    }

    fn flow(nodes: Vec<FlowNode>) -> FlowDefinition {
        FlowDefinition {
            id: "f".into(),
            name: String::new(),
            entry_key: "A".into(),
            fallback_key: "FB".into(),
            nodes,
        }
    }

    fn fallback_node() -> FlowNode {
        node(
            "FB",
            NodeKind::Fallback {
                body: "Sorry, please answer yes or no.".into(),
                next: None,
            },
        )
    }

    fn yes_maybe_flow() -> FlowDefinition {
        flow(vec![
            node(
                "A",
                NodeKind::Decision {
                    rules: vec![BranchRule {
                        when: Predicate::Equals("yes".into()),
                        target: "B".into(),
                    }],
                    fallback: Some("C".into()),
                },
            ),
            node("B", text("Great")),
            node("C", text("Maybe later")),
            fallback_node(),
        ])
    }

    fn executor() -> FlowExecutor {
        FlowExecutor::new(10, "fallback")
    }

    fn bodies(result: &ExecutionResult) -> Vec<String> {
        result
            .sends()
            .map(|p| match p {
                OutboundPayload::Text { body } => body.clone(),
                OutboundPayload::Template { name, .. } => format!("template:{name}"),
            })
            .collect()
    }

    #[test]
    fn first_matching_rule_wins_else_node_fallback() {
        let flow = yes_maybe_flow();
        let yes = executor().advance(&flow, "A", "yes");
        assert_eq!(yes.checkpoint, "B");
        assert_eq!(bodies(&yes), vec!["Great"]);

        let maybe = executor().advance(&flow, "A", "maybe");
        assert_eq!(maybe.checkpoint, "C");
        assert_eq!(bodies(&maybe), vec!["Maybe later"]);
        assert_eq!(maybe.status, SessionStatus::Completed);
    }

    #[test]
    fn global_fallback_returns_to_the_question() {
        let mut flow = yes_maybe_flow();
        if let NodeKind::Decision { fallback, .. } = &mut flow.nodes[0].kind {
            *fallback = None;
        }
        let result = executor().advance(&flow, "A", "what?");
        assert_eq!(result.checkpoint, "A");
        assert_eq!(result.status, SessionStatus::Active);
        assert_eq!(bodies(&result), vec!["Sorry, please answer yes or no."]);
        assert_eq!(result.outcome, StepOutcome::Advanced);
    }

    #[test]
    fn start_follows_next_until_a_node_waits() {
        let flow = flow(vec![
            node(
                "A",
                NodeKind::Message {
                    body: "Welcome".into(),
                    next: Some("ASK".into()),
                    rules: vec![],
                    fallback: None,
                },
            ),
            FlowNode {
                wait_timeout_secs: Some(600),
                ..node(
                    "ASK",
                    NodeKind::Template {
                        template: TemplateRef {
                            name: "promo_optin".into(),
                            language: "en_US".into(),
                            params: vec![],
                        },
                        next: None,
                        rules: vec![BranchRule {
                            when: Predicate::Any,
                            target: "FB".into(),
                        }],
                        fallback: None,
                    },
                )
            },
            fallback_node(),
        ]);
        let result = executor().start(&flow);
        assert_eq!(result.checkpoint, "ASK");
        assert_eq!(result.wait_timeout_secs, Some(600));
        assert_eq!(bodies(&result), vec!["Welcome", "template:promo_optin"]);
    }

    fn jump_chain(len: usize) -> FlowDefinition {
        let mut nodes: Vec<FlowNode> = (0..len)
            .map(|i| {
                let key = if i == 0 { "A".to_string() } else { format!("J{i}") };
                let target = if i + 1 == len {
                    "END".to_string()
                } else {
                    format!("J{}", i + 1)
                };
                node(&key, NodeKind::Jump { target })
            })
            .collect();
        nodes.push(node("END", text("done")));
        nodes.push(fallback_node());
        flow(nodes)
    }

    #[test]
    fn jump_chain_over_hop_limit_is_a_flow_error() {
        let result = executor().start(&jump_chain(11));
        assert!(result.is_flow_error());
        assert_eq!(result.checkpoint, "A");
        assert_eq!(bodies(&result), vec!["Sorry, please answer yes or no."]);
    }

    #[test]
    fn jump_chain_within_hop_limit_completes() {
        let result = executor().start(&jump_chain(10));
        assert_eq!(result.outcome, StepOutcome::Advanced);
        assert_eq!(result.checkpoint, "END");
        assert_eq!(result.status, SessionStatus::Completed);
    }

    #[test]
    fn dangling_checkpoint_keeps_state_and_replies_with_fallback() {
        let flow = yes_maybe_flow();
        let result = executor().advance(&flow, "GONE", "yes");
        assert!(result.is_flow_error());
        assert_eq!(result.checkpoint, "GONE");
        assert_eq!(result.actions.len(), 1);
    }

    #[test]
    fn allowed_inputs_gate_rejects_without_moving() {
        let mut flow = yes_maybe_flow();
        flow.nodes[0].allowed_inputs = vec![Predicate::OneOf(vec!["yes".into(), "no".into()])];
        let result = executor().advance(&flow, "A", "maybe");
        assert_eq!(result.outcome, StepOutcome::InputRejected);
        assert_eq!(result.checkpoint, "A");
        assert_eq!(bodies(&result), vec!["Sorry, please answer yes or no."]);
    }

    #[test]
    fn api_node_moves_optimistically_to_success() {
        let flow = flow(vec![
            node(
                "A",
                NodeKind::Api {
                    call: ApiCall {
                        method: "GET".into(),
                        url: "http://crm.local/points".into(),
                        params: Default::default(),
                    },
                    on_success: "OK".into(),
                    on_error: "ERR".into(),
                },
            ),
            node("OK", text("You have points")),
            node("ERR", text("Try later")),
            fallback_node(),
        ]);
        let result = executor().start(&flow);
        assert_eq!(result.checkpoint, "OK");
        assert_eq!(result.status, SessionStatus::Active);
        let (_, ok, err) = result.api_call().unwrap();
        assert_eq!((ok, err), ("OK", "ERR"));
        assert_eq!(result.sends().count(), 0);

        let failed = executor().resume(&flow, "ERR");
        assert_eq!(bodies(&failed), vec!["Try later"]);
        assert_eq!(failed.status, SessionStatus::Completed);
    }

    #[test]
    fn missing_fallback_body_uses_configured_text() {
        let mut flow = yes_maybe_flow();
        flow.nodes[3] = node("FB", NodeKind::Jump { target: "A".into() });
        let result = executor().advance(&flow, "NOPE", "x");
        assert_eq!(bodies(&result), vec!["fallback"]);
    }

    fn message_chain(len: usize) -> FlowDefinition {
        let mut nodes: Vec<FlowNode> = (0..len)
            .map(|i| {
                let key = if i == 0 { "A".to_string() } else { format!("M{i}") };
                let next = if i + 1 == len {
                    "ASK".to_string()
                } else {
                    format!("M{}", i + 1)
                };
                node(
                    &key,
                    NodeKind::Message {
                        body: format!("line {i}"),
                        next: Some(next),
                        rules: vec![],
                        fallback: None,
                    },
                )
            })
            .collect();
        nodes.push(node(
            "ASK",
            NodeKind::Decision {
                rules: vec![],
                fallback: Some("FB".into()),
            },
        ));
        nodes.push(fallback_node());
        flow(nodes)
    }

    #[test]
    fn long_message_chain_is_not_limited_by_jump_hops() {
        let result = executor().start(&message_chain(12));
        assert_eq!(result.outcome, StepOutcome::Advanced);
        assert_eq!(result.checkpoint, "ASK");
        assert_eq!(result.status, SessionStatus::Active);
        assert_eq!(result.sends().count(), 12);
    }

    #[test]
    fn message_cycle_without_input_is_a_flow_error() {
        let flow = flow(vec![
            node(
                "A",
                NodeKind::Message {
                    body: "ping".into(),
                    next: Some("B".into()),
                    rules: vec![],
                    fallback: None,
                },
            ),
            node(
                "B",
                NodeKind::Message {
                    body: "pong".into(),
                    next: Some("A".into()),
                    rules: vec![],
                    fallback: None,
                },
            ),
            fallback_node(),
        ]);
        let result = executor().start(&flow);
        assert!(result.is_flow_error());
        assert_eq!(result.checkpoint, "A");
        assert_eq!(bodies(&result), vec!["Sorry, please answer yes or no."]);
    }
}
