// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow graph model.
//!
//! A flow is a set of nodes keyed by string. Each node carries a tagged
//! [`NodeKind`] with the fields that kind needs, so the executor can match on
//! the tag instead of probing optional columns.

use std::collections::{BTreeMap, HashSet};

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::error::FlowlineError;

/// Trim and lowercase inbound text before any keyword or rule comparison.
pub fn normalize_input(text: &str) -> String {
    text.trim().to_lowercase()
}

/// A complete conversation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Node a new session starts on.
    pub entry_key: String,
    /// Node used when nothing else matches.
    pub fallback_key: String,
    pub nodes: Vec<FlowNode>,
}

impl FlowDefinition {
    /// Look up a node by key.
    pub fn node(&self, key: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|n| n.key == key)
    }

    /// Check the graph for structural errors.
    ///
    /// Node keys must be unique, the entry and global fallback keys must
    /// resolve, every node reference must resolve, and regex predicates must
    /// compile.
    pub fn validate(&self) -> Result<(), FlowlineError> {
        let invalid = |message: String| FlowlineError::FlowDefinition {
            flow_id: self.id.clone(),
            message,
        };

        let mut keys = HashSet::new();
        for node in &self.nodes {
            if !keys.insert(node.key.as_str()) {
                return Err(invalid(format!("duplicate node key `{}`", node.key)));
            }
        }

        if !keys.contains(self.entry_key.as_str()) {
            return Err(invalid(format!(
                "entry key `{}` does not resolve",
                self.entry_key
            )));
        }
        if !keys.contains(self.fallback_key.as_str()) {
            return Err(invalid(format!(
                "global fallback key `{}` does not resolve",
                self.fallback_key
            )));
        }

        for node in &self.nodes {
            for target in node.kind.targets() {
                if !keys.contains(target) {
                    return Err(invalid(format!(
                        "node `{}` references missing node `{target}`",
                        node.key
                    )));
                }
            }
            for predicate in node
                .allowed_inputs
                .iter()
                .chain(node.kind.rules().iter().map(|r| &r.when))
            {
                predicate.check().map_err(|e| {
                    invalid(format!("node `{}` has a bad predicate: {e}", node.key))
                })?;
            }
        }

        Ok(())
    }
}

/// One node of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub key: String,
    pub kind: NodeKind,
    /// Inputs accepted while parked on this node. Empty accepts anything.
    #[serde(default)]
    pub allowed_inputs: Vec<Predicate>,
    /// Session deadline while parked on this node.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

impl FlowNode {
    /// True if the normalized input passes the node's allowed-input gate.
    pub fn accepts(&self, input: &str) -> bool {
        self.allowed_inputs.is_empty() || self.allowed_inputs.iter().any(|p| p.matches(input))
    }
}

/// Kind-specific node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Send a text. With `rules` the node waits and captures the reply.
    Message {
        body: String,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        rules: Vec<BranchRule>,
        #[serde(default)]
        fallback: Option<String>,
    },
    /// Send a provider template. Same continuation rules as `Message`.
    Template {
        template: TemplateRef,
        #[serde(default)]
        next: Option<String>,
        #[serde(default)]
        rules: Vec<BranchRule>,
        #[serde(default)]
        fallback: Option<String>,
    },
    /// Wait for input and branch on it.
    Decision {
        rules: Vec<BranchRule>,
        #[serde(default)]
        fallback: Option<String>,
    },
    /// Move to another node without sending anything.
    Jump { target: String },
    /// Call an external HTTP endpoint and branch on the outcome.
    Api {
        call: ApiCall,
        on_success: String,
        on_error: String,
    },
    /// Send a recovery text, then continue at `next` or return to the node
    /// that was being evaluated.
    Fallback {
        body: String,
        #[serde(default)]
        next: Option<String>,
    },
}

impl NodeKind {
    /// Capture rules evaluated against the next inbound input.
    pub fn rules(&self) -> &[BranchRule] {
        match self {
            NodeKind::Message { rules, .. }
            | NodeKind::Template { rules, .. }
            | NodeKind::Decision { rules, .. } => rules,
            _ => &[],
        }
    }

    /// Node-level fallback for unmatched input.
    pub fn fallback(&self) -> Option<&str> {
        match self {
            NodeKind::Message { fallback, .. }
            | NodeKind::Template { fallback, .. }
            | NodeKind::Decision { fallback, .. } => fallback.as_deref(),
            _ => None,
        }
    }

    /// True if a session parks on this node to wait for input.
    pub fn waits_for_input(&self) -> bool {
        match self {
            NodeKind::Decision { .. } => true,
            NodeKind::Message { rules, .. } | NodeKind::Template { rules, .. } => {
                !rules.is_empty()
            }
            _ => false,
        }
    }

    /// Every node key this node can move to.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.rules().iter().map(|r| r.target.as_str()).collect();
        if let Some(fb) = self.fallback() {
            out.push(fb);
        }
        match self {
            NodeKind::Message { next, .. }
            | NodeKind::Template { next, .. }
            | NodeKind::Fallback { next, .. } => out.extend(next.as_deref()),
            NodeKind::Jump { target } => out.push(target),
            NodeKind::Api {
                on_success,
                on_error,
                ..
            } => {
                out.push(on_success);
                out.push(on_error);
            }
            NodeKind::Decision { .. } => {}
        }
        out
    }
}

/// Reference to a provider-side message template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub params: Vec<String>,
}

fn default_language() -> String {
    "en_US".to_string()
}

/// External HTTP call descriptor for `api` nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    /// Parameter name to template. `{{input}}` and `{{contact_id}}` are
    /// substituted before the call.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ApiCall {
    /// Resolve parameter templates for one turn.
    pub fn render_params(&self, input: &str, contact_id: &str) -> BTreeMap<String, String> {
        self.params
            .iter()
            .map(|(k, v)| {
                let value = v
                    .replace("{{input}}", input)
                    .replace("{{contact_id}}", contact_id);
                (k.clone(), value)
            })
            .collect()
    }
}

/// `when` predicate `->` target node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    pub when: Predicate,
    pub target: String,
}

/// Input predicate. All comparisons run against normalized input and are
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    Equals(String),
    OneOf(Vec<String>),
    Contains(String),
    Regex(String),
    Any,
}

impl Predicate {
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Predicate::Equals(v) => normalize_input(v) == input,
            Predicate::OneOf(vs) => vs.iter().any(|v| normalize_input(v) == input),
            Predicate::Contains(v) => input.contains(&normalize_input(v)),
            Predicate::Regex(pattern) => match RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
            {
                Ok(re) => re.is_match(input),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "skipping invalid regex predicate");
                    false
                }
            },
            Predicate::Any => true,
        }
    }

    fn check(&self) -> Result<(), regex::Error> {
        if let Predicate::Regex(pattern) = self {
            RegexBuilder::new(pattern).case_insensitive(true).build()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str, kind: NodeKind) -> FlowNode {
        FlowNode {
            key: key.to_string(),
            kind,
            allowed_inputs: vec![],
            wait_timeout_secs: None,
        }
    }

    fn text(key: &str, body: &str) -> FlowNode {
        node(
            key,
            NodeKind::Fallback {
                body: body.to_string(),
                next: None,
            },
        )
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_input("  PROMO \n"), "promo");
    }

    #[test]
    fn predicates_are_case_insensitive() {
        assert!(Predicate::Equals("Yes".into()).matches("yes"));
        assert!(Predicate::OneOf(vec!["Y".into(), "YES".into()]).matches("y"));
        assert!(Predicate::Contains("Order".into()).matches("where is my order"));
        assert!(Predicate::Regex(r"^\d{5}$".into()).matches("12345"));
        assert!(Predicate::Regex("^STOP".into()).matches("stop please"));
        assert!(!Predicate::Regex("(".into()).matches("("));
        assert!(Predicate::Any.matches(""));
    }

    #[test]
    fn predicate_wire_format() {
        let p: Predicate = serde_json::from_str(r#"{"op":"one_of","value":["a","b"]}"#).unwrap();
        assert_eq!(p, Predicate::OneOf(vec!["a".into(), "b".into()]));
        let any: Predicate = serde_json::from_str(r#"{"op":"any"}"#).unwrap();
        assert_eq!(any, Predicate::Any);
    }

    #[test]
    fn validate_rejects_dangling_targets() {
        let flow = FlowDefinition {
            id: "f1".into(),
            name: String::new(),
            entry_key: "A".into(),
            fallback_key: "FB".into(),
            nodes: vec![
                node(
                    "A",
                    NodeKind::Jump {
                        target: "NOWHERE".into(),
                    },
                ),
                text("FB", "sorry"),
            ],
        };
        let err = flow.validate().unwrap_err();
        assert!(err.to_string().contains("NOWHERE"));
    }

    #[test]
    fn validate_requires_entry_and_fallback() {
        let flow = FlowDefinition {
            id: "f1".into(),
            name: String::new(),
            entry_key: "A".into(),
            fallback_key: "FB".into(),
            nodes: vec![text("A", "hello")],
        };
        assert!(flow.validate().unwrap_err().to_string().contains("FB"));
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let mut a = node(
            "A",
            NodeKind::Decision {
                rules: vec![BranchRule {
                    when: Predicate::Regex("([".into()),
                    target: "FB".into(),
                }],
                fallback: None,
            },
        );
        a.allowed_inputs = vec![];
        let flow = FlowDefinition {
            id: "f1".into(),
            name: String::new(),
            entry_key: "A".into(),
            fallback_key: "FB".into(),
            nodes: vec![a, text("FB", "sorry")],
        };
        assert!(flow.validate().is_err());
    }

    #[test]
    fn node_kind_json_is_tagged() {
        let n: FlowNode = serde_json::from_str(
            r#"{"key":"ASK","kind":{"type":"decision","rules":[{"when":{"op":"equals","value":"yes"},"target":"B"}],"fallback":"C"}}"#,
        )
        .unwrap();
        assert!(n.kind.waits_for_input());
        assert_eq!(n.kind.targets(), vec!["B", "C"]);
    }

    #[test]
    fn render_params_substitutes_placeholders() {
        let call = ApiCall {
            method: "POST".into(),
            url: "https://example.test/orders".into(),
            params: BTreeMap::from([
                ("order".to_string(), "{{input}}".to_string()),
                ("phone".to_string(), "{{contact_id}}".to_string()),
            ]),
        };
        let rendered = call.render_params("a-17", "15550001");
        assert_eq!(rendered["order"], "a-17");
        assert_eq!(rendered["phone"], "15550001");
    }
}
