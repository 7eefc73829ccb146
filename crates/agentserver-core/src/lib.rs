// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! agentserver-core
//!
//! The stable shared contract for the message plane: the wire [`Envelope`],
//! the [`ListenerRecord`] shape, the universal [`MessageState`] passed
//! between pipeline steps, and the token budget types. If you only take
//! one dependency from this workspace, take this one.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// XML namespace for the fixed envelope schema carried on the main bus.
pub const ENVELOPE_NS: &str = "https://xml-pipeline.org/ns/envelope/v1";

/// Opaque thread identifier exposed to handlers; keys all thread state.
///
/// Never the private hierarchical path — that lives only in the path
/// registry (see `agentserver-path`).
pub type ThreadId = Uuid;

/// Structured container carrying sender, thread, optional target, and a
/// single payload element. The only outermost form on the main bus.
///
/// Invariant: after the pump injects provenance, `from` is always the
/// registered name of the emitting listener (or the literal `"core"` for
/// system-generated messages) — it is never copied from handler output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// Registered name of the emitting listener, or `"core"`.
    pub from: String,

    /// Opaque thread identifier.
    pub thread: ThreadId,

    /// Explicit direct target, if the sender named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// The single payload element (first-level child).
    pub payload: Payload,
}

/// The first-level child inside an [`Envelope`]. Its local name is the
/// routing key; its namespace and inner structure are governed by the
/// target listener's registered schema.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Payload {
    /// Local element name (the routing key), e.g. `"add"`, `"result"`.
    pub root_tag: String,

    /// XML namespace the payload's schema is registered under.
    pub namespace: String,

    /// Raw inner XML, kept verbatim until a pipeline step deserializes it.
    pub raw: String,
}

/// Whether a [`ListenerRecord`] is a local pure function or a remote-LLM
/// wrapper. Agents get a unique root tag (blind self-iteration); tools may
/// share a root tag with other tools (broadcast group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ListenerKind {
    /// A local pure function handler.
    Tool,
    /// A handler wrapping a remote language-model backend.
    Agent,
}

/// Immutable-after-registration record for a capability. See
/// `agentserver-registry` for the map keyed by name and root tag.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ListenerRecord {
    /// Unique registered name.
    pub name: String,

    /// Root tag this listener's payload schema is bound to.
    pub root_tag: String,

    /// `tool` or `agent`.
    pub kind: ListenerKind,

    /// Mandatory human description, surfaced by the meta handler.
    pub description: String,

    /// The set of other capabilities this listener may emit to. Checked
    /// during routing resolution (§4.3): a message's root tag must be in
    /// this set, or equal to the listener's own root tag.
    pub peers: std::collections::BTreeSet<String>,

    /// Per-agent share of the global tokens-per-minute budget, used by
    /// the pump's weighted deficit round-robin. Ignored for tools.
    #[serde(default)]
    pub token_share: Option<u32>,
}

impl ListenerRecord {
    /// Returns `true` if `candidate_root_tag` is a permitted emission
    /// target for this listener: either a declared peer, or the
    /// listener's own root tag (self-iteration).
    #[must_use]
    pub fn may_emit_to(&self, candidate_root_tag: &str) -> bool {
        candidate_root_tag == self.root_tag || self.peers.contains(candidate_root_tag)
    }
}

/// The universal intermediate representation passed between pipeline
/// steps (§3, §4.2). All fields except `raw_bytes` start empty and are
/// populated by successive steps; the first step to set `diagnostic`
/// halts the pipeline.
#[derive(Debug, Clone, Default)]
pub struct MessageState {
    /// Bytes as received (ingress) or as produced by the response
    /// post-processor for a re-enqueued child payload.
    pub raw_bytes: Vec<u8>,

    /// Parsed envelope tree, set by the *canonicalize*/*validate-envelope*
    /// steps.
    pub envelope: Option<Envelope>,

    /// Extracted payload tree, set by *extract-payload*.
    pub payload_value: Option<serde_json::Value>,

    /// Opaque thread identifier this state belongs to.
    pub thread_id: Option<ThreadId>,

    /// Registered name of the sender, captured by the pump before
    /// dispatch — never read from handler output.
    pub sender: Option<String>,

    /// Resolved target listener names, set by *resolve-routing*.
    pub targets: Vec<String>,

    /// Estimated prompt+completion token cost, attached during
    /// *deserialize* so the pump's admission check is O(1).
    pub estimated_tokens: Option<u64>,

    /// Diagnostic error text. Once set, the pipeline halts and the state
    /// routes to the system pipeline, which emits a `<huh>`.
    pub diagnostic: Option<String>,

    /// Open metadata bag for ad hoc annotations between steps.
    pub metadata: BTreeMap<String, String>,
}

impl MessageState {
    /// Construct a fresh state from raw ingress bytes.
    #[must_use]
    pub fn from_bytes(raw_bytes: Vec<u8>) -> Self {
        Self {
            raw_bytes,
            ..Default::default()
        }
    }

    /// Record a diagnostic and return `self` for chaining inside a
    /// pipeline step.
    #[must_use]
    pub fn with_diagnostic(mut self, message: impl Into<String>) -> Self {
        self.diagnostic = Some(message.into());
        self
    }

    /// `true` once any step has recorded a diagnostic.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.diagnostic.is_some()
    }
}

/// Per-agent and per-thread rolling token counters with
/// additive-increase/multiplicative-decrease feedback from backend
/// throttling signals. See `agentserver-pump` for the tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct TokenBudget {
    /// Tokens/minute this agent may currently spend (the AIMD-controlled
    /// local budget).
    pub tokens_per_minute: u64,

    /// Floor the local budget is never decreased below.
    pub floor: u64,

    /// Ceiling the local budget is never increased above.
    pub ceiling: u64,
}

impl TokenBudget {
    /// A new budget starting at `initial`, bounded by `[floor, ceiling]`.
    #[must_use]
    pub fn new(initial: u64, floor: u64, ceiling: u64) -> Self {
        Self {
            tokens_per_minute: initial.clamp(floor, ceiling),
            floor,
            ceiling,
        }
    }

    /// Additive increase on backend success: bump the local budget by a
    /// fixed step, capped at `ceiling`.
    #[must_use]
    pub fn increase(self, step: u64) -> Self {
        Self {
            tokens_per_minute: (self.tokens_per_minute + step).min(self.ceiling),
            ..self
        }
    }

    /// Multiplicative decrease on a rate-limit signal: halve the local
    /// budget, floored at `floor`.
    #[must_use]
    pub fn decrease(self) -> Self {
        Self {
            tokens_per_minute: (self.tokens_per_minute / 2).max(self.floor),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn may_emit_to_allows_declared_peer_and_self() {
        let record = ListenerRecord {
            name: "researcher".into(),
            root_tag: "research-query".into(),
            kind: ListenerKind::Agent,
            description: "finds things".into(),
            peers: ["search", "research-query"].iter().map(|s| s.to_string()).collect(),
            token_share: Some(3),
        };
        assert!(record.may_emit_to("search"));
        assert!(record.may_emit_to("research-query"));
        assert!(!record.may_emit_to("shutdown"));
    }

    #[test]
    fn message_state_diagnostic_halts() {
        let state = MessageState::from_bytes(b"<x/>".to_vec());
        assert!(!state.has_failed());
        let state = state.with_diagnostic("bad envelope");
        assert!(state.has_failed());
    }

    #[test]
    fn token_budget_aimd() {
        let budget = TokenBudget::new(1000, 100, 5000);
        let increased = budget.increase(500);
        assert_eq!(increased.tokens_per_minute, 1500);
        let decreased = increased.decrease();
        assert_eq!(decreased.tokens_per_minute, 750);
        let floored = TokenBudget::new(150, 100, 5000).decrease();
        assert_eq!(floored.tokens_per_minute, 100);
    }
}
