// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Routing Resolution (§4.3): explicit-target and root-tag-broadcast
//! resolution, gated by peer safety.
//!
//! Modeled on the `Decision::allow`/`deny` shape, generalized from
//! tool/path policy to peer-set policy: [`ListenerRecord::may_emit_to`]
//! already encodes the peer-safety predicate, this crate just wires it
//! into target resolution against the [`ListenerRegistry`].

use agentserver_core::{ListenerKind, ListenerRecord};
use agentserver_error::ErrorCode;
use agentserver_registry::ListenerRegistry;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A routing-resolution verdict.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// Whether the message may proceed to dispatch.
    pub allowed: bool,
    /// Human-readable reason, set only when `allowed` is `false`.
    pub reason: Option<String>,
}

impl Decision {
    /// An unconditional allow.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denial carrying `reason`.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// The resolved destination(s) for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingTarget {
    /// A single, explicitly named target.
    Direct(String),
    /// Every listener currently bound to a root tag, in broadcast order.
    Broadcast(Vec<String>),
}

/// Errors raised during routing resolution. Both halt the pipeline and
/// route the message to the system pipeline's `<huh>` path (§4.2).
#[derive(Debug, Error)]
pub enum RoutingError {
    /// Neither an explicit target nor any root-tag-bound listener exists.
    #[error("no listener registered for target '{0}'")]
    UnknownTarget(String),

    /// The sender is an agent and the resolved target is outside its
    /// declared peer set and is not its own root tag.
    #[error("'{sender}' may not emit to '{target}' (not a declared peer)")]
    PeerViolation {
        /// Name of the sending listener.
        sender: String,
        /// Root tag of the disallowed target.
        target: String,
    },
}

impl RoutingError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownTarget(_) => ErrorCode::UnknownTarget,
            Self::PeerViolation { .. } => ErrorCode::PeerViolation,
        }
    }

    /// The routing-resolution verdict as a [`Decision`], for callers that
    /// want a uniform allow/deny shape rather than matching on variants.
    #[must_use]
    pub fn as_decision(&self) -> Decision {
        Decision::deny(self.to_string())
    }
}

/// Resolve the destination(s) for a message emitted by `sender`.
///
/// If `explicit_to` is set, resolution is direct: the name must exist in
/// `registry`. Otherwise every listener bound to `payload_root_tag` is
/// resolved as a broadcast set. In both cases, if `sender` is an agent,
/// the resolved root tag(s) must lie in its declared peer set or equal
/// its own root tag (self-iteration) — tools carry no such restriction.
///
/// # Errors
///
/// Returns [`RoutingError::UnknownTarget`] on a resolution miss, or
/// [`RoutingError::PeerViolation`] if an agent sender targets a capability
/// outside its peer set.
pub fn resolve(
    sender: &ListenerRecord,
    explicit_to: Option<&str>,
    payload_root_tag: &str,
    registry: &ListenerRegistry,
) -> Result<RoutingTarget, RoutingError> {
    if let Some(name) = explicit_to {
        let target = registry
            .lookup_by_name(name)
            .ok_or_else(|| RoutingError::UnknownTarget(name.to_string()))?;
        check_peer_safety(sender, &target.root_tag)?;
        return Ok(RoutingTarget::Direct(target.name.clone()));
    }

    let candidates = registry.lookup_by_root(payload_root_tag);
    if candidates.is_empty() {
        return Err(RoutingError::UnknownTarget(payload_root_tag.to_string()));
    }
    check_peer_safety(sender, payload_root_tag)?;
    Ok(RoutingTarget::Broadcast(
        candidates.iter().map(|r| r.name.clone()).collect(),
    ))
}

fn check_peer_safety(sender: &ListenerRecord, target_root_tag: &str) -> Result<(), RoutingError> {
    if sender.kind == ListenerKind::Agent && !sender.may_emit_to(target_root_tag) {
        return Err(RoutingError::PeerViolation {
            sender: sender.name.clone(),
            target: target_root_tag.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn agent(name: &str, root_tag: &str, peers: &[&str]) -> ListenerRecord {
        ListenerRecord {
            name: name.to_string(),
            root_tag: root_tag.to_string(),
            kind: ListenerKind::Agent,
            description: "test agent".to_string(),
            peers: peers.iter().map(|s| s.to_string()).collect(),
            token_share: Some(1),
        }
    }

    fn tool(name: &str, root_tag: &str) -> ListenerRecord {
        ListenerRecord {
            name: name.to_string(),
            root_tag: root_tag.to_string(),
            kind: ListenerKind::Tool,
            description: "test tool".to_string(),
            peers: BTreeSet::new(),
            token_share: None,
        }
    }

    fn registry_with(records: Vec<ListenerRecord>) -> ListenerRegistry {
        let mut registry = ListenerRegistry::new();
        for record in records {
            registry.register(record).unwrap();
        }
        registry
    }

    #[test]
    fn explicit_target_resolves_directly() {
        let registry = registry_with(vec![tool("calculator.add", "add")]);
        let sender = tool("client", "client");
        let target = resolve(&sender, Some("calculator.add"), "add", &registry).unwrap();
        assert_eq!(target, RoutingTarget::Direct("calculator.add".to_string()));
    }

    #[test]
    fn unknown_explicit_target_errors() {
        let registry = registry_with(vec![]);
        let sender = tool("client", "client");
        let err = resolve(&sender, Some("nope"), "add", &registry).unwrap_err();
        assert!(matches!(err, RoutingError::UnknownTarget(_)));
    }

    #[test]
    fn root_tag_resolves_to_broadcast_set() {
        let registry = registry_with(vec![tool("search.google", "search"), tool("search.bing", "search")]);
        let sender = tool("client", "client");
        let target = resolve(&sender, None, "search", &registry).unwrap();
        match target {
            RoutingTarget::Broadcast(names) => {
                assert_eq!(names, vec!["search.bing", "search.google"]);
            }
            RoutingTarget::Direct(_) => panic!("expected broadcast"),
        }
    }

    #[test]
    fn unbound_root_tag_errors() {
        let registry = registry_with(vec![]);
        let sender = tool("client", "client");
        let err = resolve(&sender, None, "search", &registry).unwrap_err();
        assert!(matches!(err, RoutingError::UnknownTarget(_)));
    }

    #[test]
    fn agent_may_self_iterate() {
        let registry = registry_with(vec![agent("researcher", "research-query", &["search"])]);
        let sender = agent("researcher", "research-query", &["search"]);
        let target = resolve(&sender, None, "research-query", &registry).unwrap();
        assert_eq!(target, RoutingTarget::Broadcast(vec!["researcher".to_string()]));
    }

    #[test]
    fn agent_targeting_outside_peers_is_denied() {
        let registry = registry_with(vec![tool("shutdown", "shutdown")]);
        let sender = agent("researcher", "research-query", &["search"]);
        let err = resolve(&sender, Some("shutdown"), "shutdown", &registry).unwrap_err();
        assert!(matches!(err, RoutingError::PeerViolation { .. }));
    }

    #[test]
    fn tools_carry_no_peer_restriction() {
        let registry = registry_with(vec![tool("search.google", "search")]);
        let sender = tool("calculator.add", "add");
        let target = resolve(&sender, Some("search.google"), "search", &registry).unwrap();
        assert_eq!(target, RoutingTarget::Direct("search.google".to_string()));
    }
}
