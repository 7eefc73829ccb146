// SPDX-License-Identifier: MIT OR Apache-2.0
//! *resolve-routing* step (§4.2 default step list, §4.3).

use crate::stage::PipelineStage;
use agentserver_core::{ListenerRecord, MessageState};
use agentserver_policy::{resolve, RoutingTarget};
use agentserver_registry::ListenerRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Resolves `state.targets` from the parsed envelope, the owning
/// listener's record, and the shared registry.
pub struct ResolveRoutingStage {
    registry: Arc<RwLock<ListenerRegistry>>,
    sender: ListenerRecord,
}

impl ResolveRoutingStage {
    /// Bind this stage to the shared registry and the record of the
    /// listener whose pipeline this step runs inside.
    #[must_use]
    pub fn new(registry: Arc<RwLock<ListenerRegistry>>, sender: ListenerRecord) -> Self {
        Self { registry, sender }
    }
}

#[async_trait]
impl PipelineStage for ResolveRoutingStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let Some(envelope) = &state.envelope else {
            *state = std::mem::take(state).with_diagnostic("resolve-routing: no envelope parsed");
            return Ok(());
        };

        let registry = self.registry.read().await;
        match resolve(
            &self.sender,
            envelope.to.as_deref(),
            &envelope.payload.root_tag,
            &registry,
        ) {
            Ok(RoutingTarget::Direct(name)) => {
                state.targets = vec![name];
                Ok(())
            }
            Ok(RoutingTarget::Broadcast(names)) => {
                state.targets = names;
                Ok(())
            }
            Err(e) => {
                *state = std::mem::take(state).with_diagnostic(e.to_string());
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "resolve-routing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_core::{Envelope, ListenerKind, Payload};
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn tool(name: &str, root_tag: &str) -> ListenerRecord {
        ListenerRecord {
            name: name.to_string(),
            root_tag: root_tag.to_string(),
            kind: ListenerKind::Tool,
            description: "test".to_string(),
            peers: BTreeSet::new(),
            token_share: None,
        }
    }

    fn state_with_payload(root_tag: &str) -> MessageState {
        let mut state = MessageState::from_bytes(Vec::new());
        state.envelope = Some(Envelope {
            from: "client".to_string(),
            thread: Uuid::new_v4(),
            to: None,
            payload: Payload {
                root_tag: root_tag.to_string(),
                namespace: String::new(),
                raw: format!("<{root_tag}/>"),
            },
        });
        state
    }

    #[tokio::test]
    async fn resolves_broadcast_targets() {
        let mut registry = ListenerRegistry::new();
        registry.register(tool("search.google", "search")).unwrap();
        registry.register(tool("search.bing", "search")).unwrap();
        let stage = ResolveRoutingStage::new(
            Arc::new(RwLock::new(registry)),
            tool("client", "client"),
        );
        let mut state = state_with_payload("search");
        stage.process(&mut state).await.unwrap();
        assert!(!state.has_failed());
        assert_eq!(state.targets, vec!["search.bing", "search.google"]);
    }

    #[tokio::test]
    async fn unknown_root_tag_sets_diagnostic() {
        let stage = ResolveRoutingStage::new(
            Arc::new(RwLock::new(ListenerRegistry::new())),
            tool("client", "client"),
        );
        let mut state = state_with_payload("nobody-home");
        stage.process(&mut state).await.unwrap();
        assert!(state.has_failed());
    }
}
