// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Dispatcher and the Trust Boundary (§4.4).
//!
//! Captures routing metadata in local scope ahead of spawning each
//! handler task, behind a hard trust boundary: a [`Handler`] only ever
//! receives a deserialized payload and an opaque [`HandlerMetadata`] —
//! never the sender identity, parent thread, or peer set that the
//! dispatcher captured about it.

use agentserver_core::{MessageState, ThreadId};
use agentserver_error::ErrorCode;
use agentserver_path::PathRegistry;
use agentserver_registry::ListenerRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// The only information a handler ever receives about the thread it is
/// running in: enough to key its own storage, nothing that would let it
/// forge provenance. A handler may learn its own registered name (to
/// key its own slot) but never the sender, peers, or parent thread.
#[derive(Clone)]
pub struct HandlerMetadata {
    /// Opaque thread identifier, for storage keying only.
    pub thread_id: ThreadId,
    /// The handler's own registered listener name.
    listener: String,
    /// Scoped access to listener-scoped storage (§3). Never exposed
    /// raw — only through [`HandlerMetadata::load_memory`]/
    /// [`HandlerMetadata::save_memory`], which always key by this
    /// handler's own `(thread_id, listener)` pair.
    paths: Arc<RwLock<PathRegistry>>,
}

impl HandlerMetadata {
    /// Bind a handler's own thread/listener identity to scoped storage
    /// access. Exposed so handler crates can construct one for their
    /// own tests; production dispatch always goes through
    /// [`Dispatcher::dispatch`].
    #[must_use]
    pub fn new(thread_id: ThreadId, listener: impl Into<String>, paths: Arc<RwLock<PathRegistry>>) -> Self {
        Self {
            thread_id,
            listener: listener.into(),
            paths,
        }
    }

    /// Read this handler's own listener-scoped memory for this thread,
    /// if anything has been stored yet.
    pub async fn load_memory(&self) -> Option<Value> {
        self.paths.read().await.get_storage(self.thread_id, &self.listener).cloned()
    }

    /// Overwrite this handler's own listener-scoped memory for this
    /// thread.
    pub async fn save_memory(&self, value: Value) {
        self.paths.write().await.set_storage(self.thread_id, &self.listener, value);
    }
}

/// A capability implementation: a local tool function or a remote-LLM
/// wrapper. Registered with the [`Dispatcher`] under the same name as
/// the corresponding [`agentserver_core::ListenerRecord`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle `payload`, returning raw response bytes (§4.4: handlers
    /// return raw bytes; the post-processor owns envelope reconstruction).
    async fn handle(&self, payload: Value, metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>>;
}

/// Everything the dispatcher captures about a dispatch in local scope,
/// before the handler ever runs. The post-processor uses this —
/// exclusively — to reconstruct outbound envelopes.
#[derive(Debug, Clone)]
pub struct CapturedContext {
    /// Registered name of the listener executing this dispatch.
    pub executing_listener: String,
    /// Opaque thread identifier.
    pub thread_id: ThreadId,
    /// Registered name of the message's sender.
    pub sender: String,
    /// Parent thread id, from the path registry.
    pub parent_thread_id: Option<ThreadId>,
    /// The executing listener's declared peer set at dispatch time.
    pub peers: BTreeSet<String>,
}

/// Errors a single dispatch can surface. Both are mapped to
/// [`ErrorCode::HandlerFailed`] — from the trust boundary's perspective
/// a handler that isn't registered and a handler that panics are the
/// same kind of failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No [`Handler`] is registered for this listener name.
    #[error("no handler registered for '{0}'")]
    UnknownHandler(String),

    /// The handler returned an error.
    #[error("handler '{listener}' failed: {reason}")]
    HandlerFailed {
        /// Listener name that failed.
        listener: String,
        /// Error detail from the handler.
        reason: String,
    },
}

impl DispatchError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::HandlerFailed
    }
}

/// The outcome of one spawned dispatch task.
pub struct DispatchOutcome {
    /// The context captured before the handler ran.
    pub context: CapturedContext,
    /// The handler's raw response bytes, or the failure.
    pub raw_bytes: Result<Vec<u8>, DispatchError>,
}

/// Stateless dispatcher: holds only the handler registry (the trust
/// boundary), no per-message state.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler implementation to a registered listener name.
    pub async fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Spawn one task per target in `state.targets`, each capturing its
    /// context before invoking (or failing to find) its handler.
    ///
    /// Each target's dispatch extends the sender's thread one segment
    /// (§4.7 delegation) into a one-shot child thread scoped to that
    /// handler invocation — this is both the handler's storage key and
    /// what gets appended to conversation history. The response
    /// truncates back to the parent thread (see `agentserver-postprocess`).
    pub async fn dispatch(
        &self,
        state: &MessageState,
        registry: &ListenerRegistry,
        paths: &Arc<RwLock<PathRegistry>>,
    ) -> Vec<JoinHandle<DispatchOutcome>> {
        let source_thread_id = state.thread_id.unwrap_or_default();
        let sender = state.sender.clone().unwrap_or_else(|| "core".to_string());
        let payload = state.payload_value.clone().unwrap_or(Value::Null);

        let mut handles = Vec::with_capacity(state.targets.len());
        for target in &state.targets {
            let handler = self.handlers.read().await.get(target).cloned();
            let peers = registry
                .lookup_by_name(target)
                .map(|r| r.peers.clone())
                .unwrap_or_default();

            let thread_id = {
                let mut guard = paths.write().await;
                guard.extend(source_thread_id, target).unwrap_or(source_thread_id)
            };
            // History is kept against the stable conversation thread, not
            // the one-shot delegation child, so it survives past this one
            // dispatch and accumulates for the lifetime of the connection.
            if let Some(envelope) = &state.envelope {
                paths.write().await.append_history(source_thread_id, envelope.clone());
            }
            let parent_thread_id = paths.read().await.parent_of(thread_id);

            let context = CapturedContext {
                executing_listener: target.clone(),
                thread_id,
                sender: sender.clone(),
                parent_thread_id,
                peers,
            };
            let payload = payload.clone();
            // Storage keys off the stable conversation thread the message
            // arrived on, not the one-shot delegation child below — a
            // handler's memory must persist across repeated invocations
            // from the same thread, which each mint a fresh child id.
            let metadata = HandlerMetadata::new(source_thread_id, target.clone(), Arc::clone(paths));

            handles.push(tokio::spawn(async move {
                let raw_bytes = match handler {
                    Some(h) => h
                        .handle(payload, metadata)
                        .await
                        .map_err(|e| DispatchError::HandlerFailed {
                            listener: context.executing_listener.clone(),
                            reason: e.to_string(),
                        }),
                    None => Err(DispatchError::UnknownHandler(
                        context.executing_listener.clone(),
                    )),
                };
                DispatchOutcome { context, raw_bytes }
            }));
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_core::{ListenerKind, ListenerRecord};
    use uuid::Uuid;

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, payload: Value, _metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>> {
            Ok(format!("<result>{payload}</result>").into_bytes())
        }
    }

    struct Failing;

    #[async_trait]
    impl Handler for Failing {
        async fn handle(&self, _payload: Value, _metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn state_targeting(thread_id: ThreadId, targets: Vec<String>) -> MessageState {
        let mut state = MessageState::from_bytes(Vec::new());
        state.thread_id = Some(thread_id);
        state.sender = Some("client".to_string());
        state.payload_value = Some(serde_json::json!({"a": "40"}));
        state.targets = targets;
        state
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register_handler("calculator.add", Arc::new(Echo))
            .await;

        let mut registry = ListenerRegistry::new();
        registry
            .register(ListenerRecord {
                name: "calculator.add".to_string(),
                root_tag: "add".to_string(),
                kind: ListenerKind::Tool,
                description: "adds".to_string(),
                peers: BTreeSet::new(),
                token_share: None,
            })
            .unwrap();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));

        let thread_id = Uuid::new_v4();
        let state = state_targeting(thread_id, vec!["calculator.add".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        assert_eq!(handles.len(), 1);
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert_eq!(outcome.context.executing_listener, "calculator.add");
        assert_eq!(outcome.context.sender, "client");
        assert!(outcome.raw_bytes.unwrap().starts_with(b"<result>"));
    }

    #[tokio::test]
    async fn unregistered_target_yields_unknown_handler_error() {
        let dispatcher = Dispatcher::new();
        let registry = ListenerRegistry::new();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let state = state_targeting(Uuid::new_v4(), vec!["nobody".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert!(matches!(outcome.raw_bytes, Err(DispatchError::UnknownHandler(_))));
    }

    #[tokio::test]
    async fn failing_handler_is_captured_as_handler_failed() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("flaky", Arc::new(Failing)).await;
        let registry = ListenerRegistry::new();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let state = state_targeting(Uuid::new_v4(), vec!["flaky".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert!(matches!(outcome.raw_bytes, Err(DispatchError::HandlerFailed { .. })));
    }

    #[tokio::test]
    async fn handler_never_sees_sender_or_peers() {
        // Compile-time trust boundary: Handler::handle's signature only
        // accepts `Value` and `HandlerMetadata`, so this test simply
        // exercises that a handler can't reach into the captured context.
        let dispatcher = Dispatcher::new();
        dispatcher
            .register_handler("calculator.add", Arc::new(Echo))
            .await;
        let registry = ListenerRegistry::new();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let state = state_targeting(Uuid::new_v4(), vec!["calculator.add".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert!(outcome.raw_bytes.unwrap().contains(&b'a'));
    }

    struct Counter;

    #[async_trait]
    impl Handler for Counter {
        async fn handle(&self, _payload: Value, metadata: HandlerMetadata) -> anyhow::Result<Vec<u8>> {
            let seen = metadata.load_memory().await.and_then(|v| v.as_u64()).unwrap_or(0) + 1;
            metadata.save_memory(serde_json::json!(seen)).await;
            Ok(format!("<result>{seen}</result>").into_bytes())
        }
    }

    #[tokio::test]
    async fn a_handler_can_read_and_write_its_own_storage_slot() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("counter", Arc::new(Counter)).await;
        let registry = ListenerRegistry::new();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let root = paths.write().await.new_root("client-a");

        let state = state_targeting(root, vec!["counter".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert_eq!(outcome.raw_bytes.unwrap(), b"<result>1</result>");

        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert_eq!(outcome.raw_bytes.unwrap(), b"<result>2</result>");
    }

    #[tokio::test]
    async fn dispatch_delegates_into_a_child_thread_of_the_sender() {
        let dispatcher = Dispatcher::new();
        dispatcher.register_handler("calculator.add", Arc::new(Echo)).await;
        let registry = ListenerRegistry::new();
        let paths = Arc::new(RwLock::new(PathRegistry::new()));
        let root = paths.write().await.new_root("client-a");

        let state = state_targeting(root, vec!["calculator.add".to_string()]);
        let handles = dispatcher.dispatch(&state, &registry, &paths).await;
        let outcome = handles.into_iter().next().unwrap().await.unwrap();
        assert_ne!(outcome.context.thread_id, root);
        assert_eq!(outcome.context.parent_thread_id, Some(root));
    }
}
