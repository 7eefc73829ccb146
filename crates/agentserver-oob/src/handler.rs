// SPDX-License-Identifier: MIT OR Apache-2.0
//! Applies parsed [`crate::command::OobCommand`]s to the registry.
//! Every command holds the registry's write lock for its entire
//! application, so `hot-reload`'s remove-then-register pairs are
//! atomic from any reader's perspective (§4.8).

use crate::command::OobCommand;
use crate::OobError;
use agentserver_registry::ListenerRegistry;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Result of successfully applying a command.
#[derive(Debug, Clone)]
pub enum OobOutcome {
    /// A structural change (add/remove/reload) was applied.
    Applied,
    /// `introspect`'s registered listener names, in sorted order.
    Listeners(Vec<String>),
    /// `shutdown` was accepted; the daemon's main loop should exit.
    ShuttingDown,
}

/// Owns the registry write path for privileged commands, plus the
/// shutdown signal the daemon's bootstrap loop watches.
pub struct OobHandler {
    registry: Arc<RwLock<ListenerRegistry>>,
    shutdown: watch::Sender<bool>,
}

impl OobHandler {
    /// Build a handler over a shared registry. Returns the handler and
    /// the receiving end of the shutdown signal for the daemon to watch.
    #[must_use]
    pub fn new(registry: Arc<RwLock<ListenerRegistry>>) -> (Self, watch::Receiver<bool>) {
        let (shutdown, rx) = watch::channel(false);
        (Self { registry, shutdown }, rx)
    }

    /// Apply one parsed command.
    ///
    /// # Errors
    ///
    /// Returns [`OobError::ApplyFailed`] if `remove-listener` names a
    /// listener that isn't registered, or `add-listener`/`hot-reload`
    /// collide with an existing name or agent root tag.
    pub async fn apply(&self, command: OobCommand) -> Result<OobOutcome, OobError> {
        match command {
            OobCommand::AddListener(spec) => {
                self.registry
                    .write()
                    .await
                    .register(spec.into_record())
                    .map_err(|e| OobError::ApplyFailed(e.to_string()))?;
                Ok(OobOutcome::Applied)
            }
            OobCommand::RemoveListener(cmd) => {
                let removed = self.registry.write().await.remove(&cmd.name);
                if !removed {
                    return Err(OobError::ApplyFailed(format!(
                        "no listener registered for '{}'",
                        cmd.name
                    )));
                }
                Ok(OobOutcome::Applied)
            }
            OobCommand::HotReload(cmd) => {
                let mut registry = self.registry.write().await;
                for spec in cmd.listeners {
                    let record = spec.into_record();
                    registry.remove(&record.name);
                    registry
                        .register(record)
                        .map_err(|e| OobError::ApplyFailed(e.to_string()))?;
                }
                Ok(OobOutcome::Applied)
            }
            OobCommand::Introspect => {
                let registry = self.registry.read().await;
                let names = registry.names().into_iter().map(str::to_string).collect();
                Ok(OobOutcome::Listeners(names))
            }
            OobCommand::Shutdown => {
                tracing::info!(target: "organism.oob", "shutdown command accepted");
                let _ = self.shutdown.send(true);
                Ok(OobOutcome::ShuttingDown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentserver_core::ListenerKind;
    use crate::command::ListenerSpec;

    fn spec(name: &str) -> ListenerSpec {
        ListenerSpec {
            name: name.to_string(),
            root_tag: name.to_string(),
            kind: ListenerKind::Tool,
            description: "test".into(),
            peers: String::new(),
            token_share: None,
        }
    }

    #[tokio::test]
    async fn add_then_introspect_lists_the_new_listener() {
        let registry = Arc::new(RwLock::new(ListenerRegistry::new()));
        let (handler, _rx) = OobHandler::new(registry);
        handler
            .apply(OobCommand::AddListener(spec("calculator.add")))
            .await
            .unwrap();
        let OobOutcome::Listeners(names) = handler.apply(OobCommand::Introspect).await.unwrap()
        else {
            panic!("expected Listeners outcome");
        };
        assert_eq!(names, vec!["calculator.add".to_string()]);
    }

    #[tokio::test]
    async fn removing_an_unregistered_name_fails() {
        let registry = Arc::new(RwLock::new(ListenerRegistry::new()));
        let (handler, _rx) = OobHandler::new(registry);
        let err = handler
            .apply(OobCommand::RemoveListener(crate::command::RemoveListenerCommand {
                name: "ghost".into(),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, OobError::ApplyFailed(_)));
    }

    #[tokio::test]
    async fn shutdown_flips_the_watch_signal() {
        let registry = Arc::new(RwLock::new(ListenerRegistry::new()));
        let (handler, mut rx) = OobHandler::new(registry);
        handler.apply(OobCommand::Shutdown).await.unwrap();
        assert!(*rx.borrow_and_update());
    }
}
