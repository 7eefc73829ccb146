// SPDX-License-Identifier: MIT OR Apache-2.0
//! *validate-payload* step (§4.2 default step list).
//!
//! Validates the sender's own payload against its registered schema. A
//! listener with no registered schema is treated as unvalidated (schema
//! registration is optional per §6), not as a failure.

use crate::stage::PipelineStage;
use agentserver_core::MessageState;
use agentserver_xml::SchemaStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Validates `state.payload_value` against the schema registered under
/// `sender_name`.
pub struct ValidatePayloadStage {
    schemas: Arc<RwLock<SchemaStore>>,
    sender_name: String,
}

impl ValidatePayloadStage {
    /// Bind this stage to the schema store and the owning listener's
    /// registered name.
    #[must_use]
    pub fn new(schemas: Arc<RwLock<SchemaStore>>, sender_name: impl Into<String>) -> Self {
        Self {
            schemas,
            sender_name: sender_name.into(),
        }
    }
}

#[async_trait]
impl PipelineStage for ValidatePayloadStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let Some(value) = &state.payload_value else {
            *state = std::mem::take(state).with_diagnostic("validate-payload: no payload extracted");
            return Ok(());
        };

        let schemas = self.schemas.read().await;
        match schemas.validate(&self.sender_name, value) {
            Ok(()) => Ok(()),
            Err(e) if matches!(e, agentserver_xml::SchemaError::NotFound { .. }) => Ok(()),
            Err(e) => {
                *state = std::mem::take(state).with_diagnostic(format!("payload rejected: {e}"));
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "validate-payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unregistered_listener_passes_through() {
        let store = Arc::new(RwLock::new(SchemaStore::new(std::env::temp_dir())));
        let stage = ValidatePayloadStage::new(store, "calculator.add");
        let mut state = MessageState::from_bytes(Vec::new());
        state.payload_value = Some(json!({"a": "40"}));
        stage.process(&mut state).await.unwrap();
        assert!(!state.has_failed());
    }

    #[tokio::test]
    async fn invalid_payload_sets_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SchemaStore::new(dir.path());
        store
            .register(
                "calculator.add",
                json!({"type": "object", "properties": {"a": {"type": "number"}}, "required": ["a"]}),
            )
            .unwrap();
        let stage = ValidatePayloadStage::new(Arc::new(RwLock::new(store)), "calculator.add");
        let mut state = MessageState::from_bytes(Vec::new());
        state.payload_value = Some(json!({"a": "forty"}));
        stage.process(&mut state).await.unwrap();
        assert!(state.has_failed());
    }
}
