// SPDX-License-Identifier: MIT OR Apache-2.0
//! *validate-envelope* and *extract-payload* steps (§4.2 default step list).

use crate::convert::node_to_json;
use crate::stage::PipelineStage;
use agentserver_core::MessageState;
use agentserver_xml::{repair_parse, envelope::tree_to_envelope};
use async_trait::async_trait;

/// Parses `raw_bytes` into a typed [`agentserver_core::Envelope`],
/// populating `state.envelope` and `state.thread_id`/`state.sender`.
pub struct ValidateEnvelopeStage;

#[async_trait]
impl PipelineStage for ValidateEnvelopeStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let tree = match repair_parse(&state.raw_bytes) {
            Ok(tree) => tree,
            Err(e) => {
                *state = std::mem::take(state).with_diagnostic(format!("envelope unparseable: {e}"));
                return Ok(());
            }
        };
        match tree_to_envelope(&tree) {
            Ok(envelope) => {
                state.thread_id = Some(envelope.thread);
                state.sender = Some(envelope.from.clone());
                state.envelope = Some(envelope);
                Ok(())
            }
            Err(e) => {
                *state = std::mem::take(state).with_diagnostic(format!("invalid envelope: {e}"));
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "validate-envelope"
    }
}

/// Extracts the envelope's payload XML fragment into a generic JSON
/// value for schema validation, populating `state.payload_value`.
pub struct ExtractPayloadStage;

#[async_trait]
impl PipelineStage for ExtractPayloadStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let Some(envelope) = &state.envelope else {
            *state = std::mem::take(state).with_diagnostic("extract-payload: no envelope parsed");
            return Ok(());
        };
        let Ok(tree) = repair_parse(envelope.payload.raw.as_bytes()) else {
            *state = std::mem::take(state).with_diagnostic("extract-payload: payload unparseable");
            return Ok(());
        };
        state.payload_value = Some(node_to_json(&tree));
        Ok(())
    }

    fn name(&self) -> &str {
        "extract-payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> MessageState {
        MessageState::from_bytes(
            format!(
                r#"<message xmlns="https://xml-pipeline.org/ns/envelope/v1">
                    <from>researcher</from>
                    <thread>3fa85f64-5717-4562-b3fc-2c963f66afa6</thread>
                    {body}
                </message>"#
            )
            .into_bytes(),
        )
    }

    #[tokio::test]
    async fn validate_envelope_populates_sender_and_thread() {
        let mut state = message("<add><a>40</a><b>2</b></add>");
        ValidateEnvelopeStage.process(&mut state).await.unwrap();
        assert!(!state.has_failed());
        assert_eq!(state.sender.as_deref(), Some("researcher"));
        assert!(state.thread_id.is_some());
    }

    #[tokio::test]
    async fn missing_thread_sets_diagnostic() {
        let mut state = MessageState::from_bytes(
            b"<message><from>researcher</from><add><a>1</a></add></message>".to_vec(),
        );
        ValidateEnvelopeStage.process(&mut state).await.unwrap();
        assert!(state.has_failed());
    }

    #[tokio::test]
    async fn extract_payload_builds_json_value() {
        let mut state = message("<add><a>40</a><b>2</b></add>");
        ValidateEnvelopeStage.process(&mut state).await.unwrap();
        ExtractPayloadStage.process(&mut state).await.unwrap();
        assert!(!state.has_failed());
        let value = state.payload_value.unwrap();
        assert_eq!(value["a"], serde_json::json!("40"));
    }
}
