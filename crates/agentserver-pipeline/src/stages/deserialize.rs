// SPDX-License-Identifier: MIT OR Apache-2.0
//! *deserialize* step (§4.2 default step list).
//!
//! Attaches an estimated token cost to the state so the pump's admission
//! check (§4.6 step 2) is O(1) rather than re-measuring the payload on
//! every scheduling decision.

use crate::stage::PipelineStage;
use agentserver_core::MessageState;
use async_trait::async_trait;

/// Rough characters-per-token ratio used for the cheap estimate; the
/// pump treats this as advisory, not authoritative.
const CHARS_PER_TOKEN: u64 = 4;

/// Estimates `state.estimated_tokens` from the canonical payload size.
pub struct DeserializeStage;

#[async_trait]
impl PipelineStage for DeserializeStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let payload_len = state
            .envelope
            .as_ref()
            .map_or(state.raw_bytes.len(), |e| e.payload.raw.len());
        state.estimated_tokens = Some((payload_len as u64 / CHARS_PER_TOKEN).max(1));
        Ok(())
    }

    fn name(&self) -> &str {
        "deserialize"
    }
}
