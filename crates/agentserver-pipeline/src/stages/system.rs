// SPDX-License-Identifier: MIT OR Apache-2.0
//! Terminal step for the system pipeline (§4.2): composes the standard
//! `<huh>` diagnostic payload whenever an earlier step (or the system
//! pipeline's own caller) has already recorded a diagnostic.
//!
//! The system pipeline also carries `<thread-spawned>` and
//! `<system-thread-error>` shapes, but those are built directly by the
//! path registry/dispatcher call sites that know the thread id in
//! question; this stage only owns the generic failure-to-`<huh>` path.

use crate::stage::PipelineStage;
use agentserver_core::MessageState;
use agentserver_xml::{canonicalize, envelope::huh};
use async_trait::async_trait;

/// Rewrites `state.raw_bytes` into a canonical `<huh>` payload carrying
/// the recorded diagnostic, if any. Leaves the state untouched if no
/// diagnostic was ever set (a no-op terminal step for a message that
/// reached the system pipeline for a reason other than failure, e.g. a
/// boot message).
pub struct HuhStage;

#[async_trait]
impl PipelineStage for HuhStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        if let Some(diagnostic) = state.diagnostic.clone() {
            state.raw_bytes = canonicalize(&huh(&diagnostic));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "huh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_huh_payload_from_diagnostic() {
        let mut state = MessageState::from_bytes(Vec::new()).with_diagnostic("bad envelope");
        HuhStage.process(&mut state).await.unwrap();
        assert!(String::from_utf8_lossy(&state.raw_bytes).contains("bad envelope"));
        assert!(String::from_utf8_lossy(&state.raw_bytes).contains("<huh>"));
    }

    #[tokio::test]
    async fn leaves_healthy_state_untouched() {
        let mut state = MessageState::from_bytes(b"<boot/>".to_vec());
        HuhStage.process(&mut state).await.unwrap();
        assert_eq!(state.raw_bytes, b"<boot/>");
    }
}
