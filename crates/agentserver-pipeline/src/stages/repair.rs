// SPDX-License-Identifier: MIT OR Apache-2.0
//! *repair* and *canonicalize* steps (§4.2 default step list).

use crate::stage::PipelineStage;
use agentserver_core::MessageState;
use agentserver_xml::{canonicalize, repair_parse};
use async_trait::async_trait;

/// Repair-parses `raw_bytes` and overwrites it with the canonical form,
/// so every later step operates on well-formed, canonical XML.
pub struct RepairStage;

#[async_trait]
impl PipelineStage for RepairStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        match repair_parse(&state.raw_bytes) {
            Ok(tree) => {
                state.raw_bytes = canonicalize(&tree);
                Ok(())
            }
            Err(e) => {
                *state = std::mem::take(state).with_diagnostic(format!("repair failed: {e}"));
                Ok(())
            }
        }
    }

    fn name(&self) -> &str {
        "repair"
    }
}

/// Confirms the repaired bytes are already canonical (idempotence
/// check, §8): re-parsing and re-canonicalizing must be a no-op.
pub struct CanonicalizeStage;

#[async_trait]
impl PipelineStage for CanonicalizeStage {
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()> {
        let Ok(tree) = repair_parse(&state.raw_bytes) else {
            *state = std::mem::take(state).with_diagnostic("canonicalize: input is not parseable");
            return Ok(());
        };
        let recanonicalized = canonicalize(&tree);
        if recanonicalized != state.raw_bytes {
            state.raw_bytes = recanonicalized;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "canonicalize"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repair_canonicalizes_well_formed_input() {
        let mut state = MessageState::from_bytes(b"<a><b/></a>".to_vec());
        RepairStage.process(&mut state).await.unwrap();
        assert!(!state.has_failed());
        assert!(state.raw_bytes.windows(4).any(|w| w == b"</b>"));
    }

    #[tokio::test]
    async fn repair_flags_unparseable_input() {
        let mut state = MessageState::from_bytes(Vec::new());
        RepairStage.process(&mut state).await.unwrap();
        assert!(state.has_failed());
    }

    #[tokio::test]
    async fn canonicalize_is_idempotent_after_repair() {
        let mut state = MessageState::from_bytes(b"<a><b/></a>".to_vec());
        RepairStage.process(&mut state).await.unwrap();
        let once = state.raw_bytes.clone();
        CanonicalizeStage.process(&mut state).await.unwrap();
        assert_eq!(state.raw_bytes, once);
    }
}
