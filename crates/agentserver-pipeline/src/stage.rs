// SPDX-License-Identifier: MIT OR Apache-2.0
//! The [`PipelineStage`] trait and the ordered [`Pipeline`] runner.
//!
//! Stages run in insertion order; any stage that returns `Err`, or that
//! sets [`agentserver_core::MessageState::diagnostic`] directly, halts
//! the remaining stages (§4.2).

use agentserver_core::MessageState;
use async_trait::async_trait;
use tracing::debug;

/// A single processing step applied to a [`MessageState`] in a listener's
/// pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Process (and optionally mutate) the state.
    ///
    /// A step that detects a fatal problem should record it via
    /// [`MessageState::with_diagnostic`] rather than returning `Err`,
    /// which is reserved for unexpected internal failures (e.g. I/O)
    /// that [`Pipeline::execute`] converts into a diagnostic anyway.
    async fn process(&self, state: &mut MessageState) -> anyhow::Result<()>;

    /// Human-readable name used in tracing output.
    fn name(&self) -> &str;
}

/// An ordered chain of [`PipelineStage`]s executed sequentially against
/// one [`MessageState`].
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    /// Create an empty pipeline with no stages.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage to the pipeline (builder pattern).
    #[must_use]
    pub fn stage<S: PipelineStage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Run every stage against `state` in order. Stops at the first
    /// stage that leaves `state.has_failed()` true, whether because the
    /// stage set a diagnostic itself or because it returned `Err`.
    pub async fn execute(&self, state: &mut MessageState) {
        for stage in &self.stages {
            debug!(target: "agentserver.pipeline", stage = stage.name(), "executing");
            if let Err(e) = stage.process(state).await {
                state.diagnostic = Some(e.to_string());
            }
            if state.has_failed() {
                break;
            }
        }
    }

    /// Number of stages in the pipeline.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// `true` if the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
