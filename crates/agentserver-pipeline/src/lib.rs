// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Per-Listener Pipeline (§4.2): the ordered async step chain every
//! listener's outgoing message passes through before routing, plus the
//! permanent system pipeline used for diagnostics and boot messages.

mod convert;
mod stage;
pub mod stages;

pub use stage::{Pipeline, PipelineStage};

use agentserver_core::ListenerRecord;
use agentserver_registry::ListenerRegistry;
use agentserver_xml::SchemaStore;
use stages::{
    CanonicalizeStage, DeserializeStage, ExtractPayloadStage, RepairStage, ResolveRoutingStage,
    ValidateEnvelopeStage, ValidatePayloadStage,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Build the default per-listener pipeline: repair, canonicalize,
/// validate-envelope, extract-payload, validate-payload, deserialize,
/// resolve-routing, in that order.
#[must_use]
pub fn default_pipeline(
    sender: ListenerRecord,
    registry: Arc<RwLock<ListenerRegistry>>,
    schemas: Arc<RwLock<SchemaStore>>,
) -> Pipeline {
    let sender_name = sender.name.clone();
    Pipeline::new()
        .stage(RepairStage)
        .stage(CanonicalizeStage)
        .stage(ValidateEnvelopeStage)
        .stage(ExtractPayloadStage)
        .stage(ValidatePayloadStage::new(schemas, sender_name))
        .stage(DeserializeStage)
        .stage(ResolveRoutingStage::new(registry, sender))
}

/// Build the permanent system pipeline: identical default shape but
/// without payload-schema validation (§4.2). Unlike
/// [`default_pipeline`], a diagnostic raised partway through does not
/// mean the message is discarded — [`run_system_pipeline`] always
/// finishes by composing a `<huh>` from whatever diagnostic, if any,
/// ended up recorded.
#[must_use]
pub fn system_pipeline(
    sender: ListenerRecord,
    registry: Arc<RwLock<ListenerRegistry>>,
) -> Pipeline {
    Pipeline::new()
        .stage(RepairStage)
        .stage(CanonicalizeStage)
        .stage(ValidateEnvelopeStage)
        .stage(ExtractPayloadStage)
        .stage(DeserializeStage)
        .stage(ResolveRoutingStage::new(registry, sender))
}

/// Run the system pipeline against `state`, then unconditionally compose
/// the terminal `<huh>` payload if a diagnostic is present. The early
/// stages still halt each other on first failure (via
/// [`Pipeline::execute`]); this wrapper is what guarantees the `<huh>`
/// composer itself always gets a chance to run.
pub async fn run_system_pipeline(pipeline: &Pipeline, state: &mut agentserver_core::MessageState) {
    pipeline.execute(state).await;
    let _ = PipelineStage::process(&stages::HuhStage, state).await;
}
