// SPDX-License-Identifier: MIT OR Apache-2.0
//! Concrete [`crate::PipelineStage`] implementations for the default
//! step list (§4.2).

mod deserialize;
mod envelope;
mod repair;
mod resolve_routing;
mod system;
mod validate_payload;

pub use deserialize::DeserializeStage;
pub use envelope::{ExtractPayloadStage, ValidateEnvelopeStage};
pub use repair::{CanonicalizeStage, RepairStage};
pub use resolve_routing::ResolveRoutingStage;
pub use system::HuhStage;
pub use validate_payload::ValidatePayloadStage;
