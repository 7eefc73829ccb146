// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! agentserver-xml
//!
//! Repair & Canonicalization and the Envelope & Schema Store (§2 items 1
//! and 2). This is the one crate in the workspace with no teacher
//! precedent for its core dependency: nothing in the retrieved corpus
//! touches XML, so [`quick_xml`] is introduced here and nowhere else
//! leaks it — every other crate talks in terms of [`tree::XmlNode`] or
//! `agentserver_core::Envelope`.

pub mod canonical;
pub mod envelope;
pub mod repair;
pub mod schema;
pub mod tree;

pub use canonical::canonicalize;
pub use repair::{repair_parse, RepairError};
pub use schema::{CompiledSchema, SchemaError, SchemaStore};
pub use tree::XmlNode;
