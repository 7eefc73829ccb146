// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! OOB Channel and Privileged Commands (§4.8): the signed, loopback-bound
//! control plane used to mutate the listener registry and request
//! shutdown, kept structurally separate from the main bus so a
//! privileged shape can never execute by arriving on the wrong port.

pub mod command;
pub mod frame;
pub mod handler;

pub use command::OobCommand;
pub use handler::{OobHandler, OobOutcome};

use agentserver_error::ErrorCode;
use thiserror::Error;

/// Errors raised verifying or applying an OOB command.
#[derive(Debug, Error)]
pub enum OobError {
    /// The frame's signature did not verify against the identity key.
    #[error("oob signature did not verify: {0}")]
    SignatureInvalid(#[from] ed25519_dalek::SignatureError),

    /// The frame was too short, or its envelope/command XML didn't parse.
    #[error("malformed oob frame: {0}")]
    Malformed(String),

    /// The command's root tag is not one of the five privileged shapes.
    #[error("unrecognized privileged command: {0}")]
    UnknownCommand(String),

    /// The command parsed but could not be applied to the registry.
    #[error("could not apply oob command: {0}")]
    ApplyFailed(String),
}

impl OobError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            Self::Malformed(_) | Self::UnknownCommand(_) => ErrorCode::EnvelopeInvalid,
            Self::ApplyFailed(_) => ErrorCode::DuplicateRegistration,
        }
    }
}

/// Verify and parse one OOB frame all the way to a ready-to-apply
/// command.
///
/// # Errors
///
/// See [`frame::verify_frame`] and [`OobCommand::parse`].
pub fn parse_command(
    frame_bytes: &[u8],
    identity: &ed25519_dalek::VerifyingKey,
) -> Result<OobCommand, OobError> {
    let envelope = frame::verify_frame(frame_bytes, identity)?;
    OobCommand::parse(&envelope.payload.root_tag, &envelope.payload.raw)
        .map_err(OobError::Malformed)
}
