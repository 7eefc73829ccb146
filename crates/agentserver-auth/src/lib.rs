// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! TOTP verification and Ed25519 signing/verification: the two
//! authentication primitives used at the main-bus connect handshake and
//! the OOB channel (§4.8, §6).

pub mod signing;
pub mod totp;

use agentserver_error::ErrorCode;
use thiserror::Error;

pub use signing::{generate_identity, sign, verify as verify_signature};
pub use totp::TotpVerifier;

/// Errors raised by either authentication primitive. Both map to
/// [`ErrorCode::SignatureInvalid`] — from the security-event
/// perspective a bad TOTP code and a forged OOB signature are the same
/// kind of failed handshake.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The presented TOTP code did not match any step in the drift window.
    #[error("totp code did not verify")]
    TotpInvalid,

    /// The Ed25519 signature did not verify against the identity key.
    #[error("signature did not verify: {0}")]
    SignatureInvalid(#[from] ed25519_dalek::SignatureError),
}

impl AuthError {
    /// Map to the shared error taxonomy.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::SignatureInvalid
    }
}
