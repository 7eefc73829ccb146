// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy shared across the message plane.
//!
//! Every fallible boundary in the crate graph returns a typed error that
//! maps to an [`ErrorCode`], so diagnostics, `<huh>` payloads, and
//! [`SecurityEvent`] logs all speak the same vocabulary (§7.1 of the
//! design doc).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad family an [`ErrorCode`] belongs to, mirroring the propagation
/// policy table (validation / routing / handler / throttle / fatal /
/// security / bootstrap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Envelope or payload schema validation failure.
    Validation,
    /// Unknown target, peer-safety violation, or resolution failure.
    Routing,
    /// Handler returned no value, a malformed value, or panicked.
    Handler,
    /// Backend rate-limit signal, absorbed by congestion control.
    Throttle,
    /// Backend failure that cannot be retried.
    BackendFatal,
    /// Privileged payload on the main bus, or OOB signature failure.
    Security,
    /// Configuration, identity key, or TLS failure at startup.
    Bootstrap,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Routing => "routing",
            Self::Handler => "handler",
            Self::Throttle => "throttle",
            Self::BackendFatal => "backend_fatal",
            Self::Security => "security",
            Self::Bootstrap => "bootstrap",
        };
        f.write_str(s)
    }
}

/// Machine-readable, stable error code. Serialises as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Envelope failed schema validation.
    EnvelopeInvalid,
    /// Payload failed schema validation.
    PayloadInvalid,
    /// Repair/canonicalization could not reconstruct a tree at all.
    XmlUnparseable,
    /// Envelope named an explicit target with no registered listener.
    UnknownTarget,
    /// Sender's root tag is not in its declared peer set.
    PeerViolation,
    /// Root tag has no registered listener.
    UnknownCapability,
    /// Handler returned no bytes, or bytes that failed post-processing.
    HandlerFailed,
    /// Backend signalled a rate limit; absorbed by AIMD.
    BackendThrottled,
    /// Backend failed in a way that cannot be retried.
    BackendFatal,
    /// A privileged command shape arrived on the main bus.
    PrivilegedLeak,
    /// OOB command's signature did not verify against the identity key.
    SignatureInvalid,
    /// Caller's privilege level does not satisfy an operation's gate.
    PrivilegeDenied,
    /// Listener name or agent root tag already registered.
    DuplicateRegistration,
    /// Configuration file or value is invalid.
    ConfigInvalid,
    /// TLS or identity-key setup failed at bootstrap.
    TlsSetupFailed,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EnvelopeInvalid | Self::PayloadInvalid | Self::XmlUnparseable => {
                ErrorCategory::Validation
            }
            Self::UnknownTarget | Self::PeerViolation | Self::UnknownCapability => {
                ErrorCategory::Routing
            }
            Self::HandlerFailed => ErrorCategory::Handler,
            Self::BackendThrottled => ErrorCategory::Throttle,
            Self::BackendFatal => ErrorCategory::BackendFatal,
            Self::PrivilegedLeak | Self::SignatureInvalid | Self::PrivilegeDenied => {
                ErrorCategory::Security
            }
            Self::DuplicateRegistration | Self::ConfigInvalid | Self::TlsSetupFailed => {
                ErrorCategory::Bootstrap
            }
            Self::Internal => ErrorCategory::Bootstrap,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A structured record of a dropped security event (§4.8, §7): a
/// privileged payload on the main bus, or an OOB signature failure.
/// Logged via `tracing` and never propagated to any handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Which code triggered this event.
    pub code: ErrorCode,
    /// Human-readable detail (never includes raw secret material).
    pub detail: String,
    /// Opaque thread identifier involved, if any.
    pub thread_id: Option<String>,
}

impl SecurityEvent {
    /// Construct and immediately emit a `tracing::warn!` for this event.
    pub fn log(code: ErrorCode, detail: impl Into<String>, thread_id: Option<String>) -> Self {
        let event = Self {
            code,
            detail: detail.into(),
            thread_id,
        };
        tracing::warn!(
            target: "agentserver.security",
            code = %event.code,
            thread_id = ?event.thread_id,
            "{}",
            event.detail
        );
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mapping_is_stable() {
        assert_eq!(ErrorCode::EnvelopeInvalid.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::PeerViolation.category(), ErrorCategory::Routing);
        assert_eq!(ErrorCode::SignatureInvalid.category(), ErrorCategory::Security);
        assert_eq!(ErrorCode::ConfigInvalid.category(), ErrorCategory::Bootstrap);
    }

    #[test]
    fn security_event_carries_code_and_thread() {
        let event = SecurityEvent::log(
            ErrorCode::PrivilegedLeak,
            "add-listener on main bus",
            Some("t1".to_string()),
        );
        assert_eq!(event.code, ErrorCode::PrivilegedLeak);
        assert_eq!(event.thread_id.as_deref(), Some("t1"));
    }
}
