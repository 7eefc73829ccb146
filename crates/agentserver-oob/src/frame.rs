// SPDX-License-Identifier: MIT OR Apache-2.0
//! OOB wire framing: every frame is a 64-byte Ed25519 signature
//! followed by the canonical envelope XML bytes the signature covers.
//! Chosen because the fixed envelope shape has no signature field of
//! its own (§3, §4.8) and OOB traffic is low-volume enough that a
//! length-prefix-free fixed header costs nothing.

use agentserver_core::Envelope;
use agentserver_xml::{envelope::tree_to_envelope, repair_parse};
use ed25519_dalek::{Signature, VerifyingKey, SIGNATURE_LENGTH};

use crate::OobError;

/// Split, verify, and parse one OOB frame into its envelope.
///
/// # Errors
///
/// Returns [`OobError::Malformed`] if the frame is too short or the
/// envelope doesn't parse, [`OobError::SignatureInvalid`] if the
/// signature does not verify against `identity`.
pub fn verify_frame(frame: &[u8], identity: &VerifyingKey) -> Result<Envelope, OobError> {
    if frame.len() <= SIGNATURE_LENGTH {
        return Err(OobError::Malformed("frame shorter than signature".into()));
    }
    let (sig_bytes, body) = frame.split_at(SIGNATURE_LENGTH);
    let sig_array: [u8; SIGNATURE_LENGTH] = sig_bytes
        .try_into()
        .map_err(|_| OobError::Malformed("signature slice wrong length".into()))?;
    let signature = Signature::from_bytes(&sig_array);

    agentserver_auth::verify_signature(identity, body, &signature)?;

    let tree =
        repair_parse(body).map_err(|e| OobError::Malformed(format!("unparseable frame: {e}")))?;
    tree_to_envelope(&tree).map_err(|e| OobError::Malformed(format!("invalid envelope: {e}")))
}
