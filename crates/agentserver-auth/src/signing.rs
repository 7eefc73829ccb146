// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ed25519 signing and verification for OOB commands (§4.8, §6): every
//! privileged command is signed against the organism's long-term
//! identity key before the OOB handler applies it.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Generate a fresh identity keypair. Key storage/rotation policy is an
/// external concern; this crate only signs and verifies with whatever
/// keypair it is handed.
#[must_use]
pub fn generate_identity() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Sign `message` (the canonicalized OOB command bytes) with the
/// organism's identity key.
#[must_use]
pub fn sign(identity: &SigningKey, message: &[u8]) -> Signature {
    identity.sign(message)
}

/// Verify `signature` over `message` against `public_key`.
///
/// # Errors
///
/// Returns [`ed25519_dalek::SignatureError`] if the signature does not
/// verify.
pub fn verify(
    public_key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<(), ed25519_dalek::SignatureError> {
    public_key.verify(message, signature)
}
