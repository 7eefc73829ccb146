// SPDX-License-Identifier: MIT OR Apache-2.0
//! TOTP (RFC 6238) over HOTP (RFC 4226), for main-bus auth-on-connect
//! (§6). Secret provisioning and enrollment (QR codes, secret
//! generation) are external to this crate — only verification of a
//! presented code against a provisioned secret lives here.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// Default RFC 6238 time step, in seconds.
pub const DEFAULT_STEP_SECONDS: u64 = 30;
/// Default code length.
pub const DEFAULT_DIGITS: u32 = 6;

/// Verifies presented TOTP codes against a shared secret, tolerating
/// clock drift within `window` steps on either side of the current one.
pub struct TotpVerifier {
    secret: Vec<u8>,
    step_seconds: u64,
    digits: u32,
    window: u64,
}

impl TotpVerifier {
    /// A verifier using the RFC 6238 defaults (30s step, 6 digits) and a
    /// one-step drift window.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            step_seconds: DEFAULT_STEP_SECONDS,
            digits: DEFAULT_DIGITS,
            window: 1,
        }
    }

    /// Override the drift window, in steps either side of the current one.
    #[must_use]
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// The HOTP value (RFC 4226 §5.3) for a given counter.
    #[must_use]
    fn hotp(&self, counter: u64) -> u32 {
        let mut mac = HmacSha1::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let truncated = ((u32::from(digest[offset]) & 0x7f) << 24)
            | (u32::from(digest[offset + 1]) << 16)
            | (u32::from(digest[offset + 2]) << 8)
            | u32::from(digest[offset + 3]);

        truncated % 10u32.pow(self.digits)
    }

    /// The TOTP value for `unix_time`.
    #[must_use]
    pub fn code_at(&self, unix_time: u64) -> u32 {
        self.hotp(unix_time / self.step_seconds)
    }

    /// `true` if `code` matches any step within the drift window of
    /// `unix_time`.
    #[must_use]
    pub fn verify(&self, code: u32, unix_time: u64) -> bool {
        let counter = unix_time / self.step_seconds;
        let window = self.window;
        ((counter.saturating_sub(window))..=(counter + window)).any(|c| self.hotp(c) == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 Appendix B reference vector for "12345678901234567890"
    // (ASCII, SHA-1), at T = 59s -> counter 1 -> 94287082 truncated to
    // 8 digits. We check the low 6 digits a 6-digit verifier would see.
    const RFC_SECRET: &[u8] = b"12345678901234567890";

    #[test]
    fn matches_rfc6238_reference_vector() {
        let verifier = TotpVerifier::new(RFC_SECRET).with_window(0);
        assert_eq!(verifier.code_at(59), 287_082);
    }

    #[test]
    fn same_step_round_trips() {
        let verifier = TotpVerifier::new(b"top-secret".to_vec());
        let now = 1_700_000_000u64;
        let code = verifier.code_at(now);
        assert!(verifier.verify(code, now));
    }

    #[test]
    fn one_step_drift_is_tolerated() {
        let verifier = TotpVerifier::new(b"top-secret".to_vec()).with_window(1);
        let now = 1_700_000_000u64;
        let code = verifier.code_at(now);
        assert!(verifier.verify(code, now + DEFAULT_STEP_SECONDS));
        assert!(verifier.verify(code, now - DEFAULT_STEP_SECONDS));
    }

    #[test]
    fn drift_outside_window_is_rejected() {
        let verifier = TotpVerifier::new(b"top-secret".to_vec()).with_window(1);
        let now = 1_700_000_000u64;
        let code = verifier.code_at(now);
        assert!(!verifier.verify(code, now + 5 * DEFAULT_STEP_SECONDS));
    }

    #[test]
    fn wrong_code_is_rejected() {
        let verifier = TotpVerifier::new(b"top-secret".to_vec());
        let now = 1_700_000_000u64;
        let code = verifier.code_at(now);
        assert!(!verifier.verify(code.wrapping_add(1) % 1_000_000, now));
    }
}
