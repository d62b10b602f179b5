//! Webhook signature verification.
//!
//! The provider signs each delivery with a shared secret:
//! `x-webhook-signature: t=<unix-ts>,v1=<hex hmac-sha256("{t}.{raw_body}")>`.
//! Verification hashes the raw, unmodified body and compares in constant
//! time. A stale timestamp is rejected independently of the signature to
//! bound replay exposure.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Allowed clock skew for timestamps from the future, in seconds.
const FUTURE_SKEW_TOLERANCE_SECS: i64 = 60;

/// Outcome of signature verification. The reason is for logging only and
/// never reaches the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Invalid(&'static str),
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid(reason) => reason,
        }
    }
}

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify a raw body against the supplied signature header.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> VerifyOutcome {
        self.verify_at(payload, signature_header, chrono::Utc::now().timestamp())
    }

    /// Verification with an injected clock, for tests.
    pub fn verify_at(&self, payload: &[u8], signature_header: &str, now: i64) -> VerifyOutcome {
        // Header format: t=timestamp,v1=signature
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature_header.split(',') {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let (timestamp_str, sig_v1) = match (timestamp, sig_v1) {
            (Some(t), Some(s)) => (t, s),
            _ => return VerifyOutcome::Invalid("malformed signature header"),
        };

        let timestamp: i64 = match timestamp_str.parse() {
            Ok(t) => t,
            Err(_) => return VerifyOutcome::Invalid("invalid timestamp in signature"),
        };

        // Freshness check is independent of the signature: a valid signature
        // on a stale timestamp is still a replay risk.
        let age = now - timestamp;
        if age > self.tolerance_secs {
            return VerifyOutcome::Invalid("timestamp too old");
        }
        if age < -FUTURE_SKEW_TOLERANCE_SECS {
            return VerifyOutcome::Invalid("timestamp in the future");
        }

        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(m) => m,
            Err(_) => return VerifyOutcome::Invalid("invalid webhook secret"),
        };
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Constant-time comparison to prevent timing attacks. The length
        // check is not constant-time, but signature length is not secret
        // (always 64 hex chars for SHA-256).
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return VerifyOutcome::Invalid("signature mismatch");
        }

        if bool::from(expected_bytes.ct_eq(provided_bytes)) {
            VerifyOutcome::Valid
        } else {
            VerifyOutcome::Invalid("signature mismatch")
        }
    }
}

/// Compute a signature header for a payload. Used by tests and local tooling
/// to produce deliveries the verifier accepts.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
