//! Webhook signature verification and replay-window enforcement.
//!
//! The CRM signs each delivery with its ed25519 private key; the signature
//! arrives base64-encoded in a request header and covers the exact raw
//! payload bytes. Verification must therefore run against the bytes as
//! received, never a re-serialization.
//!
//! Verification fails closed: a malformed header, bad base64, or any other
//! anomaly is an invalid signature, not a crash. This is the only stage of
//! the pipeline permitted to reject a request before acknowledging it.

use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

/// Maximum allowed skew between the sender-claimed timestamp and now.
///
/// Deliveries older (or claiming to be newer) than this are treated as
/// replays. Policy constant inherited from the upstream platform; tune via
/// [`SignatureVerifier::with_replay_window`].
const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;

/// Errors from loading a verification key.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key text was not valid base64.
    #[error("public key is not valid base64")]
    InvalidBase64,

    /// The decoded key was not 32 bytes or not a valid curve point.
    #[error("invalid ed25519 public key")]
    InvalidKey,
}

/// Error from the replay-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Timestamp expired")]
pub struct TimestampExpired;

/// Verifies webhook signatures against the platform's fixed public key.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    key: VerifyingKey,
    replay_window: Duration,
}

impl SignatureVerifier {
    /// Creates a verifier from a 32-byte ed25519 public key.
    pub fn new(key: VerifyingKey) -> Self {
        SignatureVerifier {
            key,
            replay_window: Duration::seconds(DEFAULT_REPLAY_WINDOW_SECS),
        }
    }

    /// Creates a verifier from a base64-encoded public key string.
    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let bytes = Base64
            .decode(text.trim())
            .map_err(|_| KeyError::InvalidBase64)?;
        let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| KeyError::InvalidKey)?;
        let key = VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(Self::new(key))
    }

    /// Overrides the replay window (default 5 minutes).
    pub fn with_replay_window(mut self, window: Duration) -> Self {
        self.replay_window = window;
        self
    }

    /// Verifies a base64 signature header over the raw payload bytes.
    ///
    /// Returns `false` for any malformed input. Never panics.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> bool {
        let sig_bytes = match Base64.decode(signature_header.trim()) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let signature = match Signature::from_slice(&sig_bytes) {
            Ok(s) => s,
            Err(_) => return false,
        };
        self.key.verify_strict(payload, &signature).is_ok()
    }

    /// Rejects sender-claimed timestamps outside the replay window.
    ///
    /// Callers invoke this only when a timestamp is present; deliveries
    /// without one skip the check.
    pub fn check_timestamp(
        &self,
        claimed: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), TimestampExpired> {
        let skew = (now - claimed).abs();
        if skew > self.replay_window {
            return Err(TimestampExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, SignatureVerifier) {
        let signing = SigningKey::generate(&mut OsRng);
        let verifier = SignatureVerifier::new(signing.verifying_key());
        (signing, verifier)
    }

    fn sign_header(signing: &SigningKey, payload: &[u8]) -> String {
        Base64.encode(signing.sign(payload).to_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let (signing, verifier) = keypair();
        let payload = br#"{"type":"ContactCreate"}"#;
        let header = sign_header(&signing, payload);
        assert!(verifier.verify(payload, &header));
    }

    #[test]
    fn modified_payload_fails() {
        let (signing, verifier) = keypair();
        let header = sign_header(&signing, b"original");
        assert!(!verifier.verify(b"tampered", &header));
    }

    #[test]
    fn wrong_key_fails() {
        let (signing, _) = keypair();
        let (_, other_verifier) = keypair();
        let payload = b"payload";
        let header = sign_header(&signing, payload);
        assert!(!other_verifier.verify(payload, &header));
    }

    #[test]
    fn malformed_header_fails_closed() {
        let (_, verifier) = keypair();
        assert!(!verifier.verify(b"payload", ""));
        assert!(!verifier.verify(b"payload", "not base64 !!!"));
        assert!(!verifier.verify(b"payload", "aGVsbG8=")); // wrong length
    }

    #[test]
    fn from_base64_roundtrip() {
        let signing = SigningKey::generate(&mut OsRng);
        let encoded = Base64.encode(signing.verifying_key().as_bytes());
        let verifier = SignatureVerifier::from_base64(&encoded).unwrap();
        let payload = b"abc";
        let header = sign_header(&signing, payload);
        assert!(verifier.verify(payload, &header));
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(matches!(
            SignatureVerifier::from_base64("@@@"),
            Err(KeyError::InvalidBase64)
        ));
        assert!(matches!(
            SignatureVerifier::from_base64("aGVsbG8="),
            Err(KeyError::InvalidKey)
        ));
    }

    #[test]
    fn fresh_timestamp_accepted() {
        let (_, verifier) = keypair();
        let now = Utc::now();
        assert!(verifier.check_timestamp(now - Duration::seconds(30), now).is_ok());
    }

    #[test]
    fn ten_minute_old_timestamp_rejected() {
        let (_, verifier) = keypair();
        let now = Utc::now();
        let err = verifier
            .check_timestamp(now - Duration::minutes(10), now)
            .unwrap_err();
        assert_eq!(err.to_string(), "Timestamp expired");
    }

    #[test]
    fn future_timestamp_beyond_window_rejected() {
        let (_, verifier) = keypair();
        let now = Utc::now();
        assert!(verifier
            .check_timestamp(now + Duration::minutes(6), now)
            .is_err());
    }

    #[test]
    fn boundary_timestamp_accepted() {
        let (_, verifier) = keypair();
        let now = Utc::now();
        assert!(verifier
            .check_timestamp(now - Duration::seconds(300), now)
            .is_ok());
    }

    proptest! {
        /// Sign-then-verify always succeeds for arbitrary payloads.
        #[test]
        fn prop_sign_verify_roundtrip(payload: Vec<u8>) {
            let (signing, verifier) = keypair();
            let header = sign_header(&signing, &payload);
            prop_assert!(verifier.verify(&payload, &header));
        }

        /// Arbitrary header text never panics the verifier.
        #[test]
        fn prop_malformed_header_no_panic(header: String, payload: Vec<u8>) {
            let (_, verifier) = keypair();
            let _ = verifier.verify(&payload, &header);
        }

        /// Skew within the window is accepted, beyond it rejected.
        #[test]
        fn prop_replay_window_is_symmetric(skew_secs in -900i64..900) {
            let (_, verifier) = keypair();
            let now = Utc::now();
            let claimed = now + Duration::seconds(skew_secs);
            let ok = verifier.check_timestamp(claimed, now).is_ok();
            prop_assert_eq!(ok, skew_secs.abs() <= 300);
        }
    }
}
