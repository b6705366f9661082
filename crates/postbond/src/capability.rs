//! Time-boxed capability tokens authorizing unauthenticated receiver actions.
//!
//! A token is a keyed digest over `"{public_id}.{exp_unix}"` — nothing is
//! stored and nothing can be revoked before its expiry. The message's own
//! status guard in the engine independently stops actions on resolved
//! messages regardless of token validity.

use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::security::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

/// Signs and checks review-link capability tokens with a process-wide
/// secret established at startup.
#[derive(Clone)]
pub struct CapabilitySigner {
    secret: Vec<u8>,
}

impl CapabilitySigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// HMAC-SHA256 over `"{public_id}.{exp_unix}"`, base64url (no padding).
    pub fn sign(&self, public_id: &str, exp_unix: i64) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(public_id.as_bytes());
        mac.update(b".");
        mac.update(exp_unix.to_string().as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    /// `true` only while `now <= exp_unix` and the signature matches.
    ///
    /// The comparison is constant-time and length-independent, so neither
    /// content nor length of a forged signature leaks through timing.
    pub fn verify(&self, public_id: &str, exp_unix: i64, signature: &str) -> bool {
        let now = Utc::now().timestamp();
        if exp_unix < now {
            return false;
        }
        let expected = self.sign(public_id, exp_unix);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }

    /// Signed review link: `<base>/review/{public_id}?e={exp}&s={sig}`.
    pub fn review_url(&self, base: &str, public_id: &str, exp_unix: i64) -> String {
        let sig = self.sign(public_id, exp_unix);
        format!(
            "{}/review/{public_id}?e={exp_unix}&s={sig}",
            base.trim_end_matches('/')
        )
    }
}
