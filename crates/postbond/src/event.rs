//! Provider webhook events: signature verification and envelope parsing.
//!
//! The provider signs each delivery with `t=<unix>,v1=<hex hmac>` over
//! `"{t}.{body}"`. Verification is the only authentication the webhook
//! surface has, so it happens against the raw body bytes before anything
//! is parsed, and timestamps outside the tolerance window are rejected to
//! blunt replay of captured deliveries.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted skew between the signature timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Metadata key carrying the message public id on every hold the engine
/// creates.
pub const METADATA_PUBLIC_ID: &str = "message_public_id";

pub const EVENT_HOLD_CONFIRMED: &str = "hold.confirmed";
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";
pub const EVENT_HOLD_CANCELED: &str = "hold.canceled";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unparseable event payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event {kind} carries no message_public_id metadata")]
    MissingPublicId { kind: String },
}

/// A provider event the ingestor acts on. Anything outside the allow-list
/// parses to `Ignored` so new provider event kinds never break ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The sender completed checkout; funds are held.
    HoldConfirmed {
        public_id: String,
        hold_ref: String,
        occurred_at: DateTime<Utc>,
    },
    /// The payment attempt failed; no funds are held.
    PaymentFailed { public_id: String, hold_ref: String },
    /// The hold was canceled provider-side (manual refund, dispute).
    HoldCanceled { public_id: String, hold_ref: String },
    Ignored { kind: String },
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(rename = "type")]
    kind: String,
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Build a signature header for `body` at `timestamp`. The counterpart of
/// [`verify_signature`]; used by the event simulator and tests.
pub fn sign_event(secret: &[u8], timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a `t=...,v1=...` header against the raw body.
///
/// Multiple `v1` entries are accepted (the provider sends several during
/// secret rotation); any one matching passes. Comparison is constant-time,
/// and unparseable hex compares against zeros rather than short-circuiting.
pub fn verify_signature(
    secret: &[u8],
    header: &str,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => candidates.push(value),
            _ => {}
        }
    }
    let t = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - t).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(t.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    for candidate in candidates {
        let given = hex::decode(candidate).unwrap_or_else(|_| vec![0u8; 32]);
        if mac.clone().verify_slice(&given).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

/// Parse a verified body into a [`ProviderEvent`].
pub fn parse_event(body: &[u8]) -> Result<ProviderEvent, EventError> {
    let envelope: EventEnvelope = serde_json::from_slice(body)?;
    let kind = envelope.kind;
    if !matches!(
        kind.as_str(),
        EVENT_HOLD_CONFIRMED | EVENT_PAYMENT_FAILED | EVENT_HOLD_CANCELED
    ) {
        return Ok(ProviderEvent::Ignored { kind });
    }

    let object = envelope.data.object;
    let public_id = object
        .metadata
        .get(METADATA_PUBLIC_ID)
        .cloned()
        .ok_or_else(|| EventError::MissingPublicId { kind: kind.clone() })?;

    Ok(match kind.as_str() {
        EVENT_HOLD_CONFIRMED => ProviderEvent::HoldConfirmed {
            public_id,
            hold_ref: object.id,
            occurred_at: DateTime::from_timestamp(envelope.created, 0)
                .unwrap_or_else(Utc::now),
        },
        EVENT_PAYMENT_FAILED => ProviderEvent::PaymentFailed {
            public_id,
            hold_ref: object.id,
        },
        _ => ProviderEvent::HoldCanceled {
            public_id,
            hold_ref: object.id,
        },
    })
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"whsec_test";

    fn confirmed_body(public_id: &str, created: i64) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": "evt_1",
            "type": EVENT_HOLD_CONFIRMED,
            "created": created,
            "data": { "object": {
                "id": "hold_1",
                "metadata": { METADATA_PUBLIC_ID: public_id },
            }},
        }))
        .unwrap()
    }

    #[test]
    fn signature_roundtrip() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = sign_event(SECRET, 1_700_000_000, &body);
        assert_eq!(
            verify_signature(SECRET, &header, &body, 1_700_000_000),
            Ok(())
        );
    }

    #[test]
    fn skew_within_tolerance_passes() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = sign_event(SECRET, 1_700_000_000, &body);
        assert_eq!(
            verify_signature(SECRET, &header, &body, 1_700_000_000 + SIGNATURE_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn stale_timestamp_rejected() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = sign_event(SECRET, 1_700_000_000, &body);
        assert_eq!(
            verify_signature(SECRET, &header, &body, 1_700_000_000 + 301),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn tampered_body_rejected() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = sign_event(SECRET, 1_700_000_000, &body);
        let tampered = confirmed_body("m-2", 1_700_000_000);
        assert_eq!(
            verify_signature(SECRET, &header, &tampered, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_rejected() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = sign_event(b"whsec_other", 1_700_000_000, &body);
        assert_eq!(
            verify_signature(SECRET, &header, &body, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn malformed_headers_rejected() {
        let body = confirmed_body("m-1", 1_700_000_000);
        for header in ["", "v1=abcd", "t=1700000000", "t=soon,v1=abcd", "garbage"] {
            assert_eq!(
                verify_signature(SECRET, header, &body, 1_700_000_000),
                Err(SignatureError::Malformed),
                "header {header:?} must be malformed"
            );
        }
    }

    #[test]
    fn invalid_hex_signature_rejected_not_panicking() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let header = "t=1700000000,v1=zz-not-hex";
        assert_eq!(
            verify_signature(SECRET, header, &body, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn any_of_multiple_v1_entries_passes() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let good = sign_event(SECRET, 1_700_000_000, &body);
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={good_sig}", "00".repeat(32));
        assert_eq!(
            verify_signature(SECRET, &header, &body, 1_700_000_000),
            Ok(())
        );
    }

    #[test]
    fn hold_confirmed_parses() {
        let body = confirmed_body("m-1", 1_700_000_000);
        let event = parse_event(&body).unwrap();
        match event {
            ProviderEvent::HoldConfirmed {
                public_id,
                hold_ref,
                occurred_at,
            } => {
                assert_eq!(public_id, "m-1");
                assert_eq!(hold_ref, "hold_1");
                assert_eq!(occurred_at.timestamp(), 1_700_000_000);
            }
            other => panic!("expected HoldConfirmed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_kinds_are_ignored_not_errors() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": "charge.refund.updated",
            "created": 1_700_000_000,
            "data": { "object": { "id": "re_1" } },
        }))
        .unwrap();
        assert_eq!(
            parse_event(&body).unwrap(),
            ProviderEvent::Ignored {
                kind: "charge.refund.updated".into()
            }
        );
    }

    #[test]
    fn handled_kind_without_metadata_is_an_error() {
        let body = serde_json::to_vec(&serde_json::json!({
            "type": EVENT_PAYMENT_FAILED,
            "created": 1_700_000_000,
            "data": { "object": { "id": "hold_1" } },
        }))
        .unwrap();
        assert!(matches!(
            parse_event(&body),
            Err(EventError::MissingPublicId { .. })
        ));
    }

    #[test]
    fn garbage_body_is_a_json_error() {
        assert!(matches!(
            parse_event(b"not json"),
            Err(EventError::Json(_))
        ));
    }
}
