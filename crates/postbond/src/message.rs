use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery fee captured whenever a message is resolved, in minor units.
pub const DELIVERY_FEE_CENTS: i64 = 99;

/// Default settlement currency (lowercase ISO code).
pub const DEFAULT_CURRENCY: &str = "usd";

/// Payment lifecycle status of a message. Moves only forward; the four
/// terminal states are permanent historical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Draft,
    Authorizing,
    Authorized,
    Accepted,
    Released,
    Expired,
    Failed,
}

impl MessageStatus {
    /// Terminal states can never be left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Accepted
                | MessageStatus::Released
                | MessageStatus::Expired
                | MessageStatus::Failed
        )
    }

    /// Uppercase form stored in the status column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Draft => "DRAFT",
            MessageStatus::Authorizing => "AUTHORIZING",
            MessageStatus::Authorized => "AUTHORIZED",
            MessageStatus::Accepted => "ACCEPTED",
            MessageStatus::Released => "RELEASED",
            MessageStatus::Expired => "EXPIRED",
            MessageStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(MessageStatus::Draft),
            "AUTHORIZING" => Ok(MessageStatus::Authorizing),
            "AUTHORIZED" => Ok(MessageStatus::Authorized),
            "ACCEPTED" => Ok(MessageStatus::Accepted),
            "RELEASED" => Ok(MessageStatus::Released),
            "EXPIRED" => Ok(MessageStatus::Expired),
            "FAILED" => Ok(MessageStatus::Failed),
            other => Err(format!("unknown message status: {other}")),
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bonded delivery transaction. Mutated only by the transition engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Opaque public identifier (uuid v4), the only id callers ever see.
    pub public_id: String,
    /// Owning escrow account.
    pub account_id: String,
    pub sender_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// Refundable bond, minor units.
    pub bond_cents: i64,
    /// Non-refundable delivery fee, minor units.
    pub fee_cents: i64,
    pub currency: String,
    pub status: MessageStatus,
    /// External hold reference. Set once a hold has been requested, never
    /// cleared afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold_ref: Option<String>,
    /// External capture reference from the resolving capture, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
    /// Set exactly once, when the AUTHORIZED transition commits, as
    /// authorized-time + the account's timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Total amount placed on hold: bond plus delivery fee.
    pub fn total_cents(&self) -> i64 {
        self.bond_cents + self.fee_cents
    }
}

/// A receiver's configuration. Created by account provisioning (external);
/// read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowAccount {
    pub id: String,
    /// Public page handle messages are addressed to.
    pub slug: String,
    pub owner_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub min_bond_cents: i64,
    pub max_bond_cents: i64,
    /// When false the effective maximum bond is the minimum.
    pub allow_boost: bool,
    pub timeout_hours: i64,
    pub created_at: DateTime<Utc>,
}

impl EscrowAccount {
    /// Clamp a sender's requested bond to this account's window. `None`
    /// requests the minimum.
    pub fn clamp_bond(&self, requested_cents: Option<i64>) -> i64 {
        let max = if self.allow_boost {
            self.max_bond_cents
        } else {
            self.min_bond_cents
        };
        requested_cents
            .unwrap_or(self.min_bond_cents)
            .clamp(self.min_bond_cents, max)
    }
}

/// Sender-supplied fields for a new DRAFT message. The intake surface
/// validates and truncates before constructing this.
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub requested_bond_cents: Option<i64>,
}

impl MessageDraft {
    /// Materialize a DRAFT message for `account`, clamping the bond and
    /// minting a fresh public id.
    pub fn into_message(self, account: &EscrowAccount, now: DateTime<Utc>) -> Message {
        Message {
            public_id: uuid::Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            sender_email: self.sender_email,
            sender_name: self.sender_name,
            subject: self.subject,
            body: self.body,
            bond_cents: account.clamp_bond(self.requested_bond_cents),
            fee_cents: DELIVERY_FEE_CENTS,
            currency: DEFAULT_CURRENCY.to_string(),
            status: MessageStatus::Draft,
            hold_ref: None,
            capture_ref: None,
            created_at: now,
            authorized_at: None,
            expires_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(min: i64, max: i64, boost: bool) -> EscrowAccount {
        EscrowAccount {
            id: "acct-1".into(),
            slug: "demo".into(),
            owner_email: "demo@local.test".into(),
            display_name: None,
            min_bond_cents: min,
            max_bond_cents: max,
            allow_boost: boost,
            timeout_hours: 72,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_roundtrips_through_text() {
        for s in [
            MessageStatus::Draft,
            MessageStatus::Authorizing,
            MessageStatus::Authorized,
            MessageStatus::Accepted,
            MessageStatus::Released,
            MessageStatus::Expired,
            MessageStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<MessageStatus>().unwrap(), s);
        }
    }

    #[test]
    fn terminal_set_is_exactly_four() {
        assert!(!MessageStatus::Draft.is_terminal());
        assert!(!MessageStatus::Authorizing.is_terminal());
        assert!(!MessageStatus::Authorized.is_terminal());
        assert!(MessageStatus::Accepted.is_terminal());
        assert!(MessageStatus::Released.is_terminal());
        assert!(MessageStatus::Expired.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn bond_clamps_into_account_window() {
        let a = account(500, 1500, true);
        assert_eq!(a.clamp_bond(None), 500);
        assert_eq!(a.clamp_bond(Some(100)), 500);
        assert_eq!(a.clamp_bond(Some(900)), 900);
        assert_eq!(a.clamp_bond(Some(9000)), 1500);
    }

    #[test]
    fn boost_disabled_pins_bond_to_minimum() {
        let a = account(500, 1500, false);
        assert_eq!(a.clamp_bond(Some(1500)), 500);
    }

    #[test]
    fn draft_gets_fee_and_fresh_public_id() {
        let a = account(500, 1500, true);
        let draft = MessageDraft {
            sender_email: "sender@example.com".into(),
            sender_name: None,
            subject: Some("hello".into()),
            body: "body".into(),
            requested_bond_cents: Some(700),
        };
        let msg = draft.into_message(&a, Utc::now());
        assert_eq!(msg.status, MessageStatus::Draft);
        assert_eq!(msg.fee_cents, DELIVERY_FEE_CENTS);
        assert_eq!(msg.bond_cents, 700);
        assert_eq!(msg.total_cents(), 799);
        assert!(!msg.public_id.is_empty());
        assert!(msg.hold_ref.is_none());
    }
}
