//! Contract over the external payment-hold provider.
//!
//! The provider owns hold/capture semantics; this module only defines what
//! the engine consumes: create a hold, read its authoritative state, capture
//! it in full or in part (the provider releases the remainder of a partial
//! capture on its own). Local message status is a cache — the engine asks
//! `hold_status` immediately before every capture, never trusting an earlier
//! read.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

/// Authoritative provider-side state of a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Funds are held and may be captured in full or in part.
    Capturable,
    /// A capture completed; any uncaptured remainder was released.
    Succeeded,
    Canceled,
    /// No funds held: payment failed or the hold was never confirmed.
    Failed,
}

/// Snapshot returned by [`AuthorizationGateway::hold_status`].
///
/// `amount_received_cents` is what the provider actually captured so far.
/// It lets a reader that finds `Succeeded` tell a full capture (Accept won)
/// from a fee-only partial capture (Release or sweep won).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldState {
    pub status: HoldStatus,
    pub amount_received_cents: i64,
}

/// Parameters for creating a hold.
#[derive(Debug, Clone)]
pub struct CreateHold {
    /// Bond plus fee, minor units.
    pub amount_cents: i64,
    pub currency: String,
    /// Message public id; makes retried creation return the same hold
    /// instead of double-holding.
    pub idempotency_key: String,
    /// Message public id again, carried in hold metadata so webhook events
    /// can be correlated back.
    pub public_id: String,
    pub description: String,
}

/// A created hold: the reference the store persists, plus the provider's
/// client secret for the external checkout form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldHandle {
    pub hold_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient transport or provider failure. Callers abort and leave
    /// local state untouched for a later retry.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// The hold is not capturable (already captured, canceled, or failed).
    /// Carries the provider state so callers can reconcile.
    #[error("hold not capturable (provider status {:?})", .0.status)]
    HoldConflict(HoldState),

    /// The provider answered with something this adapter cannot interpret.
    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

/// The hold/capture capability the engine consumes.
pub trait AuthorizationGateway: Send + Sync {
    /// Create a hold for `req.amount_cents`. Retrying with the same
    /// idempotency key must return the same hold.
    fn create_hold(
        &self,
        req: &CreateHold,
    ) -> impl Future<Output = Result<HoldHandle, GatewayError>> + Send;

    /// Authoritative state of a hold.
    fn hold_status(
        &self,
        hold_ref: &str,
    ) -> impl Future<Output = Result<HoldState, GatewayError>> + Send;

    /// Capture the hold. `None` captures in full; `Some(amount)` captures
    /// that amount and the provider releases the remainder. Exactly one
    /// concurrent capture wins; losers get [`GatewayError::HoldConflict`].
    fn capture(
        &self,
        hold_ref: &str,
        amount_cents: Option<i64>,
    ) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// In-memory provider double for tests and local development.
///
/// Holds are born capturable (confirmation timing is exercised through
/// webhook events, not through this double) and capture is atomic under the
/// map's entry lock, so concurrent contenders observe real
/// exactly-one-capture semantics.
#[derive(Default)]
pub struct InMemoryGateway {
    holds: DashMap<String, HoldRecord>,
    by_idempotency: DashMap<String, String>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

#[derive(Debug, Clone)]
struct HoldRecord {
    amount_cents: i64,
    state: HoldState,
    client_secret: String,
    captures: u64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(
                "simulated provider outage".to_string(),
            ));
        }
        Ok(())
    }

    /// Simulate a provider outage: every call fails with `Unavailable`.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Force a hold out of `Capturable` the way the provider would when it
    /// cancels or fails a hold out-of-band.
    pub fn force_status(&self, hold_ref: &str, status: HoldStatus) {
        if let Some(mut rec) = self.holds.get_mut(hold_ref) {
            rec.state.status = status;
        }
    }

    /// Pretend some other process already captured `amount_cents`.
    pub fn force_captured(&self, hold_ref: &str, amount_cents: i64) {
        if let Some(mut rec) = self.holds.get_mut(hold_ref) {
            rec.state = HoldState {
                status: HoldStatus::Succeeded,
                amount_received_cents: amount_cents,
            };
        }
    }

    /// Number of captures executed against a hold.
    pub fn capture_count(&self, hold_ref: &str) -> u64 {
        self.holds.get(hold_ref).map(|r| r.captures).unwrap_or(0)
    }

    /// Provider-side snapshot without going through the trait.
    pub fn snapshot(&self, hold_ref: &str) -> Option<HoldState> {
        self.holds.get(hold_ref).map(|r| r.state)
    }
}

impl AuthorizationGateway for InMemoryGateway {
    async fn create_hold(&self, req: &CreateHold) -> Result<HoldHandle, GatewayError> {
        self.check_available()?;

        use dashmap::mapref::entry::Entry;
        match self.by_idempotency.entry(req.idempotency_key.clone()) {
            Entry::Occupied(existing) => {
                let hold_ref = existing.get().clone();
                let secret = self
                    .holds
                    .get(&hold_ref)
                    .map(|r| r.client_secret.clone())
                    .ok_or_else(|| {
                        GatewayError::Protocol("idempotency key maps to missing hold".into())
                    })?;
                Ok(HoldHandle {
                    hold_ref,
                    client_secret: Some(secret),
                })
            }
            Entry::Vacant(slot) => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let hold_ref = format!("hold_{n:08}");
                let client_secret = format!("{hold_ref}_secret");
                self.holds.insert(
                    hold_ref.clone(),
                    HoldRecord {
                        amount_cents: req.amount_cents,
                        state: HoldState {
                            status: HoldStatus::Capturable,
                            amount_received_cents: 0,
                        },
                        client_secret: client_secret.clone(),
                        captures: 0,
                    },
                );
                slot.insert(hold_ref.clone());
                Ok(HoldHandle {
                    hold_ref,
                    client_secret: Some(client_secret),
                })
            }
        }
    }

    async fn hold_status(&self, hold_ref: &str) -> Result<HoldState, GatewayError> {
        self.check_available()?;
        self.holds
            .get(hold_ref)
            .map(|r| r.state)
            .ok_or_else(|| GatewayError::Protocol(format!("unknown hold {hold_ref}")))
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount_cents: Option<i64>,
    ) -> Result<String, GatewayError> {
        self.check_available()?;
        let mut rec = self
            .holds
            .get_mut(hold_ref)
            .ok_or_else(|| GatewayError::Protocol(format!("unknown hold {hold_ref}")))?;

        if rec.state.status != HoldStatus::Capturable {
            return Err(GatewayError::HoldConflict(rec.state));
        }
        let amount = amount_cents.unwrap_or(rec.amount_cents);
        if amount <= 0 || amount > rec.amount_cents {
            return Err(GatewayError::Protocol(format!(
                "capture amount {amount} outside hold of {}",
                rec.amount_cents
            )));
        }
        rec.state = HoldState {
            status: HoldStatus::Succeeded,
            amount_received_cents: amount,
        };
        rec.captures += 1;
        Ok(format!("{hold_ref}_cap{}", rec.captures))
    }
}

/// Gateway selection for the relay's single concrete `AppState` type.
pub enum AnyGateway {
    Http(crate::gateway_http::HttpGateway),
    InMemory(InMemoryGateway),
}

impl AuthorizationGateway for AnyGateway {
    async fn create_hold(&self, req: &CreateHold) -> Result<HoldHandle, GatewayError> {
        match self {
            AnyGateway::Http(g) => g.create_hold(req).await,
            AnyGateway::InMemory(g) => g.create_hold(req).await,
        }
    }

    async fn hold_status(&self, hold_ref: &str) -> Result<HoldState, GatewayError> {
        match self {
            AnyGateway::Http(g) => g.hold_status(hold_ref).await,
            AnyGateway::InMemory(g) => g.hold_status(hold_ref).await,
        }
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount_cents: Option<i64>,
    ) -> Result<String, GatewayError> {
        match self {
            AnyGateway::Http(g) => g.capture(hold_ref, amount_cents).await,
            AnyGateway::InMemory(g) => g.capture(hold_ref, amount_cents).await,
        }
    }
}
