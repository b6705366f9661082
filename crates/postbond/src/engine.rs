//! The transition engine: the only writer of message status.
//!
//! Three triggers race to resolve an AUTHORIZED message: the receiver's
//! Accept or Release link, provider webhook events, and the expiry sweep.
//! The engine serializes them without locks by funnelling every status
//! change through the store's guarded conditional write and by asking the
//! gateway for the authoritative hold state immediately before any capture.
//! Whoever's write lands first wins; everyone else reconciles and reports a
//! conflict naming the status that beat them.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::{PostbondError, StoreError};
use crate::gateway::{
    AuthorizationGateway, CreateHold, GatewayError, HoldHandle, HoldState, HoldStatus,
};
use crate::message::{EscrowAccount, Message, MessageDraft, MessageStatus};
use crate::store::{MessageStore, TransitionPatch};

/// Everything the notifier needs to tell a receiver about a newly
/// authorized message. Produced at most once per message, by the transition
/// that wins the AUTHORIZED write.
#[derive(Debug, Clone)]
pub struct AuthorizedNotice {
    pub public_id: String,
    pub receiver_email: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub subject: Option<String>,
    pub body: String,
    pub bond_cents: i64,
    pub expires_at: DateTime<Utc>,
}

/// Escrow state machine over a message store and a hold gateway.
pub struct Engine<G> {
    store: Arc<dyn MessageStore>,
    gateway: G,
}

impl<G: AuthorizationGateway> Engine<G> {
    pub fn new(store: Arc<dyn MessageStore>, gateway: G) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Create a DRAFT message addressed to the account behind `slug`.
    /// Bond clamping and fee assignment happen here; input validation is
    /// the caller's job.
    pub fn submit(&self, slug: &str, draft: MessageDraft) -> Result<Message, PostbondError> {
        let account = self
            .store
            .account_by_slug(slug)?
            .ok_or(PostbondError::NotFound("account"))?;
        let message = draft.into_message(&account, Utc::now());
        self.store.insert_message(&message)?;
        tracing::info!(
            public_id = %message.public_id,
            account = %account.slug,
            bond_cents = message.bond_cents,
            "message drafted"
        );
        Ok(message)
    }

    /// Place (or re-fetch) the hold for a message and move it to
    /// AUTHORIZING. Retries reuse the same hold through the provider-side
    /// idempotency key, so a sender refreshing checkout never double-holds.
    pub async fn request_hold(&self, public_id: &str) -> Result<HoldHandle, PostbondError> {
        let message = self.load(public_id)?;
        match message.status {
            MessageStatus::Draft | MessageStatus::Authorizing => {}
            current => return Err(PostbondError::StateConflict { current }),
        }

        let handle = self
            .gateway
            .create_hold(&CreateHold {
                amount_cents: message.total_cents(),
                currency: message.currency.clone(),
                idempotency_key: message.public_id.clone(),
                public_id: message.public_id.clone(),
                description: format!("bonded message {}", message.public_id),
            })
            .await?;

        // Losing this write means the webhook already advanced the message;
        // the hold handle is still the right answer for the sender.
        let won = self.store.transition(
            public_id,
            &[MessageStatus::Draft, MessageStatus::Authorizing],
            MessageStatus::Authorizing,
            &TransitionPatch {
                hold_ref: Some(handle.hold_ref.clone()),
                ..Default::default()
            },
        )?;
        tracing::info!(
            public_id = %public_id,
            hold_ref = %handle.hold_ref,
            advanced = won,
            "hold requested"
        );
        Ok(handle)
    }

    /// Commit the AUTHORIZED transition for a confirmed hold.
    ///
    /// Returns `Some(notice)` only when this call wins the write; redelivered
    /// or racing confirmations get `None` and must not notify. The expiry
    /// deadline is fixed here, once, as confirmation time plus the account's
    /// timeout.
    pub fn confirm_authorized(
        &self,
        public_id: &str,
        hold_ref: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<AuthorizedNotice>, PostbondError> {
        let message = self.load(public_id)?;
        let account = self.account_of(&message)?;
        let expires_at = occurred_at + Duration::hours(account.timeout_hours);

        let won = self.store.transition(
            public_id,
            &[MessageStatus::Draft, MessageStatus::Authorizing],
            MessageStatus::Authorized,
            &TransitionPatch {
                hold_ref: Some(hold_ref.to_string()),
                authorized_at: Some(occurred_at),
                expires_at: Some(expires_at),
                ..Default::default()
            },
        )?;
        if !won {
            tracing::info!(
                public_id = %public_id,
                status = %message.status,
                "authorization already recorded, skipping"
            );
            return Ok(None);
        }

        tracing::info!(
            public_id = %public_id,
            hold_ref = %hold_ref,
            expires_at = %expires_at,
            "message authorized"
        );
        Ok(Some(AuthorizedNotice {
            public_id: message.public_id,
            receiver_email: account.owner_email,
            sender_email: message.sender_email,
            sender_name: message.sender_name,
            subject: message.subject,
            body: message.body,
            bond_cents: message.bond_cents,
            expires_at,
        }))
    }

    /// Receiver accepts: capture bond plus fee, resolve ACCEPTED.
    ///
    /// If the provider shows the hold already fully captured (a concurrent
    /// accept landed elsewhere), this reconciles and reports success rather
    /// than a conflict; no second capture is issued.
    pub async fn accept(&self, public_id: &str) -> Result<Message, PostbondError> {
        self.resolve(public_id, MessageStatus::Accepted).await
    }

    /// Receiver releases (or the sweep times out): capture only the fee,
    /// let the provider return the bond, resolve RELEASED. Idempotent
    /// against a concurrent fee-only capture, like [`Engine::accept`].
    pub async fn release(&self, public_id: &str) -> Result<Message, PostbondError> {
        self.resolve(public_id, MessageStatus::Released).await
    }

    /// Record a provider-side failure or cancellation. Only pre-terminal
    /// messages move; a resolved message stays what it is.
    pub fn mark_failed(&self, public_id: &str, reason: &str) -> Result<bool, PostbondError> {
        let won = self.store.transition(
            public_id,
            &[
                MessageStatus::Draft,
                MessageStatus::Authorizing,
                MessageStatus::Authorized,
            ],
            MessageStatus::Failed,
            &TransitionPatch::none(),
        )?;
        if won {
            tracing::warn!(public_id = %public_id, reason = %reason, "message failed");
        }
        Ok(won)
    }

    /// Read-only lookup for status pages.
    pub fn view(&self, public_id: &str) -> Result<Message, PostbondError> {
        self.load(public_id)
    }

    async fn resolve(
        &self,
        public_id: &str,
        to: MessageStatus,
    ) -> Result<Message, PostbondError> {
        let message = self.load(public_id)?;
        if message.status != MessageStatus::Authorized {
            return Err(PostbondError::StateConflict {
                current: message.status,
            });
        }
        let hold_ref = message.hold_ref.clone().ok_or_else(|| {
            StoreError::Corrupt(format!("message {public_id}: AUTHORIZED without hold"))
        })?;
        let capture_amount = match to {
            MessageStatus::Accepted => None,
            _ => Some(message.fee_cents),
        };

        // The local row is a cache; the provider is the authority on the
        // hold. Check it first so a hold that failed or was captured by a
        // faster trigger reconciles instead of double-capturing. A trigger
        // whose target matches what already happened succeeds idempotently.
        let state = self.gateway.hold_status(&hold_ref).await?;
        if state.status != HoldStatus::Capturable {
            let current = self.reconcile(&message, state)?;
            if current == to {
                return self.load(public_id);
            }
            return Err(PostbondError::StateConflict { current });
        }

        let capture_ref = match self.gateway.capture(&hold_ref, capture_amount).await {
            Ok(capture_ref) => capture_ref,
            Err(GatewayError::HoldConflict(state)) => {
                // Lost the capture race in the window after the check.
                let current = self.reconcile(&message, state)?;
                if current == to {
                    return self.load(public_id);
                }
                return Err(PostbondError::StateConflict { current });
            }
            Err(other) => return Err(other.into()),
        };

        let won = self.store.transition(
            public_id,
            &[MessageStatus::Authorized],
            to,
            &TransitionPatch {
                capture_ref: Some(capture_ref.clone()),
                ..Default::default()
            },
        )?;
        if !won {
            // We hold the capture but another writer flipped the row in
            // between. Their status stands; ours is the capture record.
            let current = self.load(public_id)?.status;
            tracing::warn!(
                public_id = %public_id,
                capture_ref = %capture_ref,
                current = %current,
                "captured but lost the status write"
            );
            if current != to {
                return Err(PostbondError::StateConflict { current });
            }
            return self.load(public_id);
        }

        tracing::info!(
            public_id = %public_id,
            status = %to,
            capture_ref = %capture_ref,
            captured_cents = capture_amount.unwrap_or_else(|| message.total_cents()),
            "message resolved"
        );
        self.load(public_id)
    }

    /// Bring the local row in line with a hold that resolved without us.
    /// The captured amount tells the story: the full hold means an Accept
    /// won, the fee alone means a Release or sweep won, anything canceled
    /// or failed means no funds were held.
    fn reconcile(
        &self,
        message: &Message,
        state: HoldState,
    ) -> Result<MessageStatus, PostbondError> {
        let to = match state.status {
            HoldStatus::Succeeded => {
                if state.amount_received_cents >= message.total_cents() {
                    MessageStatus::Accepted
                } else {
                    if state.amount_received_cents != message.fee_cents {
                        tracing::warn!(
                            public_id = %message.public_id,
                            amount_received_cents = state.amount_received_cents,
                            fee_cents = message.fee_cents,
                            "partial capture does not match the fee"
                        );
                    }
                    MessageStatus::Released
                }
            }
            HoldStatus::Canceled | HoldStatus::Failed => MessageStatus::Failed,
            HoldStatus::Capturable => return Ok(message.status),
        };

        let won = self.store.transition(
            &message.public_id,
            &[
                MessageStatus::Draft,
                MessageStatus::Authorizing,
                MessageStatus::Authorized,
            ],
            to,
            &TransitionPatch::none(),
        )?;
        if won {
            tracing::warn!(
                public_id = %message.public_id,
                status = %to,
                provider_status = ?state.status,
                "reconciled from provider state"
            );
        }
        Ok(self.load(&message.public_id)?.status)
    }

    fn load(&self, public_id: &str) -> Result<Message, PostbondError> {
        self.store
            .message(public_id)?
            .ok_or(PostbondError::NotFound("message"))
    }

    fn account_of(&self, message: &Message) -> Result<EscrowAccount, PostbondError> {
        self.store.account(&message.account_id)?.ok_or_else(|| {
            StoreError::Corrupt(format!(
                "message {} references missing account {}",
                message.public_id, message.account_id
            ))
            .into()
        })
    }
}
