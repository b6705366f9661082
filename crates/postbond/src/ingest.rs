//! Webhook ingestion: authenticate, parse, apply, acknowledge.
//!
//! Policy: a delivery that fails authentication is rejected outright; an
//! authenticated delivery is acknowledged unless the store itself failed,
//! because redelivery only helps for transient local faults. Receiver
//! notification is attempted exactly when the AUTHORIZED write wins, and a
//! notification failure never turns into a webhook error (the provider
//! would redeliver, the write would lose, and no second send would happen).

use std::sync::Arc;
use thiserror::Error;

use crate::capability::CapabilitySigner;
use crate::engine::Engine;
use crate::error::{PostbondError, StoreError};
use crate::event::{parse_event, verify_signature, ProviderEvent, SignatureError};
use crate::gateway::AuthorizationGateway;
use crate::notify::ReceiverNotifier;

/// What an authenticated delivery did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The AUTHORIZED write won; the receiver was notified.
    Authorized,
    /// A redelivery or a lost race; nothing changed.
    AlreadyRecorded,
    /// The message was marked FAILED.
    Failed,
    /// Unknown kind, missing metadata, or an unknown message.
    Ignored,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("store failure during ingestion: {0}")]
    Store(#[from] StoreError),
}

/// Applies provider events to the engine.
pub struct WebhookIngestor<G, N> {
    engine: Arc<Engine<G>>,
    notifier: N,
    secret: Vec<u8>,
    signer: CapabilitySigner,
    public_base_url: String,
}

impl<G: AuthorizationGateway, N: ReceiverNotifier> WebhookIngestor<G, N> {
    pub fn new(
        engine: Arc<Engine<G>>,
        notifier: N,
        secret: impl Into<Vec<u8>>,
        signer: CapabilitySigner,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            notifier,
            secret: secret.into(),
            signer,
            public_base_url: public_base_url.into(),
        }
    }

    /// Verify and apply one delivery. The signature is checked against the
    /// raw body before anything is parsed.
    pub async fn ingest(
        &self,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<IngestOutcome, IngestError> {
        let header = signature_header.ok_or(SignatureError::Malformed)?;
        let now = chrono::Utc::now().timestamp();
        verify_signature(&self.secret, header, body, now)?;

        let event = match parse_event(body) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "authenticated event could not be parsed, acknowledging");
                return Ok(IngestOutcome::Ignored);
            }
        };

        match event {
            ProviderEvent::HoldConfirmed {
                public_id,
                hold_ref,
                occurred_at,
            } => self.apply_confirmed(&public_id, &hold_ref, occurred_at).await,
            ProviderEvent::PaymentFailed { public_id, hold_ref } => {
                self.apply_failed(&public_id, &hold_ref, "payment failed")
            }
            ProviderEvent::HoldCanceled { public_id, hold_ref } => {
                self.apply_failed(&public_id, &hold_ref, "hold canceled")
            }
            ProviderEvent::Ignored { kind } => {
                tracing::debug!(kind = %kind, "ignoring event kind");
                Ok(IngestOutcome::Ignored)
            }
        }
    }

    async fn apply_confirmed(
        &self,
        public_id: &str,
        hold_ref: &str,
        occurred_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<IngestOutcome, IngestError> {
        let notice = match self
            .engine
            .confirm_authorized(public_id, hold_ref, occurred_at)
        {
            Ok(Some(notice)) => notice,
            Ok(None) => return Ok(IngestOutcome::AlreadyRecorded),
            Err(PostbondError::NotFound(_)) => {
                tracing::warn!(public_id = %public_id, "confirmed hold for unknown message");
                return Ok(IngestOutcome::Ignored);
            }
            Err(PostbondError::Store(e)) => return Err(e.into()),
            Err(other) => {
                tracing::error!(public_id = %public_id, error = %other, "confirmation failed");
                return Ok(IngestOutcome::Ignored);
            }
        };

        let review_url = self.signer.review_url(
            &self.public_base_url,
            &notice.public_id,
            notice.expires_at.timestamp(),
        );
        if let Err(e) = self.notifier.notify_authorized(&notice, &review_url).await {
            tracing::error!(
                public_id = %notice.public_id,
                receiver = %notice.receiver_email,
                error = %e,
                "receiver notification failed; message stays AUTHORIZED"
            );
        }
        Ok(IngestOutcome::Authorized)
    }

    fn apply_failed(
        &self,
        public_id: &str,
        hold_ref: &str,
        reason: &str,
    ) -> Result<IngestOutcome, IngestError> {
        match self.engine.mark_failed(public_id, reason) {
            Ok(true) => {
                tracing::info!(public_id = %public_id, hold_ref = %hold_ref, reason = %reason, "message marked failed");
                Ok(IngestOutcome::Failed)
            }
            Ok(false) => Ok(IngestOutcome::AlreadyRecorded),
            Err(PostbondError::Store(e)) => Err(e.into()),
            Err(other) => {
                tracing::error!(public_id = %public_id, error = %other, "failure event not applied");
                Ok(IngestOutcome::Ignored)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{
        sign_event, EVENT_HOLD_CONFIRMED, EVENT_PAYMENT_FAILED, METADATA_PUBLIC_ID,
    };
    use crate::gateway::InMemoryGateway;
    use crate::message::{EscrowAccount, MessageDraft, MessageStatus};
    use crate::notify::RecordingNotifier;
    use crate::store::{InMemoryMessageStore, MessageStore};
    use chrono::Utc;

    const WEBHOOK_SECRET: &[u8] = b"whsec_test";
    const LINK_SECRET: &[u8] = b"link_secret";

    fn ingestor() -> WebhookIngestor<InMemoryGateway, RecordingNotifier> {
        let store = Arc::new(InMemoryMessageStore::new());
        store
            .insert_account(&EscrowAccount {
                id: "acct-1".into(),
                slug: "demo".into(),
                owner_email: "owner@example.com".into(),
                display_name: None,
                min_bond_cents: 500,
                max_bond_cents: 5_000,
                allow_boost: true,
                timeout_hours: 72,
                created_at: Utc::now(),
            })
            .unwrap();
        let engine = Arc::new(Engine::new(store, InMemoryGateway::new()));
        WebhookIngestor::new(
            engine,
            RecordingNotifier::new(),
            WEBHOOK_SECRET,
            CapabilitySigner::new(LINK_SECRET),
            "https://postbond.test",
        )
    }

    async fn pending_message(
        ingestor: &WebhookIngestor<InMemoryGateway, RecordingNotifier>,
    ) -> String {
        let msg = ingestor
            .engine
            .submit(
                "demo",
                MessageDraft {
                    sender_email: "sender@example.com".into(),
                    sender_name: None,
                    subject: None,
                    body: "hello".into(),
                    requested_bond_cents: Some(500),
                },
            )
            .unwrap();
        ingestor.engine.request_hold(&msg.public_id).await.unwrap();
        msg.public_id
    }

    fn signed(kind: &str, public_id: &str) -> (String, Vec<u8>) {
        let now = Utc::now().timestamp();
        let body = serde_json::to_vec(&serde_json::json!({
            "type": kind,
            "created": now,
            "data": { "object": {
                "id": "hold_00000000",
                "metadata": { METADATA_PUBLIC_ID: public_id },
            }},
        }))
        .unwrap();
        (sign_event(WEBHOOK_SECRET, now, &body), body)
    }

    #[tokio::test]
    async fn confirmation_authorizes_and_notifies_once() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (header, body) = signed(EVENT_HOLD_CONFIRMED, &id);

        let outcome = ing.ingest(Some(&header), &body).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Authorized);
        assert_eq!(
            ing.engine.view(&id).unwrap().status,
            MessageStatus::Authorized
        );

        let deliveries = ing.notifier.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, id);
        assert!(deliveries[0].1.contains(&format!("/review/{id}?e=")));

        // Redelivery acknowledges without a second notification.
        let outcome = ing.ingest(Some(&header), &body).await.unwrap();
        assert_eq!(outcome, IngestOutcome::AlreadyRecorded);
        assert_eq!(ing.notifier.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn redelivery_after_accept_changes_nothing() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (header, body) = signed(EVENT_HOLD_CONFIRMED, &id);
        ing.ingest(Some(&header), &body).await.unwrap();
        ing.engine.accept(&id).await.unwrap();

        let outcome = ing.ingest(Some(&header), &body).await.unwrap();
        assert_eq!(outcome, IngestOutcome::AlreadyRecorded);
        assert_eq!(ing.engine.view(&id).unwrap().status, MessageStatus::Accepted);
        assert_eq!(ing.notifier.deliveries().len(), 1);

        let hold_ref = ing.engine.view(&id).unwrap().hold_ref.unwrap();
        assert_eq!(ing.engine.gateway().capture_count(&hold_ref), 1);
    }

    #[tokio::test]
    async fn review_link_in_notification_verifies() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (header, body) = signed(EVENT_HOLD_CONFIRMED, &id);
        ing.ingest(Some(&header), &body).await.unwrap();

        let url = ing.notifier.deliveries()[0].1.clone();
        let query = url.split_once('?').unwrap().1;
        let mut exp = 0i64;
        let mut sig = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("e", v) => exp = v.parse().unwrap(),
                ("s", v) => sig = v.to_string(),
                _ => {}
            }
        }
        let signer = CapabilitySigner::new(LINK_SECRET);
        assert!(signer.verify(&id, exp, &sig));
        assert_eq!(
            exp,
            ing.engine.view(&id).unwrap().expires_at.unwrap().timestamp()
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_parsing() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (_, body) = signed(EVENT_HOLD_CONFIRMED, &id);
        let forged = sign_event(b"wrong_secret", Utc::now().timestamp(), &body);

        let err = ing.ingest(Some(&forged), &body).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Signature(SignatureError::Mismatch)
        ));
        assert_eq!(
            ing.engine.view(&id).unwrap().status,
            MessageStatus::Authorizing
        );
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (_, body) = signed(EVENT_HOLD_CONFIRMED, &id);
        assert!(matches!(
            ing.ingest(None, &body).await.unwrap_err(),
            IngestError::Signature(SignatureError::Malformed)
        ));
    }

    #[tokio::test]
    async fn stale_signature_is_rejected() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let old = Utc::now().timestamp() - 3_600;
        let body = serde_json::to_vec(&serde_json::json!({
            "type": EVENT_HOLD_CONFIRMED,
            "created": old,
            "data": { "object": { "id": "h", "metadata": { METADATA_PUBLIC_ID: id } } },
        }))
        .unwrap();
        let header = sign_event(WEBHOOK_SECRET, old, &body);
        assert!(matches!(
            ing.ingest(Some(&header), &body).await.unwrap_err(),
            IngestError::Signature(SignatureError::Stale)
        ));
    }

    #[tokio::test]
    async fn unknown_kind_acknowledged_as_ignored() {
        let ing = ingestor();
        let (header, body) = signed("charge.refund.updated", "whatever");
        assert_eq!(
            ing.ingest(Some(&header), &body).await.unwrap(),
            IngestOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn unknown_message_acknowledged_as_ignored() {
        let ing = ingestor();
        let (header, body) = signed(EVENT_HOLD_CONFIRMED, "ghost");
        assert_eq!(
            ing.ingest(Some(&header), &body).await.unwrap(),
            IngestOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn authenticated_garbage_is_acknowledged() {
        let ing = ingestor();
        let body = b"not json at all".to_vec();
        let now = Utc::now().timestamp();
        let header = sign_event(WEBHOOK_SECRET, now, &body);
        assert_eq!(
            ing.ingest(Some(&header), &body).await.unwrap(),
            IngestOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn payment_failure_marks_failed_once() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        let (header, body) = signed(EVENT_PAYMENT_FAILED, &id);

        assert_eq!(
            ing.ingest(Some(&header), &body).await.unwrap(),
            IngestOutcome::Failed
        );
        assert_eq!(ing.engine.view(&id).unwrap().status, MessageStatus::Failed);

        assert_eq!(
            ing.ingest(Some(&header), &body).await.unwrap(),
            IngestOutcome::AlreadyRecorded
        );
    }

    #[tokio::test]
    async fn notify_failure_does_not_fail_ingestion() {
        let ing = ingestor();
        let id = pending_message(&ing).await;
        ing.notifier.set_failing(true);

        let (header, body) = signed(EVENT_HOLD_CONFIRMED, &id);
        let outcome = ing.ingest(Some(&header), &body).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Authorized);
        assert_eq!(
            ing.engine.view(&id).unwrap().status,
            MessageStatus::Authorized
        );
        assert!(ing.notifier.deliveries().is_empty());
    }
}
