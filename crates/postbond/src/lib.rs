//! Escrow state machine for bonded message delivery.
//!
//! A sender backs a message with a refundable bond (plus a small
//! non-refundable delivery fee) held, not charged, at an external payment
//! provider. The receiver gets a signed review link and either **accepts**
//! (bond and fee are captured) or **releases** (only the fee is captured,
//! the bond returns to the sender). A silent receiver is timed out by the
//! expiry sweep, which resolves like a release.
//!
//! # Exclusivity model
//!
//! Accept links, release links, provider webhooks, and the sweep all race
//! to resolve the same message. There are no locks: every status change is
//! one conditional store write guarded by the expected current status, and
//! every capture is preceded by an authoritative hold-state read. At most
//! one trigger captures; a loser whose target matches the winning outcome
//! succeeds idempotently, every other loser observes a conflict naming the
//! status that won.
//!
//! # Quick example
//!
//! ```no_run
//! use postbond::{Engine, InMemoryGateway, InMemoryMessageStore, MessageDraft};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), postbond::PostbondError> {
//! let engine = Engine::new(
//!     Arc::new(InMemoryMessageStore::new()),
//!     InMemoryGateway::new(),
//! );
//!
//! let message = engine.submit(
//!     "some-receiver",
//!     MessageDraft {
//!         sender_email: "sender@example.com".into(),
//!         sender_name: None,
//!         subject: Some("quick question".into()),
//!         body: "worth your time".into(),
//!         requested_bond_cents: Some(500),
//!     },
//! )?;
//! let checkout = engine.request_hold(&message.public_id).await?;
//! # let _ = checkout;
//! # Ok(())
//! # }
//! ```

// Domain types and state machine
pub mod engine;
pub mod error;
pub mod message;
pub mod store;

// Hold provider
pub mod gateway;
pub mod gateway_http;

// Triggers
pub mod event;
pub mod ingest;
pub mod sweeper;

// Receiver-facing plumbing
pub mod capability;
pub mod notify;
pub mod security;

// Re-exports
pub use capability::CapabilitySigner;
pub use engine::{AuthorizedNotice, Engine};
pub use error::{PostbondError, StoreError};
pub use event::{
    parse_event, sign_event, verify_signature, ProviderEvent, SignatureError,
};
pub use gateway::{
    AnyGateway, AuthorizationGateway, CreateHold, GatewayError, HoldHandle, HoldState,
    HoldStatus, InMemoryGateway,
};
pub use gateway_http::HttpGateway;
pub use ingest::{IngestError, IngestOutcome, WebhookIngestor};
pub use message::{
    EscrowAccount, Message, MessageDraft, MessageStatus, DEFAULT_CURRENCY, DELIVERY_FEE_CENTS,
};
pub use notify::{
    AnyNotifier, EmailNotifier, LogNotifier, NotifyError, ReceiverNotifier, RecordingNotifier,
};
pub use store::{InMemoryMessageStore, MessageStore, SqliteMessageStore, TransitionPatch};
pub use sweeper::{run_sweep, SweepOutcome, SWEEP_BATCH_LIMIT};
