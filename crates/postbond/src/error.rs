use thiserror::Error;

use crate::gateway::GatewayError;
use crate::message::MessageStatus;

/// Errors returned by postbond operations.
#[derive(Debug, Error)]
pub enum PostbondError {
    /// Bad or expired capability signature, or a bad sweep-trigger secret.
    /// Rejected before anything is read or written.
    #[error("authentication failed: {0}")]
    Authentication(&'static str),

    /// The action is not legal for the message's current status, or another
    /// trigger won the exclusivity race first. Discloses the current status
    /// so the caller can explain what happened.
    #[error("message not actionable (status={current})")]
    StateConflict { current: MessageStatus },

    /// The hold provider could not be reached or answered with a transient
    /// failure. Local state is untouched; safe to retry via webhook
    /// redelivery, the next sweep, or user resubmission.
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<GatewayError> for PostbondError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Unavailable(msg) => PostbondError::GatewayUnavailable(msg),
            GatewayError::Protocol(msg) => PostbondError::GatewayUnavailable(msg),
            // HoldConflict is handled where it carries meaning (capture
            // races); reaching here means the hold resolved under us.
            GatewayError::HoldConflict(state) => PostbondError::GatewayUnavailable(format!(
                "hold no longer capturable (provider status {:?})",
                state.status
            )),
        }
    }
}

/// Errors from the durable message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("duplicate key: {0}")]
    Duplicate(&'static str),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}
