//! Receiver notification on the AUTHORIZED transition.
//!
//! Exactly-once is enforced upstream: the ingestor only calls a notifier
//! when its own transition write won, so implementations here just deliver.
//! Delivery failure is reported, never retried internally; the message is
//! already AUTHORIZED and the review link can be rebuilt from the row.

use serde::Serialize;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::engine::AuthorizedNotice;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier transport error: {0}")]
    Transport(String),
    #[error("notifier rejected the message: {0}")]
    Rejected(String),
}

pub trait ReceiverNotifier: Send + Sync {
    /// Tell the receiver a bonded message awaits review at `review_url`.
    fn notify_authorized(
        &self,
        notice: &AuthorizedNotice,
        review_url: &str,
    ) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Transactional-email delivery over the provider's REST API.
pub struct EmailNotifier {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: String,
    text: String,
}

impl EmailNotifier {
    pub const DEFAULT_API_URL: &'static str = "https://api.resend.com/emails";

    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

impl ReceiverNotifier for EmailNotifier {
    async fn notify_authorized(
        &self,
        notice: &AuthorizedNotice,
        review_url: &str,
    ) -> Result<(), NotifyError> {
        let request = EmailRequest {
            from: &self.from,
            to: [notice.receiver_email.as_str()],
            subject: notice_subject(notice),
            text: notice_text(notice, review_url),
        };
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(10))
            .json(&request)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(format!("email send failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(NotifyError::Rejected(format!("{status}: {body}")))
        } else {
            Err(NotifyError::Transport(format!("{status}: {body}")))
        }
    }
}

/// Development notifier: prints the review link instead of emailing it.
#[derive(Default)]
pub struct LogNotifier;

impl ReceiverNotifier for LogNotifier {
    async fn notify_authorized(
        &self,
        notice: &AuthorizedNotice,
        review_url: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            public_id = %notice.public_id,
            receiver = %notice.receiver_email,
            bond_cents = notice.bond_cents,
            review_url = %review_url,
            "receiver notification (log only)"
        );
        Ok(())
    }
}

/// Test double that records every delivery and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// `(public_id, review_url)` pairs in delivery order.
    pub fn deliveries(&self) -> Vec<(String, String)> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ReceiverNotifier for RecordingNotifier {
    async fn notify_authorized(
        &self,
        notice: &AuthorizedNotice,
        review_url: &str,
    ) -> Result<(), NotifyError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(NotifyError::Transport("recording notifier told to fail".into()));
        }
        match self.sent.lock() {
            Ok(mut sent) => sent.push((notice.public_id.clone(), review_url.to_string())),
            Err(poisoned) => poisoned
                .into_inner()
                .push((notice.public_id.clone(), review_url.to_string())),
        }
        Ok(())
    }
}

/// Notifier selection for the relay's single concrete `AppState` type.
/// `Recording` holds an `Arc` so a test can keep a handle to the recorder
/// after handing the notifier to the ingestor.
pub enum AnyNotifier {
    Email(EmailNotifier),
    Log(LogNotifier),
    Recording(std::sync::Arc<RecordingNotifier>),
}

impl ReceiverNotifier for AnyNotifier {
    async fn notify_authorized(
        &self,
        notice: &AuthorizedNotice,
        review_url: &str,
    ) -> Result<(), NotifyError> {
        match self {
            AnyNotifier::Email(n) => n.notify_authorized(notice, review_url).await,
            AnyNotifier::Log(n) => n.notify_authorized(notice, review_url).await,
            AnyNotifier::Recording(n) => n.notify_authorized(notice, review_url).await,
        }
    }
}

fn notice_subject(notice: &AuthorizedNotice) -> String {
    let sender = notice
        .sender_name
        .as_deref()
        .unwrap_or(&notice.sender_email);
    format!(
        "{sender} put {} on a message for you",
        format_usd(notice.bond_cents)
    )
}

fn notice_text(notice: &AuthorizedNotice, review_url: &str) -> String {
    let subject = notice.subject.as_deref().unwrap_or("(no subject)");
    format!(
        "{} <{}> bonded {} that this message is worth your time.\n\n\
         Subject: {}\n\n{}\n\n\
         Accept to keep the bond, or release it back to the sender:\n{}\n\n\
         If you do nothing, the bond returns to the sender at {}.",
        notice.sender_name.as_deref().unwrap_or("A sender"),
        notice.sender_email,
        format_usd(notice.bond_cents),
        subject,
        notice.body,
        review_url,
        notice.expires_at.to_rfc3339(),
    )
}

fn format_usd(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, cents % 100)
}
