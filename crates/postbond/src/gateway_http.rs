//! HTTP adapter for a hosted payment-hold provider.
//!
//! Speaks the provider's REST dialect: form-encoded requests, Bearer auth,
//! an `Idempotency-Key` header on creation, and manual capture so funds stay
//! held until the engine decides the outcome. Everything the rest of the
//! crate sees is the [`AuthorizationGateway`] contract.

use crate::gateway::{
    AuthorizationGateway, CreateHold, GatewayError, HoldHandle, HoldState, HoldStatus,
};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the provider's hold API.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

/// Provider representation of a hold.
#[derive(Debug, Deserialize)]
struct HoldObject {
    id: String,
    status: String,
    #[serde(default)]
    amount_received: i64,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn read_hold(&self, resp: reqwest::Response) -> Result<HoldObject, GatewayError> {
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<HoldObject>()
                .await
                .map_err(|e| GatewayError::Protocol(format!("hold response parse failed: {e}")));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(GatewayError::Unavailable(format!(
                "provider returned {status}"
            )));
        }

        let detail = resp
            .json::<ApiErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or(ApiErrorDetail {
                code: None,
                message: None,
            });
        Err(classify_client_error(status.as_u16(), detail))
    }

    async fn retrieve(&self, hold_ref: &str) -> Result<HoldObject, GatewayError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/payment_intents/{hold_ref}")))
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("hold lookup failed: {e}")))?;
        self.read_hold(resp).await
    }
}

impl AuthorizationGateway for HttpGateway {
    async fn create_hold(&self, req: &CreateHold) -> Result<HoldHandle, GatewayError> {
        let form = [
            ("amount", req.amount_cents.to_string()),
            ("currency", req.currency.clone()),
            ("capture_method", "manual".to_string()),
            ("description", req.description.clone()),
            ("metadata[message_public_id]", req.public_id.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let resp = self
            .http
            .post(self.url("/v1/payment_intents"))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &req.idempotency_key)
            .timeout(REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("hold creation failed: {e}")))?;

        let hold = self.read_hold(resp).await?;
        Ok(HoldHandle {
            hold_ref: hold.id,
            client_secret: hold.client_secret,
        })
    }

    async fn hold_status(&self, hold_ref: &str) -> Result<HoldState, GatewayError> {
        let hold = self.retrieve(hold_ref).await?;
        Ok(hold_state_of(&hold))
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount_cents: Option<i64>,
    ) -> Result<String, GatewayError> {
        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(amount) = amount_cents {
            form.push(("amount_to_capture", amount.to_string()));
        }
        let resp = self
            .http
            .post(self.url(&format!("/v1/payment_intents/{hold_ref}/capture")))
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("capture failed: {e}")))?;

        match self.read_hold(resp).await {
            Ok(hold) => Ok(hold.id),
            // The provider rejects captures of non-capturable holds with a
            // state error. Surface the authoritative state so callers can
            // reconcile instead of guessing.
            Err(GatewayError::Protocol(msg)) if msg.contains("unexpected_state") => {
                let hold = self.retrieve(hold_ref).await?;
                Err(GatewayError::HoldConflict(hold_state_of(&hold)))
            }
            Err(other) => Err(other),
        }
    }
}

fn hold_state_of(hold: &HoldObject) -> HoldState {
    HoldState {
        status: map_status(&hold.status),
        amount_received_cents: hold.amount_received,
    }
}

/// Collapse the provider's status vocabulary onto the engine's contract.
/// Anything that is not holding capturable funds and was not captured is
/// `Failed` from the engine's point of view.
fn map_status(provider_status: &str) -> HoldStatus {
    match provider_status {
        "requires_capture" => HoldStatus::Capturable,
        "succeeded" => HoldStatus::Succeeded,
        "canceled" => HoldStatus::Canceled,
        _ => HoldStatus::Failed,
    }
}

fn classify_client_error(http_status: u16, detail: ApiErrorDetail) -> GatewayError {
    let code = detail.code.unwrap_or_default();
    let message = detail
        .message
        .unwrap_or_else(|| format!("provider returned {http_status}"));
    GatewayError::Protocol(format!("{code}: {message}"))
}
