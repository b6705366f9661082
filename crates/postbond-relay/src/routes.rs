use actix_web::{get, post, web, HttpRequest, HttpResponse};
use serde::Deserialize;
use std::time::Instant;

use postbond::{
    run_sweep, CapabilitySigner, IngestError, IngestOutcome, MessageDraft, PostbondError,
    SWEEP_BATCH_LIMIT,
};

use crate::metrics;
use crate::state::AppState;

const MAX_EMAIL_LEN: usize = 254;
const MAX_NAME_CHARS: usize = 120;
const MAX_SUBJECT_CHARS: usize = 180;
const MAX_BODY_CHARS: usize = 5_000;

/// Header carrying the provider's `t=...,v1=...` delivery signature.
const GATEWAY_SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeRequest {
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub bond_cents: Option<i64>,
    /// Honeypot field; humans never see or fill it.
    #[serde(default)]
    pub website: Option<String>,
}

/// Capability query pair on receiver links. Parsed leniently so that any
/// defect in the link reads as an authentication failure, not a 400.
#[derive(Debug, Deserialize)]
pub struct ActionQuery {
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub s: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    #[serde(default)]
    pub secret: Option<String>,
}

fn validate_intake(req: IntakeRequest) -> Result<MessageDraft, &'static str> {
    let sender_email = req.sender_email.trim().to_string();
    if sender_email.is_empty()
        || sender_email.len() > MAX_EMAIL_LEN
        || !sender_email.contains('@')
        || !sender_email.contains('.')
    {
        return Err("a valid sender email is required");
    }

    let body = req.body.trim().to_string();
    if body.is_empty() {
        return Err("message body is required");
    }
    if body.chars().count() > MAX_BODY_CHARS {
        return Err("message body too long");
    }

    // Display-only fields are truncated instead of bounced.
    let subject = req
        .subject
        .map(|s| truncate_chars(s.trim(), MAX_SUBJECT_CHARS))
        .filter(|s| !s.is_empty());
    let sender_name = req
        .sender_name
        .map(|s| truncate_chars(s.trim(), MAX_NAME_CHARS))
        .filter(|s| !s.is_empty());

    Ok(MessageDraft {
        sender_email,
        sender_name,
        subject,
        body,
        requested_bond_cents: req.bond_cents,
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn verify_link(
    signer: &CapabilitySigner,
    public_id: &str,
    query: &ActionQuery,
) -> Result<(), &'static str> {
    let exp: i64 = match query.e.as_deref().and_then(|e| e.parse().ok()) {
        Some(exp) => exp,
        None => return Err("missing"),
    };
    let sig = match query.s.as_deref() {
        Some(s) if !s.is_empty() => s,
        _ => return Err("missing"),
    };
    if signer.verify(public_id, exp, sig) {
        Ok(())
    } else {
        Err("invalid")
    }
}

fn error_response(operation: &str, public_id: &str, e: PostbondError) -> HttpResponse {
    match e {
        PostbondError::StateConflict { current } => {
            HttpResponse::BadRequest().json(serde_json::json!({
                "error": "message not actionable",
                "status": current.as_str(),
            }))
        }
        PostbondError::NotFound(what) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("{what} not found"),
        })),
        PostbondError::GatewayUnavailable(msg) => {
            tracing::error!(
                operation = %operation,
                public_id = %public_id,
                error = %msg,
                "payment gateway unavailable"
            );
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": "payment gateway unavailable, try again",
            }))
        }
        PostbondError::Authentication(_) => HttpResponse::Unauthorized().json(
            serde_json::json!({ "error": "authentication failed" }),
        ),
        e => {
            tracing::error!(
                operation = %operation,
                public_id = %public_id,
                error = %e,
                "internal error"
            );
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "internal error" }))
        }
    }
}

#[post("/api/pages/{slug}/messages")]
pub async fn intake(
    state: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<IntakeRequest>,
) -> HttpResponse {
    let slug = path.into_inner();
    let request = payload.into_inner();

    // Bots fill every field; drop their work silently so the form looks
    // like it succeeded.
    if request.website.as_deref().is_some_and(|w| !w.is_empty()) {
        tracing::info!(slug = %slug, "honeypot tripped, dropping intake");
        return HttpResponse::NoContent().finish();
    }

    let draft = match validate_intake(request) {
        Ok(draft) => draft,
        Err(msg) => {
            return HttpResponse::BadRequest().json(serde_json::json!({ "error": msg }))
        }
    };

    match state.engine.submit(&slug, draft) {
        Ok(message) => HttpResponse::Created().json(message),
        Err(e) => error_response("intake", "-", e),
    }
}

#[post("/api/messages/{public_id}/hold")]
pub async fn request_hold(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let public_id = path.into_inner();
    match state.engine.request_hold(&public_id).await {
        Ok(handle) => HttpResponse::Ok().json(handle),
        Err(e) => error_response("hold", &public_id, e),
    }
}

async fn run_action(
    state: &AppState,
    public_id: &str,
    action: &'static str,
    query: &ActionQuery,
) -> HttpResponse {
    if let Err(reason) = verify_link(&state.signer, public_id, query) {
        metrics::LINK_FAILURES.with_label_values(&[reason]).inc();
        metrics::ACTION_REQUESTS
            .with_label_values(&[action, "unauthorized"])
            .inc();
        tracing::warn!(
            public_id = %public_id,
            action = %action,
            reason = %reason,
            "rejected action link"
        );
        return HttpResponse::Unauthorized()
            .json(serde_json::json!({ "error": "invalid or expired link" }));
    }

    let start = Instant::now();
    let result = match action {
        "accept" => state.engine.accept(public_id).await,
        _ => state.engine.release(public_id).await,
    };
    metrics::ACTION_LATENCY
        .with_label_values(&[action])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(message) => {
            metrics::ACTION_REQUESTS
                .with_label_values(&[action, "resolved"])
                .inc();
            tracing::info!(
                public_id = %public_id,
                status = %message.status,
                "receiver action resolved"
            );
            // Back to the review surface, keeping the capability pair so the
            // page still verifies, plus a marker naming what just happened.
            let location = format!(
                "{}/review/{public_id}?e={}&s={}&done={action}",
                state.public_base_url.trim_end_matches('/'),
                query.e.as_deref().unwrap_or_default(),
                query.s.as_deref().unwrap_or_default(),
            );
            HttpResponse::SeeOther()
                .insert_header(("Location", location))
                .finish()
        }
        Err(e) => {
            let result_label = match &e {
                PostbondError::StateConflict { .. } => "conflict",
                PostbondError::GatewayUnavailable(_) => "unavailable",
                PostbondError::NotFound(_) => "not_found",
                _ => "error",
            };
            metrics::ACTION_REQUESTS
                .with_label_values(&[action, result_label])
                .inc();
            error_response(action, public_id, e)
        }
    }
}

#[post("/api/messages/{public_id}/accept")]
pub async fn accept(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ActionQuery>,
) -> HttpResponse {
    run_action(&state, &path.into_inner(), "accept", &query).await
}

#[post("/api/messages/{public_id}/release")]
pub async fn release(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ActionQuery>,
) -> HttpResponse {
    run_action(&state, &path.into_inner(), "release", &query).await
}

/// Read-only message view for the review page; guarded by the same
/// capability pair as the actions.
#[get("/api/messages/{public_id}")]
pub async fn view_message(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ActionQuery>,
) -> HttpResponse {
    let public_id = path.into_inner();
    if let Err(reason) = verify_link(&state.signer, &public_id, &query) {
        metrics::LINK_FAILURES.with_label_values(&[reason]).inc();
        return HttpResponse::Unauthorized()
            .json(serde_json::json!({ "error": "invalid or expired link" }));
    }
    match state.engine.view(&public_id) {
        Ok(message) => HttpResponse::Ok().json(message),
        Err(e) => error_response("view", &public_id, e),
    }
}

#[post("/hooks/gateway")]
pub async fn gateway_webhook(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    let signature = req
        .headers()
        .get(GATEWAY_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.ingestor.ingest(signature, &body).await {
        Ok(outcome) => {
            metrics::WEBHOOK_EVENTS
                .with_label_values(&[outcome_label(outcome)])
                .inc();
            HttpResponse::Ok().json(serde_json::json!({ "received": true }))
        }
        Err(IngestError::Signature(e)) => {
            metrics::WEBHOOK_EVENTS.with_label_values(&["rejected"]).inc();
            tracing::warn!(error = %e, "webhook delivery rejected");
            HttpResponse::BadRequest()
                .json(serde_json::json!({ "error": "invalid signature" }))
        }
        // A 5xx makes the provider redeliver, which is exactly right for a
        // transient store fault.
        Err(IngestError::Store(e)) => {
            tracing::error!(error = %e, "webhook ingestion hit the store");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "storage failure" }))
        }
    }
}

fn outcome_label(outcome: IngestOutcome) -> &'static str {
    match outcome {
        IngestOutcome::Authorized => "authorized",
        IngestOutcome::AlreadyRecorded => "already_recorded",
        IngestOutcome::Failed => "failed",
        IngestOutcome::Ignored => "ignored",
    }
}

/// The secret presented with a sweep trigger: `Authorization: Bearer` wins,
/// then the dedicated header, then the query parameter (for schedulers that
/// can only hit a URL).
fn presented_sweep_secret(req: &HttpRequest, query: &SweepQuery) -> Option<String> {
    if let Some(bearer) = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.to_string());
    }
    if let Some(header) = req
        .headers()
        .get("x-sweep-secret")
        .and_then(|v| v.to_str().ok())
    {
        return Some(header.to_string());
    }
    query.secret.clone()
}

#[post("/api/sweep/expire")]
pub async fn sweep_expire(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<SweepQuery>,
) -> HttpResponse {
    let Some(configured) = &state.sweep_secret else {
        tracing::error!("sweep trigger called but no sweep secret is configured");
        return HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": "sweep secret not configured" }));
    };

    let authorized = presented_sweep_secret(&req, &query)
        .map(|s| postbond::security::constant_time_eq(s.as_bytes(), configured))
        .unwrap_or(false);
    if !authorized {
        tracing::warn!("sweep trigger rejected");
        return HttpResponse::Unauthorized()
            .json(serde_json::json!({ "error": "unauthorized" }));
    }

    match run_sweep(state.engine.as_ref(), SWEEP_BATCH_LIMIT).await {
        Ok(outcome) => {
            metrics::SWEEP_MESSAGES
                .with_label_values(&["resolved"])
                .inc_by(outcome.resolved as u64);
            metrics::SWEEP_MESSAGES
                .with_label_values(&["skipped"])
                .inc_by(outcome.skipped as u64);
            HttpResponse::Ok().json(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "sweep run failed");
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "sweep failed" }))
        }
    }
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    // Cheap store probe; any answer (even "no such message") means the
    // backend is reachable.
    match state.engine.store().message("health-probe") {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "postbond-relay",
        })),
        Err(e) => {
            tracing::error!(error = %e, "health probe failed");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "postbond-relay",
                "error": "store unreachable",
            }))
        }
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match &state.metrics_token {
        Some(token) => {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| postbond::security::constant_time_eq(t.as_bytes(), token))
                .unwrap_or(false);

            if !authorized {
                return HttpResponse::Unauthorized().json(serde_json::json!({
                    "error": "unauthorized",
                    "message": "Valid Bearer token required for /metrics"
                }));
            }
        }
        None => {
            // No token configured — metrics stay protected by default.
            let public_metrics = std::env::var("POSTBOND_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false);
            if !public_metrics {
                return HttpResponse::Forbidden().json(serde_json::json!({
                    "error": "forbidden",
                    "message": "Set METRICS_TOKEN or POSTBOND_PUBLIC_METRICS=true to access /metrics"
                }));
            }
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}
