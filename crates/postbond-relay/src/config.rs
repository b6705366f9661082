//! Environment configuration for the relay.
//!
//! Secrets that gate money movement (`CAPABILITY_SECRET`, `WEBHOOK_SECRET`,
//! `SWEEP_SECRET`) are mandatory; the relay refuses to start without them
//! rather than running with an open surface. Provider and email credentials
//! are optional and fall back to in-process substitutes for development.

/// Everything `main` needs to wire the relay, read once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Externally reachable base URL; review links are built against it.
    pub public_base_url: String,
    pub db_path: String,
    /// Signs review-link capability tokens.
    pub link_secret: Vec<u8>,
    /// Verifies provider webhook deliveries.
    pub webhook_secret: Vec<u8>,
    /// Authorizes the external sweep trigger.
    pub sweep_secret: Vec<u8>,
    /// Hold provider credentials; absent means the simulated in-memory
    /// gateway (development only).
    pub gateway_api_url: String,
    pub gateway_secret_key: Option<String>,
    /// Email credentials; absent means review links are only logged.
    pub email_api_key: Option<String>,
    pub email_api_url: String,
    pub email_from: String,
    pub rate_limit_rpm: u64,
    /// Run the sweep in-process every this many seconds; absent means the
    /// sweep only runs when POST /api/sweep/expire is called externally.
    pub sweep_interval_secs: Option<u64>,
    pub metrics_token: Option<Vec<u8>>,
    /// Insert the demo receiver account on startup.
    pub seed_demo: bool,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("RELAY_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4030);

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let db_path =
            std::env::var("MESSAGE_DB_PATH").unwrap_or_else(|_| "./postbond.db".to_string());

        Self {
            port,
            public_base_url,
            db_path,
            link_secret: require_secret("CAPABILITY_SECRET"),
            webhook_secret: require_secret("WEBHOOK_SECRET"),
            sweep_secret: require_secret("SWEEP_SECRET"),
            gateway_api_url: std::env::var("GATEWAY_API_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.stripe.com".to_string()),
            gateway_secret_key: optional("GATEWAY_SECRET_KEY"),
            email_api_key: optional("EMAIL_API_KEY"),
            email_api_url: std::env::var("EMAIL_API_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| postbond::EmailNotifier::DEFAULT_API_URL.to_string()),
            email_from: std::env::var("EMAIL_FROM")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "Postbond <notify@postbond.localhost>".to_string()),
            rate_limit_rpm: std::env::var("RATE_LIMIT_RPM")
                .ok()
                .and_then(|r| r.parse().ok())
                .unwrap_or(120),
            sweep_interval_secs: std::env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0),
            metrics_token: optional("METRICS_TOKEN").map(String::into_bytes),
            seed_demo: std::env::var("SEED_DEMO")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn require_secret(name: &str) -> Vec<u8> {
    match optional(name) {
        Some(s) => {
            let bytes = s.into_bytes();
            if bytes.len() < 32 {
                tracing::warn!(
                    "{name} is only {} bytes (minimum 32 recommended) — \
                     use `openssl rand -hex 32` to generate a secure secret",
                    bytes.len()
                );
            }
            bytes
        }
        None => {
            tracing::error!(
                "{name} is required. Set it to a secure random value \
                 (e.g. `openssl rand -hex 32`)."
            );
            std::process::exit(1);
        }
    }
}
