use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use postbond::{
    run_sweep, AnyGateway, AnyNotifier, CapabilitySigner, EmailNotifier, Engine, EscrowAccount,
    HttpGateway, InMemoryGateway, LogNotifier, MessageStore, SqliteMessageStore, StoreError,
    WebhookIngestor, SWEEP_BATCH_LIMIT,
};
use postbond_relay::config::RelayConfig;
use postbond_relay::routes;
use postbond_relay::state::AppState;

/// Insert the demo receiver account unless one already exists.
fn seed_demo_account(store: &dyn MessageStore) {
    let owner_email = std::env::var("DEMO_RECEIVER_EMAIL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "demo@local.test".to_string());

    let account = EscrowAccount {
        id: "acct-demo".to_string(),
        slug: "demo".to_string(),
        owner_email,
        display_name: Some("Demo User".to_string()),
        min_bond_cents: 500,
        max_bond_cents: 1_500,
        allow_boost: true,
        timeout_hours: 72,
        created_at: chrono::Utc::now(),
    };
    match store.insert_account(&account) {
        Ok(()) => tracing::info!(slug = %account.slug, "seeded demo account"),
        Err(StoreError::Duplicate(_)) => {
            tracing::info!(slug = %account.slug, "demo account already present")
        }
        Err(e) => tracing::error!(error = %e, "failed to seed demo account"),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env();

    let store: Arc<dyn MessageStore> = match SqliteMessageStore::open(&config.db_path) {
        Ok(store) => {
            tracing::info!("Message store: SQLite at {}", config.db_path);
            Arc::new(store)
        }
        Err(e) => {
            // CRITICAL: no in-memory fallback. Escrow rows must survive a
            // restart or resolved messages could be resolved again.
            tracing::error!("Failed to open SQLite message store at {}: {e}", config.db_path);
            tracing::error!("Refusing to start — escrow state must be durable");
            std::process::exit(1);
        }
    };

    if config.seed_demo {
        seed_demo_account(store.as_ref());
    }

    let gateway = match &config.gateway_secret_key {
        Some(key) => {
            tracing::info!("Hold gateway: {}", config.gateway_api_url);
            AnyGateway::Http(HttpGateway::new(&config.gateway_api_url, key))
        }
        None => {
            tracing::warn!(
                "GATEWAY_SECRET_KEY not set — using the in-memory gateway; \
                 holds are simulated and lost on restart (development only)"
            );
            AnyGateway::InMemory(InMemoryGateway::new())
        }
    };

    let notifier = match &config.email_api_key {
        Some(key) => {
            tracing::info!("Receiver notifier: email via {}", config.email_api_url);
            AnyNotifier::Email(EmailNotifier::new(
                &config.email_api_url,
                key,
                &config.email_from,
            ))
        }
        None => {
            tracing::warn!("EMAIL_API_KEY not set — review links are logged, not emailed");
            AnyNotifier::Log(LogNotifier)
        }
    };

    let engine = Arc::new(Engine::new(store, gateway));
    let signer = CapabilitySigner::new(config.link_secret.clone());
    let ingestor = WebhookIngestor::new(
        Arc::clone(&engine),
        notifier,
        config.webhook_secret.clone(),
        signer.clone(),
        config.public_base_url.clone(),
    );

    // Optional in-process sweep schedule; deployments with an external
    // scheduler leave this unset and call POST /api/sweep/expire instead.
    if let Some(secs) = config.sweep_interval_secs {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
            loop {
                interval.tick().await;
                match run_sweep(engine.as_ref(), SWEEP_BATCH_LIMIT).await {
                    Ok(outcome) if outcome.checked > 0 => {
                        tracing::info!(
                            checked = outcome.checked,
                            resolved = outcome.resolved,
                            skipped = outcome.skipped,
                            "scheduled sweep"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "scheduled sweep failed"),
                }
            }
        });
        tracing::info!("In-process sweep every {secs}s");
    }

    let state = web::Data::new(AppState {
        engine,
        ingestor,
        signer,
        public_base_url: config.public_base_url.clone(),
        sweep_secret: Some(config.sweep_secret.clone()),
        metrics_token: config.metrics_token.clone(),
    });

    tracing::info!("Postbond relay listening on port {}", config.port);
    tracing::info!("Public base URL: {}", config.public_base_url);
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  POST http://localhost:{}/api/pages/{{slug}}/messages", config.port);
    tracing::info!("  POST http://localhost:{}/hooks/gateway", config.port);
    tracing::info!("  POST http://localhost:{}/api/sweep/expire", config.port);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::intake)
            .service(routes::request_hold)
            .service(routes::view_message)
            .service(routes::accept)
            .service(routes::release)
            .service(routes::gateway_webhook)
            .service(routes::sweep_expire)
    })
    .bind(("0.0.0.0", config.port))?
    .run()
    .await
}
