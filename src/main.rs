use anyhow::Context;
use payrail_backend::api::{build_router, AppState};
use payrail_backend::config::{AppConfig, LogFormat, LoggingConfig};
use payrail_backend::database::{self, PgPaymentStore};
use payrail_backend::gateways::client::PaymentGateway;
use payrail_backend::gateways::circuit::ResilientGateway;
use payrail_backend::gateways::providers::{FlutterwaveGateway, PaystackGateway};
use payrail_backend::services::idempotency::{
    IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore,
};
use payrail_backend::services::orders::PgOrderService;
use payrail_backend::services::payment_orchestrator::PaymentOrchestrator;
use payrail_backend::services::webhook_processor::WebhookProcessor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);

    let pool = database::init_pool_from_config(&config.database)
        .await
        .context("failed to initialize database pool")?;
    database::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let idempotency: Arc<dyn IdempotencyStore> = match &config.idempotency.redis_url {
        Some(url) => {
            let ttl = Duration::from_secs(config.idempotency.key_ttl_secs);
            let store = RedisIdempotencyStore::connect(url, ttl)
                .await
                .context("failed to connect to redis")?;
            info!("using redis idempotency store");
            Arc::new(store)
        }
        None => {
            warn!("REDIS_URL not set; idempotency keys are process-local");
            Arc::new(InMemoryIdempotencyStore::new(Duration::from_secs(
                config.idempotency.key_ttl_secs,
            )))
        }
    };

    let mut gateways: Vec<Arc<dyn PaymentGateway>> = Vec::new();
    match PaystackGateway::from_env() {
        Ok(gateway) => gateways.push(Arc::new(ResilientGateway::new(
            Arc::new(gateway),
            config.circuit.clone(),
        ))),
        Err(e) => warn!("paystack gateway not configured: {}", e),
    }
    match FlutterwaveGateway::from_env() {
        Ok(gateway) => gateways.push(Arc::new(ResilientGateway::new(
            Arc::new(gateway),
            config.circuit.clone(),
        ))),
        Err(e) => warn!("flutterwave gateway not configured: {}", e),
    }
    anyhow::ensure!(
        !gateways.is_empty(),
        "at least one payment gateway must be configured"
    );
    info!(
        gateways = gateways.len(),
        "payment gateways initialized"
    );

    let payments = Arc::new(PgPaymentStore::new(pool.clone()));
    let orders = Arc::new(PgOrderService::new(pool.clone()));
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways.clone(),
        payments,
        orders,
        idempotency,
    ));
    let webhooks = Arc::new(WebhookProcessor::new(gateways, orchestrator.clone()));

    let app = build_router(AppState {
        orchestrator,
        webhooks,
        pool: Some(pool),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    } else {
        info!("shutdown signal received");
    }
}
