use anyhow::Context;
use rentsphere_api::{app, state::{AppState, AuthConfig}};
use rentsphere_core::payment::PaymentGateway;
use rentsphere_rental::{
    BookingConfig, BookingOrchestrator, MockPaymentGateway, SettlementPolicy, SettlementReconciler,
    StripeGateway,
};
use rentsphere_store::{Config, DbClient, PgItemStore, PgProcessedEventLog, PgRentalLedger};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rentsphere_api=debug,rentsphere_rental=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting RentSphere API on port {}", config.server.port);

    let db = DbClient::new(config.database.url.expose())
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let gateway_timeout = Duration::from_millis(config.payment.timeout_ms);
    let gateway: Arc<dyn PaymentGateway> = if config.payment.use_mock {
        tracing::warn!("Using mock payment gateway; no real charges will be made");
        Arc::new(MockPaymentGateway::new(config.payment.webhook_secret.expose().clone()))
    } else {
        Arc::new(
            StripeGateway::new(
                config.payment.api_base.clone(),
                config.payment.secret_key.clone(),
                config.payment.webhook_secret.clone(),
                gateway_timeout,
                config.payment.signature_tolerance_seconds,
            )
            .context("Failed to build payment gateway client")?,
        )
    };

    let items = Arc::new(PgItemStore::new(db.pool.clone()));
    let ledger = Arc::new(PgRentalLedger::new(db.pool.clone()));
    let events = Arc::new(PgProcessedEventLog::new(db.pool.clone()));

    let orchestrator = BookingOrchestrator::new(
        items.clone(),
        ledger.clone(),
        gateway.clone(),
        BookingConfig {
            currency: config.payment.currency.clone(),
            gateway_timeout,
        },
    );

    let reconciler = SettlementReconciler::new(
        items,
        ledger,
        events,
        gateway,
        SettlementPolicy {
            item_flip_attempts: config.settlement.item_flip_attempts,
            item_flip_backoff: Duration::from_millis(config.settlement.item_flip_backoff_ms),
        },
    );

    let app_state = AppState {
        orchestrator: Arc::new(orchestrator),
        reconciler: Arc::new(reconciler),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
