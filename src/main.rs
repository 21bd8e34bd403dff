use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{anyhow, Context};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use streaming_rewards_service::services::settlement::{HttpLedgerClient, RewardConfig};
use streaming_rewards_service::services::streaming::repository::StreamRepository;
use streaming_rewards_service::services::streaming::{
    InMemoryStreamRepository, PgStreamRepository,
};
use streaming_rewards_service::{handlers, AppState, Config};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .init();

    let config = Config::from_env().map_err(|e| anyhow!("Failed to load config: {e}"))?;

    let repo: Arc<dyn StreamRepository> = match &config.database.url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("PostgreSQL store enabled");
            Arc::new(PgStreamRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, continuing with in-memory store");
            Arc::new(InMemoryStreamRepository::new())
        }
    };

    let ledger = Arc::new(
        HttpLedgerClient::new(
            &config.ledger.gateway_url,
            Duration::from_secs(config.ledger.request_timeout_secs),
        )
        .map_err(|e| anyhow!("Failed to build ledger client: {e}"))?,
    );
    info!(gateway_url = %config.ledger.gateway_url, "Ledger gateway client ready");

    let (state, _settlement_worker) = AppState::build(
        repo,
        ledger,
        RewardConfig::default(),
        config.settlement.to_settlement_config(),
    );

    // Periodic sweep for entries left Pending by timeouts or restarts.
    let reconcile_interval = config.settlement.reconcile_interval();
    let reconcile_dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconcile_dispatcher.reconcile_pending().await {
                Ok(0) => {}
                Ok(confirmed) => info!(confirmed, "Reconcile pass confirmed settlements"),
                Err(e) => error!(error = ?e, "Reconcile pass failed"),
            }
        }
    });

    let bind_addr = format!("{}:{}", config.app.host, config.app.port);
    info!(%bind_addr, "Starting streaming-rewards-service");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind on {bind_addr}"))?
    .run()
    .await
    .context("HTTP server error")?;

    Ok(())
}
