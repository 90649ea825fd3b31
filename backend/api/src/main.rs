//! BlueGreen API: entry point.
//!
//! Serves the NGO and admin REST API and runs a background task that
//! finishes ledger submissions left unconfirmed by their request.

mod abi;
mod api;
mod auth;
mod config;
mod db;
mod errors;
#[cfg(test)]
mod invariants;
mod ledger;
mod models;
mod rpc;
mod signer;
mod sync;
mod workflow;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use api::AppState;
use auth::TokenIssuer;
use config::Config;
use ledger::Ledger;
use rpc::RpcLedger;
use sync::SyncState;
use workflow::{ApprovalService, WorkflowSettings};

/// Extra quiet time, on top of the longest possible ledger write, before the
/// sync task touches a submission.
const SYNC_SETTLE_MARGIN: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    let client = Client::builder()
        .timeout(config.ledger.request_timeout)
        .build()?;
    let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::init(client, config.ledger.clone()).await?);

    let service = ApprovalService::new(
        pool.clone(),
        ledger.clone(),
        WorkflowSettings {
            default_credits_per_image: config.default_credits_per_image,
        },
    );
    let tokens = TokenIssuer::new(config.jwt_secret.clone())?;

    // ─── Background ledger sync ───────────────────────────
    let shutdown = CancellationToken::new();
    let sync_task = tokio::spawn(sync::run(
        SyncState {
            pool: pool.clone(),
            service: service.clone(),
            interval: Duration::from_secs(config.sync_interval_secs),
            settle: rpc::max_write_duration(&config.ledger) + SYNC_SETTLE_MARGIN,
        },
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(AppState {
        pool,
        service,
        tokens,
        signer: config.ledger.signer.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/api/user/register", post(api::register_user))
        .route("/api/user/login", post(api::login_user))
        .route("/api/user/user", get(api::user_profile))
        .route("/api/user/projects", post(api::submit_project))
        .route("/api/user/dashData", post(api::dashboard))
        .route("/api/admin/signup", post(api::admin_signup))
        .route("/api/admin/login", post(api::admin_login))
        .route("/api/admin/ngo-projects", get(api::pending_ngo_projects))
        .route("/api/admin/projects", post(api::project_details))
        .route("/api/admin/images", post(api::images_by_id))
        .route("/api/admin/images/approve", post(api::approve_image))
        .route("/api/admin/images/reject", post(api::reject_image))
        .route(
            "/api/admin/projects/approve-onchain",
            post(api::approve_project),
        )
        .route(
            "/api/admin/transaction/image/:image_id",
            get(api::image_transaction),
        )
        .route("/api/admin/onchain/image", get(api::onchain_image))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = sync_task.await;
    ledger.shutdown().await;
    info!("Shut down cleanly");

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    token.cancel();
}
