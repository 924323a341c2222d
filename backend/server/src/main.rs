//! FairTrace backend — entry point.
//!
//! Serves the Axum REST API for the produce lifecycle (submission, SACCO
//! review, delivery allocation, public trace) and runs a background
//! reconciler that retries outstanding blockchain anchor submissions.

mod anchor;
mod api;
mod auth;
mod config;
mod db;
mod delivery;
mod errors;
mod hashing;
mod lifecycle;
mod models;
mod notify;
mod reconcile;
mod registration;
#[cfg(test)]
mod testutil;
mod trace;
mod wallet;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use anchor::HttpAnchorClient;
use api::AppState;
use config::Config;
use lifecycle::FarmerLocks;
use notify::LogNotifier;
use reconcile::ReconcilerState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // Bootstrap admin account, when configured.
    if let (Some(email), Some(token)) = (&config.admin_email, &config.admin_token) {
        db::ensure_admin(&pool, email, token, &models::now_rfc3339()).await?;
        info!("Admin account ensured for {email}");
    }

    // Shared collaborators.
    let anchor_client: Arc<dyn anchor::Anchor> = Arc::new(HttpAnchorClient::new(
        &config.anchor_url,
        config.anchor_timeout_secs,
    )?);
    let notifier: Arc<dyn notify::Notifier> = Arc::new(LogNotifier);

    // ─── Background anchor reconciler ─────────────────────
    let reconciler = Arc::new(ReconcilerState {
        pool: pool.clone(),
        anchor: anchor_client.clone(),
        interval_secs: config.reconcile_interval_secs,
    });
    tokio::spawn(reconcile::run(reconciler));

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(AppState {
        pool,
        anchor: anchor_client,
        notifier,
        config: config.clone(),
        farmer_locks: FarmerLocks::new(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/farmers/register", post(api::register_farmer))
        .route("/transporters/register", post(api::register_transporter))
        .route("/transporters", get(api::list_transporters))
        .route(
            "/products",
            post(api::create_product).get(api::list_my_products),
        )
        .route("/products/pending", get(api::list_pending_products))
        .route(
            "/products/:uid",
            get(api::get_product).patch(api::amend_product),
        )
        .route("/products/:uid/review", post(api::review_product))
        .route("/products/:uid/stages", post(api::append_stage))
        .route("/products/:uid/locations", post(api::append_location))
        .route("/deliveries/offers", get(api::list_delivery_offers))
        .route("/deliveries/mine", get(api::list_my_deliveries))
        .route("/deliveries/:uid/accept", post(api::accept_delivery))
        .route("/deliveries/:uid/complete", post(api::complete_delivery))
        .route("/deliveries/:uid/reject", post(api::reject_delivery))
        .route("/trace/:pid", get(api::trace_product))
        .route("/wallet", get(api::get_wallet))
        .route("/wallet/deposit", post(api::deposit))
        .route("/tips", post(api::create_tip))
        .route("/tips/received", get(api::tips_received))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
