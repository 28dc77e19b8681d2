// SPDX-License-Identifier: MIT

//! Gradesync API Server
//!
//! Links a Google account and a Gradescope session per user, then keeps
//! assignment deadlines synced into the user's chosen Google Calendar.

use gradesync::{
    config::Config,
    db::FirestoreDb,
    services::{
        google::GoogleCalendarService, gradescope::GradescopeService, identity::IdentityVerifier,
        lifecycle::LinkingService, sync,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Gradesync API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    let identity =
        Arc::new(IdentityVerifier::new(&config.google_client_id).expect("identity verifier"));

    // Shared token cache and refresh locks for this instance
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let google = GoogleCalendarService::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        db.clone(),
        token_cache,
        refresh_locks,
    );
    let gradescope = GradescopeService::new(db.clone());
    let linking = LinkingService::new(db.clone(), google.clone());
    let sync_service = sync::SyncService::new(db.clone(), google.clone(), gradescope.clone());

    // Background refresh sweep; 0 disables it
    if config.refresh_interval_secs > 0 {
        tracing::info!(
            interval_secs = config.refresh_interval_secs,
            "Starting background refresh scheduler"
        );
        tokio::spawn(sync::run_scheduler(
            sync_service.clone(),
            db.clone(),
            config.refresh_interval_secs,
        ));
    }

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        identity,
        google,
        gradescope,
        linking,
        sync: sync_service,
    });

    // Build router
    let app = gradesync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gradesync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
