// SPDX-License-Identifier: MIT

use gradesync::config::Config;
use gradesync::db::FirestoreDb;
use gradesync::routes::create_router;
use gradesync::services::{
    google::GoogleCalendarService, gradescope::GradescopeService, identity::IdentityVerifier,
    lifecycle::LinkingService, sync::SyncService,
};
use gradesync::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

/// Create a test app with offline mock dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let identity = IdentityVerifier::new(&config.google_client_id).expect("identity verifier");
    create_test_app_with_identity(identity)
}

/// Same as [`create_test_app`] but with a caller-supplied identity
/// verifier, so sign-in flows can run against a static test key.
#[allow(dead_code)]
pub fn create_test_app_with_identity(identity: IdentityVerifier) -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let db = test_db_offline();
    let identity = Arc::new(identity);

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
    let sync = SyncService::new(db.clone(), google.clone(), gradescope.clone());

    let state = Arc::new(AppState {
        config,
        db,
        identity,
        google,
        gradescope,
        linking,
        sync,
    });

    (create_router(state.clone()), state)
}
