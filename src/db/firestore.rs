// SPDX-License-Identifier: MIT

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - User profiles
//! - Auth status flags (per provider)
//! - Third-party credentials
//! - Settings (calendar selection, colors, courses)
//! - Assignment caches

use crate::db::collections;
use crate::error::AppError;
use crate::models::{
    AssignmentCache, AuthStatus, GoogleCredentials, GradescopeCredentials, Provider,
    UserCredentials, UserProfile, UserSettings,
};

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    /// Point read of one document as a typed object.
    async fn get_doc<T>(&self, collection: &str, uid: &str) -> Result<Option<T>, AppError>
    where
        T: for<'de> serde::Deserialize<'de> + Send,
    {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(uid)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Point write (create or replace) of one document.
    async fn set_doc<T>(&self, collection: &str, uid: &str, value: &T) -> Result<(), AppError>
    where
        T: serde::Serialize + for<'de> serde::Deserialize<'de> + Sync + Send,
    {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collection)
            .document_id(uid)
            .object(value)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── User Operations ─────────────────────────────────────────

    pub async fn get_user_profile(&self, uid: &str) -> Result<Option<UserProfile>, AppError> {
        self.get_doc(collections::USERS, uid).await
    }

    pub async fn upsert_user_profile(&self, profile: &UserProfile) -> Result<(), AppError> {
        self.set_doc(collections::USERS, &profile.uid, profile).await
    }

    /// List all known user ids (for the background refresh sweep).
    pub async fn list_user_ids(&self) -> Result<Vec<String>, AppError> {
        let profiles: Vec<UserProfile> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::USERS)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(profiles.into_iter().map(|p| p.uid).collect())
    }

    // ─── Auth Status Operations ──────────────────────────────────

    /// Get the per-provider link flags for a user.
    pub async fn get_auth_status(&self, uid: &str) -> Result<Option<AuthStatus>, AppError> {
        self.get_doc(collections::AUTH_STATUS, uid).await
    }

    /// Set one provider's link flag, preserving the other.
    pub async fn set_provider_status(
        &self,
        uid: &str,
        provider: Provider,
        linked: bool,
    ) -> Result<(), AppError> {
        let mut status = self.get_auth_status(uid).await?.unwrap_or_default();
        status.set(provider, linked);
        self.set_doc(collections::AUTH_STATUS, uid, &status).await
    }

    // ─── Credential Operations ───────────────────────────────────

    pub async fn get_credentials(&self, uid: &str) -> Result<Option<UserCredentials>, AppError> {
        self.get_doc(collections::CREDENTIALS, uid).await
    }

    /// Store the Google refresh token, preserving Gradescope credentials.
    pub async fn set_google_token(&self, uid: &str, refresh_token: &str) -> Result<(), AppError> {
        let mut credentials = self.get_credentials(uid).await?.unwrap_or_default();
        credentials.google = Some(GoogleCredentials {
            token: refresh_token.to_string(),
        });
        self.set_doc(collections::CREDENTIALS, uid, &credentials)
            .await
    }

    /// Store Gradescope credentials, preserving the Google token.
    ///
    /// Writing a credential set without email/password also clears any
    /// previously stored email/password.
    pub async fn set_gradescope_credentials(
        &self,
        uid: &str,
        gradescope: &GradescopeCredentials,
    ) -> Result<(), AppError> {
        let mut credentials = self.get_credentials(uid).await?.unwrap_or_default();
        credentials.gradescope = Some(gradescope.clone());
        self.set_doc(collections::CREDENTIALS, uid, &credentials)
            .await
    }

    // ─── Settings Operations ─────────────────────────────────────

    pub async fn get_settings(&self, uid: &str) -> Result<Option<UserSettings>, AppError> {
        self.get_doc(collections::SETTINGS, uid).await
    }

    /// Write the full settings document in one store write.
    pub async fn set_settings(&self, uid: &str, settings: &UserSettings) -> Result<(), AppError> {
        self.set_doc(collections::SETTINGS, uid, settings).await
    }

    /// Update only the stored calendar selection.
    pub async fn set_calendar_id(&self, uid: &str, calendar_id: &str) -> Result<(), AppError> {
        let mut settings = self.get_settings(uid).await?.unwrap_or_default();
        settings.calendar_id = Some(calendar_id.to_string());
        self.set_settings(uid, &settings).await
    }

    /// Replace the stored course list, leaving the rest of settings intact.
    pub async fn set_courses(
        &self,
        uid: &str,
        courses: std::collections::BTreeMap<String, crate::models::CourseSettings>,
    ) -> Result<(), AppError> {
        let mut settings = self.get_settings(uid).await?.unwrap_or_default();
        settings.courses = courses;
        self.set_settings(uid, &settings).await
    }

    // ─── Assignment Cache Operations ─────────────────────────────

    pub async fn get_assignment_cache(&self, uid: &str) -> Result<Option<AssignmentCache>, AppError> {
        self.get_doc(collections::ASSIGNMENTS, uid).await
    }

    pub async fn set_assignment_cache(
        &self,
        uid: &str,
        cache: &AssignmentCache,
    ) -> Result<(), AppError> {
        self.set_doc(collections::ASSIGNMENTS, uid, cache).await
    }

    // ─── Snapshot Export ─────────────────────────────────────────

    /// Fetch one per-user subtree as raw JSON for data export.
    pub async fn get_subtree_json(
        &self,
        collection: &str,
        uid: &str,
    ) -> Result<Option<serde_json::Value>, AppError> {
        self.get_doc(collection, uid).await
    }

    // ─── User Data Deletion ──────────────────────────────────────

    /// The store paths removed when a user's account is deleted.
    pub fn user_data_paths(uid: &str) -> Vec<String> {
        collections::USER_DATA
            .iter()
            .map(|collection| format!("{}/{}", collection, uid))
            .collect()
    }

    /// Delete ALL data for a user (best-effort cascade).
    ///
    /// Each subtree is deleted independently; a failure on one path is
    /// logged and never blocks the others. There is no retry. Returns the
    /// number of paths deleted successfully.
    pub async fn delete_user_data(&self, uid: &str) -> Result<usize, AppError> {
        let client = self.get_client()?;
        let mut deleted_count = 0;

        for collection in collections::USER_DATA {
            let result = client
                .fluent()
                .delete()
                .from(collection)
                .document_id(uid)
                .execute()
                .await;

            match result {
                Ok(()) => {
                    deleted_count += 1;
                    tracing::debug!(uid, collection, "Deleted user subtree");
                }
                Err(e) => {
                    tracing::warn!(uid, collection, error = %e, "Failed to delete user subtree");
                }
            }
        }

        tracing::info!(uid, deleted_count, "User data deletion complete");
        Ok(deleted_count)
    }
}
