// SPDX-License-Identifier: MIT

//! Account-linking lifecycle.
//!
//! A signed-in user is either still unlinked (no Google refresh token on
//! file) or fully linked. The state machine here decides what the client
//! should do next after sign-in, and `LinkingService` performs the actual
//! code-for-token exchange that moves a user from unlinked to linked.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{AuthStatus, Provider};
use crate::services::google::GoogleCalendarService;

/// Where a user stands in the linking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unauthenticated,
    AuthenticatedUnlinked,
    AuthenticatedLinked,
}

impl LinkState {
    pub fn from_session(signed_in: bool, google_linked: bool) -> Self {
        match (signed_in, google_linked) {
            (false, _) => LinkState::Unauthenticated,
            (true, false) => LinkState::AuthenticatedUnlinked,
            (true, true) => LinkState::AuthenticatedLinked,
        }
    }

    /// What the client should do in this state. Unlinked users are
    /// directed toward linking but not locked out of the rest of the app.
    pub fn directive(self) -> Directive {
        match self {
            LinkState::Unauthenticated => Directive::RedirectToLogin,
            LinkState::AuthenticatedUnlinked => Directive::BeginLinking,
            LinkState::AuthenticatedLinked => Directive::GoToDashboard,
        }
    }
}

/// Post-sign-in action for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    RedirectToLogin,
    BeginLinking,
    GoToDashboard,
}

/// One-shot gate around the sign-in notification.
///
/// Identity providers re-fire their sign-in callback on every token
/// refresh; only the first sign-in of a session may carry a navigation
/// directive, or the user would be yanked back to the dashboard mid-task.
pub fn sign_in_directive(already_signed_in: bool, state: LinkState) -> Option<Directive> {
    if already_signed_in {
        return None;
    }
    Some(state.directive())
}

/// Performs the linking exchange and owns the single authorization read.
#[derive(Clone)]
pub struct LinkingService {
    db: FirestoreDb,
    google: GoogleCalendarService,
}

impl LinkingService {
    pub fn new(db: FirestoreDb, google: GoogleCalendarService) -> Self {
        Self { db, google }
    }

    /// The one place authorization flags are read for session decisions.
    ///
    /// Missing status doc means a brand-new user: nothing linked yet.
    pub async fn check_authorization(&self, uid: &str) -> Result<AuthStatus, AppError> {
        Ok(self.db.get_auth_status(uid).await?.unwrap_or_default())
    }

    /// Complete linking: exchange the popup authorization code, persist
    /// the refresh token, and flip the auth flag.
    ///
    /// Errors propagate to the caller, which drops the session so the
    /// user restarts sign-in from a clean slate.
    pub async fn complete_linking(&self, uid: &str, code: &str) -> Result<(), AppError> {
        let tokens = self.google.client().exchange_code(code).await?;

        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            AppError::GoogleApi(
                "Token exchange returned no refresh token; consent may have been reused"
                    .to_string(),
            )
        })?;

        self.db.set_google_token(uid, &refresh_token).await?;
        self.db
            .set_provider_status(uid, Provider::Google, true)
            .await?;

        tracing::info!(uid, "Google account linked");
        Ok(())
    }
}
