// SPDX-License-Identifier: MIT

//! Session routes: Google sign-in and logout.

use axum::{extract::State, routing::post, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, Claims, SESSION_COOKIE};
use crate::models::{AuthStatus, UserProfile};
use crate::services::identity::IdentityError;
use crate::services::lifecycle::{self, Directive, LinkState};
use crate::AppState;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/config", axum::routing::get(auth_config))
        .route("/auth/session", post(create_session))
        .route("/auth/logout", post(logout))
}

#[derive(Serialize)]
pub struct AuthConfigResponse {
    pub google_client_id: String,
    pub oauth_scopes: &'static str,
}

/// Public OAuth parameters the frontend needs to start sign-in and the
/// linking popup.
async fn auth_config(State(state): State<Arc<AppState>>) -> Json<AuthConfigResponse> {
    Json(AuthConfigResponse {
        google_client_id: state.config.google_client_id.clone(),
        oauth_scopes: crate::services::google::OAUTH_SCOPES,
    })
}

#[derive(Deserialize)]
pub struct SessionRequest {
    /// Google ID token from the sign-in popup.
    id_token: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub uid: String,
    pub auth_status: AuthStatus,
    /// Where the client should navigate. Absent on sign-in callbacks that
    /// merely refreshed an existing session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<Directive>,
}

/// Exchange a Google ID token for a session cookie.
///
/// The authorization flags come from a single store read; any failure of
/// that read fails the whole sign-in rather than guessing at link state.
async fn create_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<SessionRequest>,
) -> Result<(CookieJar, Json<SessionResponse>)> {
    let identity = state
        .identity
        .verify_id_token(&body.id_token)
        .await
        .map_err(|e| match e {
            IdentityError::Rejected(reason) => {
                tracing::info!(reason = %reason, "Sign-in token rejected");
                AppError::InvalidToken
            }
            IdentityError::Transient(reason) => AppError::GoogleApi(reason),
        })?;

    let now = chrono::Utc::now().to_rfc3339();
    let profile = match state.db.get_user_profile(&identity.uid).await? {
        Some(mut existing) => {
            existing.email = identity.email.clone().or(existing.email);
            existing.display_name = identity.display_name.clone().or(existing.display_name);
            existing.last_active = now;
            existing
        }
        None => UserProfile {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            created_at: now.clone(),
            last_active: now,
        },
    };
    state.db.upsert_user_profile(&profile).await?;

    let auth_status = state.linking.check_authorization(&identity.uid).await?;

    // A sign-in callback with a still-valid session for the same user is a
    // token refresh, not a fresh sign-in; it must not trigger navigation.
    let already_signed_in = jar
        .get(SESSION_COOKIE)
        .map(|cookie| {
            decode::<Claims>(
                cookie.value(),
                &DecodingKey::from_secret(&state.config.jwt_signing_key),
                &Validation::new(Algorithm::HS256),
            )
            .map(|data| data.claims.sub == identity.uid)
            .unwrap_or(false)
        })
        .unwrap_or(false);

    let link_state = LinkState::from_session(true, auth_status.google);
    let directive = lifecycle::sign_in_directive(already_signed_in, link_state);

    let jwt = create_jwt(&identity.uid, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    tracing::info!(
        uid = %identity.uid,
        google_linked = auth_status.google,
        gradescope_linked = auth_status.gradescope,
        "Session created"
    );

    Ok((
        jar.add(session_cookie(jwt, &state.config.frontend_url)),
        Json(SessionResponse {
            uid: identity.uid,
            auth_status,
            directive,
        }),
    ))
}

/// Drop the session cookie.
async fn logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    (
        jar.remove(Cookie::build(SESSION_COOKIE).path("/")),
        Json(serde_json::json!({ "status": "ok" })),
    )
}

/// Build the session cookie.
///
/// `Secure` is keyed off the frontend URL so local development over plain
/// HTTP still gets a cookie the browser will send back.
pub fn session_cookie(jwt: String, frontend_url: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, jwt))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(frontend_url.starts_with("https://"))
        .build()
}

/// Cookie removal used anywhere a failed operation must end the session.
pub fn clear_session_cookie(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_is_http_only_and_scoped_to_root() {
        let cookie = session_cookie("tok".to_string(), "https://app.example.com");
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[test]
    fn local_dev_cookie_is_not_secure() {
        let cookie = session_cookie("tok".to_string(), "http://localhost:5173");
        assert_eq!(cookie.secure(), Some(false));
    }
}
