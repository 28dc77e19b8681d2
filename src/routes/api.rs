// SPDX-License-Identifier: MIT

//! Protected API routes.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{AuthStatus, CourseSettings, UserSettings};
use crate::routes::auth::clear_session_cookie;
use crate::services::google::calendar_is_usable;
use crate::services::reconciler::{
    self, CalendarOption, ColorPalette, CourseColorRow, ExportFile,
};
use crate::services::sync::SyncOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/oauth_callback", post(oauth_callback))
        .route("/api/update_gradescope_token", post(update_gradescope_token))
        .route("/api/refresh_course_list", post(refresh_course_list))
        .route("/api/refresh_events", post(refresh_events))
        .route("/api/dashboard", get(dashboard))
        .route("/api/settings", put(save_settings))
        .route("/api/export", get(export_data))
        .route("/api/account", delete(delete_account))
}

// ─── Account linking ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OauthCallbackRequest {
    /// Authorization code from the Google consent popup.
    code: String,
}

/// Finish Google account linking.
///
/// A failed exchange also drops the session cookie: the client restarts
/// from sign-in rather than retrying with half-established state.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
    Json(body): Json<OauthCallbackRequest>,
) -> Response {
    match state.linking.complete_linking(&user.uid, &body.code).await {
        Ok(()) => Json(json!({ "status": "linked" })).into_response(),
        Err(e) => {
            tracing::warn!(uid = %user.uid, error = %e, "Linking failed, ending session");
            (clear_session_cookie(jar), e.into_response()).into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct GradescopeLinkRequest {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    /// Keep the password server-side for automatic session renewal.
    #[serde(default)]
    store_credentials: bool,
}

#[derive(Serialize)]
pub struct GradescopeLinkResponse {
    pub success: bool,
    pub auth_status: AuthStatus,
    /// When the session will lapse. Absent when a stored password lets the
    /// server renew it on its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

/// Validate and store Gradescope credentials.
async fn update_gradescope_token(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<GradescopeLinkRequest>,
) -> Result<Json<GradescopeLinkResponse>> {
    let expiration = state
        .gradescope
        .link(
            &user.uid,
            body.token.as_deref(),
            body.email.as_deref(),
            body.password.as_deref(),
            body.store_credentials,
        )
        .await?;

    let auth_status = state.linking.check_authorization(&user.uid).await?;
    Ok(Json(GradescopeLinkResponse {
        success: true,
        auth_status,
        expiration,
    }))
}

// ─── Sync operations ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct CourseListResponse {
    pub courses: BTreeMap<String, CourseSettings>,
}

/// Re-fetch the course list from Gradescope.
async fn refresh_course_list(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<CourseListResponse>> {
    let courses = state.sync.refresh_course_list(&user.uid).await?;
    Ok(Json(CourseListResponse { courses }))
}

/// Run the full assignment-to-calendar sync.
async fn refresh_events(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SyncOutcome>> {
    let outcome = state.sync.refresh_events(&user.uid).await?;
    Ok(Json(outcome))
}

// ─── Dashboard ───────────────────────────────────────────────────

#[derive(Serialize)]
pub struct DashboardResponse {
    pub auth_status: AuthStatus,
    pub calendars: Vec<CalendarOption>,
    /// Empty string when nothing is selected.
    pub selected_calendar_id: String,
    pub palette: ColorPalette,
    pub completed_assignment_color: String,
    pub courses: Vec<CourseColorRow>,
}

/// Assemble the dashboard view.
///
/// The calendar list and color palette are independent fetches and run
/// concurrently; the pages inside the calendar list still arrive in
/// sequence. Drift between the stored calendar selection and the live
/// list is repaired here, including the store writeback.
async fn dashboard(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DashboardResponse>> {
    let auth_status = state.linking.check_authorization(&user.uid).await?;

    // Without a linked Google account there is nothing to fetch; the
    // client sees the flags and starts the linking flow.
    if !auth_status.google {
        return Ok(Json(DashboardResponse {
            auth_status,
            calendars: Vec::new(),
            selected_calendar_id: String::new(),
            palette: ColorPalette::new(),
            completed_assignment_color: String::new(),
            courses: Vec::new(),
        }));
    }

    // The settings read and both Google fetches are independent and run
    // concurrently; only the pages within the calendar list are ordered.
    let (calendars, palette, settings) = tokio::join!(
        state.google.list_calendars(&user.uid),
        state.google.event_palette(&user.uid),
        state.db.get_settings(&user.uid),
    );
    let calendars = calendars?;
    let palette = palette?;
    let settings = settings?.unwrap_or_default();

    reconciler::ensure_palette(&palette)?;

    let options: Vec<CalendarOption> = calendars
        .iter()
        .filter(|entry| calendar_is_usable(entry))
        .map(CalendarOption::from)
        .collect();

    let selection =
        reconciler::reconcile_selected_calendar(settings.calendar_id.as_deref(), &options);
    if selection.needs_writeback {
        state.db.set_calendar_id(&user.uid, "").await?;
    }

    let courses = reconciler::course_color_rows(&settings.courses, &palette)?;
    let completed_assignment_color = reconciler::effective_color(
        settings.completed_assignment_color.as_deref(),
        &palette,
        false,
    );

    Ok(Json(DashboardResponse {
        auth_status,
        calendars: options,
        selected_calendar_id: selection.selected,
        palette,
        completed_assignment_color,
        courses,
    }))
}

// ─── Settings ────────────────────────────────────────────────────

/// Save the settings document.
///
/// The chosen calendar is re-validated against the live account before
/// anything is written; color values are coerced onto the palette.
async fn save_settings(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<UserSettings>,
) -> Result<Json<UserSettings>> {
    if let Some(calendar_id) = body.calendar_id.as_deref().filter(|id| !id.is_empty()) {
        if !state
            .google
            .validate_calendar_id(&user.uid, calendar_id)
            .await?
        {
            return Err(AppError::CalendarSelection);
        }
    }

    let palette = state.google.event_palette(&user.uid).await?;
    reconciler::ensure_palette(&palette)?;

    let sanitized = reconciler::sanitize_settings(body, &palette);
    state.db.set_settings(&user.uid, &sanitized).await?;

    Ok(Json(sanitized))
}

// ─── Export and deletion ─────────────────────────────────────────

#[derive(Serialize)]
pub struct ExportResponse {
    pub files: Vec<ExportFile>,
}

/// Export every stored snapshot of the user's data.
async fn export_data(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ExportResponse>> {
    let files = reconciler::export_snapshots(&state.db, &user.uid).await;
    Ok(Json(ExportResponse { files }))
}

/// Delete the account: revoke what can be revoked, cascade-delete every
/// stored subtree, and end the session. Each step is independent so one
/// failure cannot strand the rest of the data.
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>)> {
    if let Err(e) = state.gradescope.revoke_session(&user.uid).await {
        tracing::warn!(uid = %user.uid, error = %e, "Gradescope session revocation failed");
    }
    state.google.forget_cached_token(&user.uid);

    let deleted = state.db.delete_user_data(&user.uid).await?;

    tracing::info!(uid = %user.uid, deleted, "Account deleted");

    Ok((
        clear_session_cookie(jar),
        Json(json!({ "status": "deleted", "subtrees_deleted": deleted })),
    ))
}
