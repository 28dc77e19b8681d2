// SPDX-License-Identifier: MIT

//! Google Calendar API client.
//!
//! Handles:
//! - OAuth code exchange and refresh-token grants
//! - Calendar list retrieval with sequential pagination
//! - Event color palette retrieval
//! - Calendar validation and event insert/patch

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Scopes requested during linking: read-only calendar list, read-write events.
pub const OAUTH_SCOPES: &str = "https://www.googleapis.com/auth/calendar.calendarlist.readonly \
     https://www.googleapis.com/auth/calendar.events";

/// Google Calendar API client.
#[derive(Clone)]
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GoogleCalendarClient {
    /// Create a new client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
            token_url: OAUTH_TOKEN_URL.to_string(),
            client_id,
            client_secret,
        }
    }

    /// Exchange a popup-flow authorization code for tokens.
    ///
    /// The popup code flow uses the fixed `postmessage` redirect URI.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenExchangeResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", "postmessage"),
            ])
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Google token exchange failed");
            return Err(AppError::GoogleApi(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse token response: {}", e)))
    }

    /// Redeem a refresh token for a fresh access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                return Err(AppError::GoogleApi(format!(
                    "{}: invalid_grant",
                    AppError::GOOGLE_TOKEN_ERROR
                )));
            }
            return Err(AppError::GoogleApi(format!(
                "Token refresh failed with status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Failed to parse refresh response: {}", e)))
    }

    /// Fetch the full calendar list, following page tokens sequentially.
    ///
    /// Each page is fetched only after the previous one resolved; page
    /// tokens are only valid in sequence, so this must never be
    /// parallelized. The list is fully materialized before it is returned.
    pub async fn list_calendars(
        &self,
        access_token: &str,
    ) -> Result<Vec<CalendarEntry>, AppError> {
        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .list_calendars_page(access_token, page_token.as_deref())
                .await?;

            let done = is_last_page(&page);
            page_token = page.next_page_token.clone();
            calendars.extend(page.items);

            if done {
                break;
            }
        }

        Ok(calendars)
    }

    /// Fetch a single page of the calendar list.
    async fn list_calendars_page(
        &self,
        access_token: &str,
        page_token: Option<&str>,
    ) -> Result<CalendarListPage, AppError> {
        let url = format!("{}/users/me/calendarList", self.api_base);

        let mut request = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("minAccessRole", "writer")]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Get one calendar-list entry, or None if the calendar does not exist.
    pub async fn get_calendar(
        &self,
        access_token: &str,
        calendar_id: &str,
    ) -> Result<Option<CalendarEntry>, AppError> {
        let url = format!(
            "{}/users/me/calendarList/{}",
            self.api_base,
            urlencoding::encode(calendar_id)
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        let entry = self.check_response_json(response).await?;
        Ok(Some(entry))
    }

    /// Fetch the event color palette.
    pub async fn get_event_palette(
        &self,
        access_token: &str,
    ) -> Result<BTreeMap<String, PaletteColor>, AppError> {
        let url = format!("{}/colors", self.api_base);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        let colors: ColorsResponse = self.check_response_json(response).await?;
        Ok(colors.event)
    }

    /// Insert an event and return its id.
    pub async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventPayload,
    ) -> Result<String, AppError> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        let created: CreatedEvent = self.check_response_json(response).await?;
        Ok(created.id)
    }

    /// Patch an existing event.
    pub async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventPayload,
    ) -> Result<(), AppError> {
        let url = format!(
            "{}/calendars/{}/events/{}",
            self.api_base,
            urlencoding::encode(calendar_id),
            urlencoding::encode(event_id)
        );

        let response = self
            .http
            .patch(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        self.check_response(response).await
    }

    /// Check response status and return error if not successful.
    async fn check_response(&self, response: reqwest::Response) -> Result<(), AppError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 {
            return Err(AppError::GoogleApi(AppError::GOOGLE_TOKEN_ERROR.to_string()));
        }

        Err(AppError::GoogleApi(format!("HTTP {}: {}", status, body)))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 {
                return Err(AppError::GoogleApi(AppError::GOOGLE_TOKEN_ERROR.to_string()));
            }

            return Err(AppError::GoogleApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("JSON parse error: {}", e)))
    }
}

/// A page has no successor when it carries no token, an empty token, or no items.
fn is_last_page(page: &CalendarListPage) -> bool {
    match &page.next_page_token {
        None => true,
        Some(token) => token.is_empty() || page.items.is_empty(),
    }
}

/// Whether a calendar can be used as a sync target.
pub fn calendar_is_usable(entry: &CalendarEntry) -> bool {
    if entry.deleted {
        return false;
    }
    matches!(entry.access_role.as_deref(), Some("owner") | Some("writer"))
}

/// Token exchange response (authorization_code grant).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// Token refresh response (refresh_token grant).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    /// Google occasionally rotates the refresh token.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

/// One page of the calendar list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<CalendarEntry>,
    next_page_token: Option<String>,
}

/// A calendar from the calendar list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    /// Display name of the calendar.
    pub summary: String,
    #[serde(default)]
    pub deleted: bool,
    pub access_role: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

/// Colors endpoint response; only the event palette is used.
#[derive(Debug, Deserialize)]
struct ColorsResponse {
    #[serde(default)]
    event: BTreeMap<String, PaletteColor>,
}

/// One palette entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteColor {
    pub background: String,
    pub foreground: String,
}

/// Event body for insert/patch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub color_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    pub date_time: String,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// GoogleCalendarService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::FirestoreDb;
use crate::models::Provider;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<String, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// High-level Google Calendar service that manages token lifecycle.
///
/// Only the refresh token is persisted (`credentials/{uid}/google/token`);
/// access tokens are minted on demand and cached in memory with a per-user
/// lock so concurrent requests do not race the refresh grant. A rejected
/// refresh grant flips `auth_status/{uid}/google` to false so the UI asks
/// the user to relink.
#[derive(Clone)]
pub struct GoogleCalendarService {
    client: GoogleCalendarClient,
    db: FirestoreDb,
    token_cache: TokenCache,
    refresh_locks: RefreshLocks,
}

impl GoogleCalendarService {
    /// Create a new service with shared token cache.
    pub fn new(
        client_id: String,
        client_secret: String,
        db: FirestoreDb,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client: GoogleCalendarClient::new(client_id, client_secret),
            db,
            token_cache,
            refresh_locks,
        }
    }

    /// Access the low-level client (for the linking code exchange).
    pub fn client(&self) -> &GoogleCalendarClient {
        &self.client
    }

    // ─── Token Management ────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given user.
    pub async fn get_valid_access_token(&self, uid: &str) -> Result<String, AppError> {
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        // Fast path: cached token still valid.
        if let Some(cached) = self.token_cache.get(uid) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        // Serialize refresh per user; other tasks wait here.
        let lock = self
            .refresh_locks
            .entry(uid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another task may have refreshed while we were waiting.
        if let Some(cached) = self.token_cache.get(uid) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        let refresh_token = self
            .db
            .get_credentials(uid)
            .await?
            .and_then(|c| c.google)
            .map(|g| g.token)
            .ok_or_else(|| AppError::NotFound(format!("Google credentials for {}", uid)))?;

        let refreshed = match self.client.refresh_access_token(&refresh_token).await {
            Ok(r) => r,
            Err(e) if e.is_google_token_error() => {
                // The refresh token was revoked; the auth-status flag was
                // stale-optimistic until now. Prove it false.
                tracing::warn!(uid, "Google refresh grant rejected, clearing auth status");
                self.db
                    .set_provider_status(uid, Provider::Google, false)
                    .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        // Persist a rotated refresh token when Google hands one back.
        if let Some(new_refresh) = &refreshed.refresh_token {
            if new_refresh != &refresh_token {
                self.db.set_google_token(uid, new_refresh).await?;
            }
        }

        let expires_at = now + Duration::seconds(refreshed.expires_in);
        self.token_cache.insert(
            uid.to_string(),
            CachedToken {
                access_token: refreshed.access_token.clone(),
                expires_at,
            },
        );

        tracing::debug!(uid, "Google access token refreshed and cached");
        Ok(refreshed.access_token)
    }

    /// Drop any cached token for a user (on unlink or deletion).
    pub fn forget_cached_token(&self, uid: &str) {
        self.token_cache.remove(uid);
    }

    // ─── API Wrappers ────────────────────────────────────────────

    /// Fetch the user's full calendar list.
    pub async fn list_calendars(&self, uid: &str) -> Result<Vec<CalendarEntry>, AppError> {
        let access_token = self.get_valid_access_token(uid).await?;
        self.client.list_calendars(&access_token).await
    }

    /// Fetch the event color palette.
    pub async fn event_palette(&self, uid: &str) -> Result<BTreeMap<String, PaletteColor>, AppError> {
        let access_token = self.get_valid_access_token(uid).await?;
        self.client.get_event_palette(&access_token).await
    }

    /// Check that a calendar id names an existing, writable calendar.
    pub async fn validate_calendar_id(&self, uid: &str, calendar_id: &str) -> Result<bool, AppError> {
        let access_token = self.get_valid_access_token(uid).await?;
        let entry = self.client.get_calendar(&access_token, calendar_id).await?;
        Ok(entry.as_ref().is_some_and(calendar_is_usable))
    }

    pub async fn insert_event(
        &self,
        uid: &str,
        calendar_id: &str,
        event: &EventPayload,
    ) -> Result<String, AppError> {
        let access_token = self.get_valid_access_token(uid).await?;
        self.client
            .insert_event(&access_token, calendar_id, event)
            .await
    }

    pub async fn patch_event(
        &self,
        uid: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventPayload,
    ) -> Result<(), AppError> {
        let access_token = self.get_valid_access_token(uid).await?;
        self.client
            .patch_event(&access_token, calendar_id, event_id, event)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> CalendarEntry {
        CalendarEntry {
            id: id.to_string(),
            summary: format!("Calendar {id}"),
            deleted: false,
            access_role: Some("owner".to_string()),
            primary: false,
        }
    }

    fn page(ids: &[&str], token: Option<&str>) -> CalendarListPage {
        CalendarListPage {
            items: ids.iter().map(|id| entry(id)).collect(),
            next_page_token: token.map(String::from),
        }
    }

    #[test]
    fn last_page_detection() {
        assert!(is_last_page(&page(&["a"], None)));
        assert!(is_last_page(&page(&["a"], Some(""))));
        // A tokened page with no items still terminates the walk.
        assert!(is_last_page(&page(&[], Some("t2"))));
        assert!(!is_last_page(&page(&["a"], Some("t2"))));
    }

    #[test]
    fn pagination_assembles_pages_in_order_without_duplication() {
        // Simulate the client loop over P1(t1), P2(t2), P3("").
        let pages = vec![
            page(&["a", "b"], Some("t1")),
            page(&["c"], Some("t2")),
            page(&["d"], Some("")),
        ];

        let mut assembled = Vec::new();
        for p in pages {
            let done = is_last_page(&p);
            assembled.extend(p.items);
            if done {
                break;
            }
        }

        let ids: Vec<&str> = assembled.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn usable_calendar_requires_write_access_and_not_deleted() {
        let mut cal = entry("a");
        assert!(calendar_is_usable(&cal));

        cal.access_role = Some("writer".to_string());
        assert!(calendar_is_usable(&cal));

        cal.access_role = Some("reader".to_string());
        assert!(!calendar_is_usable(&cal));

        cal.access_role = Some("owner".to_string());
        cal.deleted = true;
        assert!(!calendar_is_usable(&cal));
    }

    #[test]
    fn parse_calendar_list_page() {
        let json = r#"{
            "items": [
                {"id": "primary", "summary": "My Calendar", "accessRole": "owner", "primary": true},
                {"id": "old@example.com", "summary": "Old", "deleted": true}
            ],
            "nextPageToken": "tok123"
        }"#;

        let page: CalendarListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.items[1].deleted);
        assert_eq!(page.next_page_token.as_deref(), Some("tok123"));
    }

    #[test]
    fn event_payload_serializes_camel_case() {
        let payload = EventPayload {
            summary: "HW 1 [42]".to_string(),
            description: None,
            start: EventTime {
                date_time: "2026-09-01T23:59:00+00:00".to_string(),
            },
            end: EventTime {
                date_time: "2026-09-01T23:59:00+00:00".to_string(),
            },
            color_id: "3".to_string(),
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["colorId"], "3");
        assert_eq!(value["start"]["dateTime"], "2026-09-01T23:59:00+00:00");
        assert!(value.get("description").is_none());
    }
}
