// SPDX-License-Identifier: MIT

//! Gradescope session management and data extraction.
//!
//! Gradescope has no public API, so this module drives the same login form
//! the browser does. A session is a `signed_token` cookie; validating it is
//! a single unredirected GET against the account page.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{Assignment, GradescopeCredentials, Provider};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const GRADESCOPE_BASE: &str = "https://www.gradescope.com";
const SESSION_COOKIE: &str = "signed_token";

/// Lightweight course record extracted from the landing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseInfo {
    pub name: String,
    pub href: String,
}

/// A freshly minted Gradescope session.
#[derive(Debug, Clone)]
pub struct GradescopeSession {
    pub token: String,
    /// Expiry of the session cookie, RFC 3339, when Gradescope sent one.
    pub expires_at: Option<String>,
}

/// HTTP client for Gradescope's web interface.
#[derive(Clone)]
pub struct GradescopeClient {
    base_url: String,
}

impl GradescopeClient {
    pub fn new() -> Self {
        Self {
            base_url: GRADESCOPE_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(base_url: String) -> Self {
        Self { base_url }
    }

    /// No-redirect client: login and token checks both distinguish
    /// success from failure by whether Gradescope redirects.
    fn http(&self) -> Result<reqwest::Client, AppError> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AppError::GradescopeApi(e.to_string()))
    }

    /// Check whether a session token is still accepted.
    ///
    /// A valid token gets the account page directly (200); an invalid one
    /// is redirected to the login page.
    pub async fn check_token(&self, token: &str) -> Result<bool, AppError> {
        let response = self
            .http()?
            .get(format!("{}/account", self.base_url))
            .header("Cookie", format!("{}={}", SESSION_COOKIE, token))
            .send()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        Ok(response.status().is_success())
    }

    /// Log in with email and password, returning a fresh session.
    ///
    /// Mirrors the browser flow: fetch the login page for the CSRF
    /// `authenticity_token`, post the form, and expect a 302 back to the
    /// account page carrying the session cookie.
    pub async fn login(&self, email: &str, password: &str) -> Result<GradescopeSession, AppError> {
        let client = self.http()?;

        let login_page = client
            .get(format!("{}/login", self.base_url))
            .send()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        let cookies = collect_cookies(&login_page);
        let body = login_page
            .text()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        let csrf = extract_authenticity_token(&body).ok_or_else(|| {
            AppError::GradescopeApi("Login page had no authenticity token".to_string())
        })?;

        let response = client
            .post(format!("{}/login", self.base_url))
            .header("Cookie", join_cookies(&cookies))
            .form(&[
                ("utf8", "\u{2713}"),
                ("authenticity_token", csrf.as_str()),
                ("session[email]", email),
                ("session[password]", password),
                ("session[remember_me]", "1"),
                ("commit", "Log In"),
                ("session[remember_me_sso]", "0"),
            ])
            .send()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        // Success is a redirect to /account. Bad credentials redirect back
        // to /login or render the form again with a 200.
        let redirected_to_account = response.status().is_redirection()
            && response
                .headers()
                .get("location")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|loc| loc.ends_with("/account"));

        if !redirected_to_account {
            return Err(AppError::GradescopeAuth);
        }

        let expires_at = cookie_expiry(&response, SESSION_COOKIE);
        let token = collect_cookies(&response)
            .get(SESSION_COOKIE)
            .cloned()
            .ok_or_else(|| {
                AppError::GradescopeApi("Login succeeded but no session cookie was set".to_string())
            })?;

        Ok(GradescopeSession { token, expires_at })
    }

    /// Invalidate a session server-side. Best effort.
    pub async fn logout(&self, token: &str) {
        let result = match self.http() {
            Ok(client) => {
                client
                    .get(format!("{}/logout?tfs_mode=false", self.base_url))
                    .header("Cookie", format!("{}={}", SESSION_COOKIE, token))
                    .send()
                    .await
            }
            Err(_) => return,
        };

        if let Err(e) = result {
            tracing::debug!(error = %e, "Gradescope logout request failed");
        }
    }

    /// List the user's active courses from the landing page.
    pub async fn list_courses(
        &self,
        token: &str,
    ) -> Result<BTreeMap<String, CourseInfo>, AppError> {
        let response = self
            .http()?
            .get(format!("{}/account", self.base_url))
            .header("Cookie", format!("{}={}", SESSION_COOKIE, token))
            .send()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::GradescopeAuth);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        Ok(extract_courses(&body))
    }

    /// List assignments for one course.
    pub async fn list_assignments(
        &self,
        course_href: &str,
        token: &str,
    ) -> Result<Vec<(String, Assignment)>, AppError> {
        let response = self
            .http()?
            .get(format!("{}{}", self.base_url, course_href))
            .header("Cookie", format!("{}={}", SESSION_COOKIE, token))
            .send()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::GradescopeAuth);
        }

        let body = response
            .text()
            .await
            .map_err(|e| AppError::GradescopeApi(e.to_string()))?;

        let course_id = course_id_from_href(course_href);
        Ok(extract_assignments(&body, &course_id))
    }
}

impl Default for GradescopeClient {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Page extraction ─────────────────────────────────────────────

fn collect_cookies(response: &reqwest::Response) -> BTreeMap<String, String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| {
            let pair = cookie.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Expiry of one named cookie in a response, as RFC 3339.
fn cookie_expiry(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|cookie| cookie.trim_start().starts_with(&prefix))
        .and_then(parse_cookie_expiry)
}

/// Parse the `Expires` attribute of a Set-Cookie line.
///
/// Gradescope sends the legacy `Wed, 10-Sep-2026 23:59:59 GMT` form; the
/// dashes are normalized away before parsing.
fn parse_cookie_expiry(cookie: &str) -> Option<String> {
    cookie
        .split(';')
        .map(str::trim)
        .find_map(|attr| {
            let (key, value) = attr.split_once('=')?;
            key.eq_ignore_ascii_case("expires").then(|| value.to_string())
        })
        .and_then(|value| {
            chrono::DateTime::parse_from_rfc2822(&value.replace('-', " ")).ok()
        })
        .map(|dt| dt.to_rfc3339())
}

fn join_cookies(cookies: &BTreeMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("; ")
}

fn authenticity_token_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r#"name="authenticity_token"\s+value="([^"]+)""#)
            .expect("valid regex")
    })
}

fn extract_authenticity_token(html: &str) -> Option<String> {
    authenticity_token_re()
        .captures(html)
        .map(|c| c[1].to_string())
}

fn course_box_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(
            r#"(?s)<a[^>]+class="[^"]*courseBox[^"]*"[^>]+href="(/courses/(\d+))"[^>]*>.*?class="[^"]*courseBox--shortname[^"]*"[^>]*>([^<]+)<"#,
        )
        .expect("valid regex")
    })
}

/// Pull `{course_id: {name, href}}` out of the landing page.
fn extract_courses(html: &str) -> BTreeMap<String, CourseInfo> {
    course_box_re()
        .captures_iter(html)
        .map(|c| {
            (
                c[2].to_string(),
                CourseInfo {
                    name: c[3].trim().to_string(),
                    href: c[1].to_string(),
                },
            )
        })
        .collect()
}

fn assignment_row_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // One table row per assignment. The first cell names the assignment
        // either as a link into the assignment page or as a submit button
        // carrying `data-assignment-id`; both expose the numeric id. The
        // submission status cell says "No Submission" until something has
        // been turned in, and the due date carries a machine-readable
        // datetime attribute.
        regex::Regex::new(
            r#"(?s)<tr role="row">.*?<th[^>]*>\s*(?:<a[^>]+/assignments/(\d+)"[^>]*>([^<]+)</a>|<button[^>]+data-assignment-id="(\d+)"[^>]*>([^<]+)</button>).*?</th>.*?submissionStatus[^>]*>\s*([^<]*?)\s*<.*?submissionTimeChart--dueDate[^>]*datetime="([^"]+)""#,
        )
        .expect("valid regex")
    })
}

/// Pull `(key, assignment)` pairs out of a course page.
///
/// The cache key is `{course_id}-{assignment_id}`, built from Gradescope's
/// numeric ids, so an assignment keeps its cache entry (and its calendar
/// event) across renames and due-date changes.
fn extract_assignments(html: &str, course_id: &str) -> Vec<(String, Assignment)> {
    assignment_row_re()
        .captures_iter(html)
        .filter_map(|c| {
            let (assignment_id, name) = match (c.get(1), c.get(3)) {
                (Some(id), _) => (id.as_str(), c[2].trim()),
                (_, Some(id)) => (id.as_str(), c[4].trim()),
                _ => return None,
            };
            let status = c[5].trim();
            let due_date = c[6].to_string();
            let key = format!("{}-{}", course_id, assignment_id);
            Some((
                key,
                Assignment {
                    name: name.to_string(),
                    due_date,
                    completed: !status.eq_ignore_ascii_case("No Submission"),
                    course_id: course_id.to_string(),
                    event_id: String::new(),
                    outdated: false,
                },
            ))
        })
        .collect()
}

fn course_id_from_href(href: &str) -> String {
    href.rsplit('/').next().unwrap_or_default().to_string()
}

/// The previously stored token, when a write is about to replace it with a
/// different one. That token should be logged out server-side.
fn stale_token<'a>(previous: Option<&'a str>, next: &str) -> Option<&'a str> {
    previous.filter(|t| !t.is_empty() && *t != next)
}

// ─── Service ─────────────────────────────────────────────────────

/// Gradescope service: keeps the stored session credentials usable.
#[derive(Clone)]
pub struct GradescopeService {
    client: GradescopeClient,
    db: FirestoreDb,
}

impl GradescopeService {
    pub fn new(db: FirestoreDb) -> Self {
        Self {
            client: GradescopeClient::new(),
            db,
        }
    }

    pub fn client(&self) -> &GradescopeClient {
        &self.client
    }

    /// Produce a session token that is known to work right now.
    ///
    /// Order of attempts: the stored token as-is, then a fresh login with
    /// the stored email and password. When everything fails the
    /// `auth_status` flag is cleared so the dashboard prompts for
    /// credentials again.
    pub async fn valid_token(&self, uid: &str) -> Result<String, AppError> {
        let linked = self
            .db
            .get_auth_status(uid)
            .await?
            .map(|s| s.get(Provider::Gradescope))
            .unwrap_or(false);
        if !linked {
            return Err(AppError::GradescopeAuth);
        }

        let Some(creds) = self.db.get_credentials(uid).await?.and_then(|c| c.gradescope)
        else {
            self.mark_unlinked(uid).await?;
            return Err(AppError::GradescopeAuth);
        };

        if let Some(token) = creds.token.as_deref().filter(|t| !t.is_empty()) {
            if self.client.check_token(token).await? {
                return Ok(token.to_string());
            }
        }

        let (Some(email), Some(password)) = (
            creds.email.as_deref().filter(|e| !e.is_empty()),
            creds.password.as_deref().filter(|p| !p.is_empty()),
        ) else {
            tracing::info!(uid, "Gradescope token expired and no login credentials stored");
            self.mark_unlinked(uid).await?;
            return Err(AppError::GradescopeAuth);
        };

        match self.client.login(email, password).await {
            Ok(session) => {
                if let Some(old) = stale_token(creds.token.as_deref(), &session.token) {
                    self.client.logout(old).await;
                }
                self.db
                    .set_gradescope_credentials(
                        uid,
                        &GradescopeCredentials {
                            token: Some(session.token.clone()),
                            email: creds.email,
                            password: creds.password,
                        },
                    )
                    .await?;
                tracing::info!(uid, "Gradescope session renewed via stored credentials");
                Ok(session.token)
            }
            Err(AppError::GradescopeAuth) => {
                tracing::info!(uid, "Stored Gradescope credentials no longer work");
                self.mark_unlinked(uid).await?;
                Err(AppError::GradescopeAuth)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate user-supplied credentials and store them.
    ///
    /// Accepts either a raw session token or an email/password pair; the
    /// token wins when both are present and it checks out. The password is
    /// persisted only when the user opted in via `store_credentials`, so
    /// automatic re-login stays a choice. Without a stored password the
    /// session has a hard end, so its expiry is returned for the client to
    /// surface.
    pub async fn link(
        &self,
        uid: &str,
        token: Option<&str>,
        email: Option<&str>,
        password: Option<&str>,
        store_credentials: bool,
    ) -> Result<Option<String>, AppError> {
        let mut expires_at = None;
        let mut creds = match token.filter(|t| !t.is_empty()) {
            Some(token) if self.client.check_token(token).await? => GradescopeCredentials {
                token: Some(token.to_string()),
                email: email.map(String::from).filter(|e| !e.is_empty()),
                password: password.map(String::from).filter(|p| !p.is_empty()),
            },
            _ => {
                let (email, password) = match (email, password) {
                    (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => (e, p),
                    _ => return Err(AppError::GradescopeAuth),
                };
                let session = self.client.login(email, password).await?;
                expires_at = session.expires_at;
                GradescopeCredentials {
                    token: Some(session.token),
                    email: Some(email.to_string()),
                    password: Some(password.to_string()),
                }
            }
        };

        if !store_credentials {
            creds.password = None;
        }

        // A replaced session token stays valid server-side until it is
        // explicitly logged out.
        let previous = self
            .db
            .get_credentials(uid)
            .await?
            .and_then(|c| c.gradescope)
            .and_then(|c| c.token);
        if let (Some(previous), Some(next)) = (previous.as_deref(), creds.token.as_deref()) {
            if let Some(old) = stale_token(Some(previous), next) {
                self.client.logout(old).await;
            }
        }

        self.db.set_gradescope_credentials(uid, &creds).await?;
        self.db
            .set_provider_status(uid, Provider::Gradescope, true)
            .await?;

        Ok(if store_credentials { None } else { expires_at })
    }

    /// Best-effort server-side logout before account deletion.
    pub async fn revoke_session(&self, uid: &str) -> Result<(), AppError> {
        if let Some(creds) = self.db.get_credentials(uid).await?.and_then(|c| c.gradescope) {
            if let Some(token) = creds.token.as_deref().filter(|t| !t.is_empty()) {
                self.client.logout(token).await;
            }
        }
        Ok(())
    }

    async fn mark_unlinked(&self, uid: &str) -> Result<(), AppError> {
        self.db
            .set_provider_status(uid, Provider::Gradescope, false)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_authenticity_token_from_login_form() {
        let html = r#"<form action="/login" method="post">
            <input type="hidden" name="authenticity_token" value="abc123==" />
        </form>"#;
        assert_eq!(
            extract_authenticity_token(html).as_deref(),
            Some("abc123==")
        );
        assert!(extract_authenticity_token("<form></form>").is_none());
    }

    #[test]
    fn extracts_courses_from_landing_page() {
        let html = r#"
        <a class="courseBox" href="/courses/123456">
            <h3 class="courseBox--shortname">CS 101</h3>
            <div class="courseBox--name">Intro to CS</div>
        </a>
        <a class="courseBox" href="/courses/789012">
            <h3 class="courseBox--shortname">MATH 51</h3>
        </a>"#;

        let courses = extract_courses(html);
        assert_eq!(courses.len(), 2);
        assert_eq!(
            courses.get("123456"),
            Some(&CourseInfo {
                name: "CS 101".to_string(),
                href: "/courses/123456".to_string(),
            })
        );
        assert_eq!(courses.get("789012").unwrap().name, "MATH 51");
    }

    #[test]
    fn extracts_assignments_with_completion_and_due_date() {
        let html = r#"
        <tr role="row">
            <th scope="row"><a href="/courses/123/assignments/901">Homework 1</a></th>
            <td class="submissionStatus">Submitted</td>
            <td><time class="submissionTimeChart--dueDate" datetime="2026-09-10 23:59:00 -0700">Sep 10</time></td>
        </tr>
        <tr role="row">
            <th scope="row"><button type="button" data-assignment-id="902" class="js-submitAssignment">Homework 2</button></th>
            <td class="submissionStatus"> No Submission </td>
            <td><time class="submissionTimeChart--dueDate" datetime="2026-09-17 23:59:00 -0700">Sep 17</time></td>
        </tr>"#;

        let assignments = extract_assignments(html, "123");
        assert_eq!(assignments.len(), 2);

        let (key, hw1) = &assignments[0];
        assert_eq!(key, "123-901");
        assert_eq!(hw1.name, "Homework 1");
        assert!(hw1.completed);
        assert_eq!(hw1.due_date, "2026-09-10 23:59:00 -0700");
        assert_eq!(hw1.course_id, "123");
        assert_eq!(hw1.event_id, "");

        let (key, hw2) = &assignments[1];
        assert_eq!(key, "123-902");
        assert_eq!(hw2.name, "Homework 2");
        assert!(!hw2.completed);
    }

    #[test]
    fn assignment_key_is_stable_across_renames() {
        let before = r#"<tr role="row">
            <th scope="row"><a href="/courses/42/assignments/7">HW 1</a></th>
            <td class="submissionStatus">No Submission</td>
            <td><time class="submissionTimeChart--dueDate" datetime="2026-09-10 23:59:00 -0700">Sep 10</time></td>
        </tr>"#;
        let after = before.replace("HW 1", "HW 1 (fixed)");

        let (key_before, _) = &extract_assignments(before, "42")[0];
        let (key_after, renamed) = &extract_assignments(&after, "42")[0];
        assert_eq!(key_before, key_after);
        assert_eq!(renamed.name, "HW 1 (fixed)");
    }

    #[test]
    fn cookie_expiry_parses_both_date_forms() {
        assert_eq!(
            parse_cookie_expiry(
                "signed_token=abc; path=/; expires=Thu, 10-Sep-2026 23:59:59 GMT; HttpOnly"
            )
            .as_deref(),
            Some("2026-09-10T23:59:59+00:00")
        );
        assert_eq!(
            parse_cookie_expiry("signed_token=abc; Expires=Thu, 10 Sep 2026 23:59:59 GMT")
                .as_deref(),
            Some("2026-09-10T23:59:59+00:00")
        );
        assert_eq!(parse_cookie_expiry("signed_token=abc; path=/"), None);
        assert_eq!(
            parse_cookie_expiry("signed_token=abc; expires=whenever"),
            None
        );
    }

    #[test]
    fn stale_token_fires_only_when_the_token_actually_changes() {
        assert_eq!(stale_token(Some("old"), "new"), Some("old"));
        assert_eq!(stale_token(Some("same"), "same"), None);
        assert_eq!(stale_token(Some(""), "new"), None);
        assert_eq!(stale_token(None, "new"), None);
    }

    #[test]
    fn course_id_comes_from_last_href_segment() {
        assert_eq!(course_id_from_href("/courses/424242"), "424242");
    }

    #[test]
    fn cookie_joining_is_deterministic() {
        let mut cookies = BTreeMap::new();
        cookies.insert("a".to_string(), "1".to_string());
        cookies.insert("b".to_string(), "2".to_string());
        assert_eq!(join_cookies(&cookies), "a=1; b=2");
    }
}
