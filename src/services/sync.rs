// SPDX-License-Identifier: MIT

//! Assignment-to-calendar sync pipeline.
//!
//! `refresh_course_list` updates the stored course configuration from
//! Gradescope; `refresh_events` runs the full pipeline: validate settings,
//! validate both provider sessions, fetch assignments, merge them into the
//! cached ledger, and push the delta into Google Calendar. A background
//! scheduler sweeps all users on an interval.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{
    AssignmentCache, CourseSettings, SyncSettings, FALLBACK_COLOR_ID,
};
use crate::services::google::{EventPayload, EventTime, GoogleCalendarService};
use crate::services::gradescope::{CourseInfo, GradescopeService};
use chrono::DateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome counters for one sync run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncOutcome {
    pub events_created: usize,
    pub events_updated: usize,
    pub completed_retired: usize,
    pub assignments_tracked: usize,
}

#[derive(Clone)]
pub struct SyncService {
    db: FirestoreDb,
    google: GoogleCalendarService,
    gradescope: GradescopeService,
}

impl SyncService {
    pub fn new(
        db: FirestoreDb,
        google: GoogleCalendarService,
        gradescope: GradescopeService,
    ) -> Self {
        Self {
            db,
            google,
            gradescope,
        }
    }

    /// Refresh the stored course list from Gradescope.
    ///
    /// Color choices survive the refresh; courses that disappeared from
    /// Gradescope are dropped, new ones arrive with the default color.
    pub async fn refresh_course_list(
        &self,
        uid: &str,
    ) -> Result<BTreeMap<String, CourseSettings>, AppError> {
        let token = self.gradescope.valid_token(uid).await?;
        let fetched = self.gradescope.client().list_courses(&token).await?;

        let existing = self
            .db
            .get_settings(uid)
            .await?
            .map(|s| s.courses)
            .unwrap_or_default();

        let merged = merge_course_lists(&existing, fetched);
        self.db.set_courses(uid, merged.clone()).await?;

        tracing::info!(uid, courses = merged.len(), "Course list refreshed");
        Ok(merged)
    }

    /// Run the full sync pipeline for one user.
    ///
    /// Validation order matters for the error the user sees: settings
    /// first, then the Gradescope session, then the calendar target. Each
    /// failure maps to a distinct error code the dashboard acts on.
    pub async fn refresh_events(&self, uid: &str) -> Result<SyncOutcome, AppError> {
        let settings = self
            .db
            .get_settings(uid)
            .await?
            .unwrap_or_default()
            .for_sync()?;

        let gs_token = self.gradescope.valid_token(uid).await?;

        if !self
            .google
            .validate_calendar_id(uid, &settings.calendar_id)
            .await?
        {
            // Clear the stale selection so the dashboard re-prompts
            // instead of failing the same way forever.
            self.db.set_calendar_id(uid, "").await?;
            return Err(AppError::CalendarSelection);
        }

        let fetched = self.fetch_all_assignments(&settings, &gs_token).await?;

        let mut cache = self
            .db
            .get_assignment_cache(uid)
            .await?
            .unwrap_or_default();
        cache.merge_fetched(fetched, &settings.courses);

        let outcome = self.push_to_calendar(uid, &settings, &mut cache).await?;

        self.db.set_assignment_cache(uid, &cache).await?;

        tracing::info!(
            uid,
            created = outcome.events_created,
            updated = outcome.events_updated,
            retired = outcome.completed_retired,
            "Sync run finished"
        );
        Ok(outcome)
    }

    /// Fetch assignments for every configured course, in parallel.
    ///
    /// Unlike calendar pages, course pages are independent, so the
    /// requests can all go out at once.
    async fn fetch_all_assignments(
        &self,
        settings: &SyncSettings,
        gs_token: &str,
    ) -> Result<BTreeMap<String, crate::models::Assignment>, AppError> {
        let fetches = settings.courses.iter().filter_map(|(course_id, course)| {
            let Some(href) = course.href.as_deref().filter(|h| !h.is_empty()) else {
                tracing::warn!(course_id, "Course has no href, skipping fetch");
                return None;
            };
            let client = self.gradescope.client().clone();
            let href = href.to_string();
            let token = gs_token.to_string();
            Some(async move { client.list_assignments(&href, &token).await })
        });

        let results = futures_util::future::try_join_all(fetches).await?;

        Ok(results.into_iter().flatten().collect())
    }

    /// Push the merged cache into the calendar.
    ///
    /// New pending assignments get an event; changed ones get a patch;
    /// completed ones get their final recolor (when configured) and leave
    /// the cache, their events stay behind on the calendar.
    async fn push_to_calendar(
        &self,
        uid: &str,
        settings: &SyncSettings,
        cache: &mut AssignmentCache,
    ) -> Result<SyncOutcome, AppError> {
        let mut outcome = SyncOutcome::default();
        let mut retired = Vec::new();

        for (key, assignment) in cache.assignments.iter_mut() {
            let Some(due) = to_rfc3339(&assignment.due_date) else {
                tracing::warn!(key, due_date = %assignment.due_date, "Unparseable due date, skipping");
                continue;
            };

            let course = settings.courses.get(&assignment.course_id);
            let course_color = course
                .and_then(|c| c.color.as_deref())
                .filter(|c| !c.is_empty())
                .unwrap_or(FALLBACK_COLOR_ID);

            if assignment.event_id.is_empty() {
                if assignment.completed {
                    // Already done and never tracked: nothing to show.
                    retired.push(key.clone());
                    continue;
                }

                let event = build_event(&assignment.name, course, &due, course_color);
                let event_id = self
                    .google
                    .insert_event(uid, &settings.calendar_id, &event)
                    .await?;
                assignment.event_id = event_id;
                outcome.events_created += 1;
                continue;
            }

            if assignment.completed {
                if !settings.completed_assignment_color.is_empty() {
                    let event = build_event(
                        &assignment.name,
                        course,
                        &due,
                        &settings.completed_assignment_color,
                    );
                    self.google
                        .patch_event(uid, &settings.calendar_id, &assignment.event_id, &event)
                        .await?;
                    outcome.events_updated += 1;
                }
                retired.push(key.clone());
                continue;
            }

            if assignment.outdated {
                let event = build_event(&assignment.name, course, &due, course_color);
                self.google
                    .patch_event(uid, &settings.calendar_id, &assignment.event_id, &event)
                    .await?;
                assignment.outdated = false;
                outcome.events_updated += 1;
            }
        }

        outcome.completed_retired = retired.len();
        for key in retired {
            cache.assignments.remove(&key);
        }
        outcome.assignments_tracked = cache.assignments.len();

        Ok(outcome)
    }
}

/// Merge a freshly fetched course list with the stored configuration.
fn merge_course_lists(
    existing: &BTreeMap<String, CourseSettings>,
    fetched: BTreeMap<String, CourseInfo>,
) -> BTreeMap<String, CourseSettings> {
    fetched
        .into_iter()
        .map(|(course_id, info)| {
            let color = existing
                .get(&course_id)
                .and_then(|c| c.color.clone())
                .unwrap_or_else(|| FALLBACK_COLOR_ID.to_string());
            (
                course_id,
                CourseSettings {
                    name: Some(info.name),
                    href: Some(info.href),
                    color: Some(color),
                },
            )
        })
        .collect()
}

/// Build the calendar event for one assignment.
///
/// The title is the assignment name; the description links back to the
/// course page so the event is traceable from the calendar.
fn build_event(
    title: &str,
    course: Option<&CourseSettings>,
    due_rfc3339: &str,
    color_id: &str,
) -> EventPayload {
    EventPayload {
        summary: title.to_string(),
        description: event_description(course),
        start: EventTime {
            date_time: due_rfc3339.to_string(),
        },
        end: EventTime {
            date_time: due_rfc3339.to_string(),
        },
        color_id: color_id.to_string(),
    }
}

fn event_description(course: Option<&CourseSettings>) -> Option<String> {
    let course = course?;
    let name = course.name.as_deref().filter(|n| !n.is_empty())?;
    Some(match course.href.as_deref().filter(|h| !h.is_empty()) {
        Some(href) => format!(
            "Assignment for <a href=\"{}{}\">{}</a> on Gradescope",
            crate::services::gradescope::GRADESCOPE_BASE,
            href,
            name
        ),
        None => format!("Assignment for {} on Gradescope", name),
    })
}

/// Convert a Gradescope timestamp to RFC 3339 for the Calendar API.
///
/// Course pages embed `2026-09-10 23:59:00 -0700`; cached entries written
/// by older runs may already be RFC 3339.
fn to_rfc3339(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339());
    }
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")
        .ok()
        .map(|dt| dt.to_rfc3339())
}

// ─── Background scheduler ────────────────────────────────────────

/// Periodically sync every known user.
///
/// One user's failure never aborts the sweep. Errors that just mean "this
/// user has not finished setup" are expected and logged quietly.
pub async fn run_scheduler(sync: SyncService, db: FirestoreDb, interval_secs: u64) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let uids = match db.list_user_ids().await {
            Ok(uids) => uids,
            Err(e) => {
                tracing::error!(error = %e, "Scheduler could not list users");
                continue;
            }
        };

        tracing::info!(users = uids.len(), "Scheduled sync sweep starting");

        for uid in uids {
            match sync.refresh_events(&uid).await {
                Ok(outcome) => {
                    tracing::debug!(
                        uid,
                        created = outcome.events_created,
                        updated = outcome.events_updated,
                        "Scheduled sync succeeded"
                    );
                }
                Err(
                    e @ (AppError::UserSettings
                    | AppError::GradescopeAuth
                    | AppError::CalendarSelection),
                ) => {
                    tracing::debug!(uid, error = %e, "Scheduled sync skipped user");
                }
                Err(e) => {
                    tracing::warn!(uid, error = %e, "Scheduled sync failed for user");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, href: &str) -> CourseInfo {
        CourseInfo {
            name: name.to_string(),
            href: href.to_string(),
        }
    }

    #[test]
    fn course_merge_preserves_colors_and_defaults_new_ones() {
        let mut existing = BTreeMap::new();
        existing.insert(
            "101".to_string(),
            CourseSettings {
                name: Some("CS 101 (old name)".to_string()),
                href: Some("/courses/101".to_string()),
                color: Some("7".to_string()),
            },
        );
        existing.insert(
            "999".to_string(),
            CourseSettings {
                name: Some("Dropped course".to_string()),
                href: Some("/courses/999".to_string()),
                color: Some("4".to_string()),
            },
        );

        let mut fetched = BTreeMap::new();
        fetched.insert("101".to_string(), info("CS 101", "/courses/101"));
        fetched.insert("202".to_string(), info("MATH 51", "/courses/202"));

        let merged = merge_course_lists(&existing, fetched);

        assert_eq!(merged.len(), 2);
        // Known course: fresh name, kept color.
        assert_eq!(merged["101"].name.as_deref(), Some("CS 101"));
        assert_eq!(merged["101"].color.as_deref(), Some("7"));
        // New course: default color.
        assert_eq!(merged["202"].color.as_deref(), Some(FALLBACK_COLOR_ID));
        // Dropped course: gone.
        assert!(!merged.contains_key("999"));
    }

    #[test]
    fn due_dates_convert_to_rfc3339() {
        let converted = to_rfc3339("2026-09-10 23:59:00 -0700").unwrap();
        assert_eq!(converted, "2026-09-10T23:59:00-07:00");

        // Already RFC 3339 passes through.
        assert_eq!(
            to_rfc3339("2026-09-10T23:59:00-07:00").unwrap(),
            "2026-09-10T23:59:00-07:00"
        );

        assert!(to_rfc3339("next Tuesday").is_none());
    }

    #[test]
    fn event_carries_title_and_course_description() {
        let course = CourseSettings {
            name: Some("CS 101".to_string()),
            href: Some("/courses/101".to_string()),
            color: Some("5".to_string()),
        };
        let event = build_event("HW 1", Some(&course), "2026-09-10T23:59:00-07:00", "5");
        assert_eq!(event.summary, "HW 1");
        assert_eq!(event.color_id, "5");
        assert_eq!(event.start.date_time, event.end.date_time);
        assert_eq!(
            event.description.as_deref(),
            Some("Assignment for <a href=\"https://www.gradescope.com/courses/101\">CS 101</a> on Gradescope")
        );
    }

    #[test]
    fn event_description_degrades_without_course_metadata() {
        let course = CourseSettings {
            name: Some("CS 101".to_string()),
            href: None,
            color: None,
        };
        assert_eq!(
            event_description(Some(&course)).as_deref(),
            Some("Assignment for CS 101 on Gradescope")
        );
        assert_eq!(event_description(None), None);
    }
}
