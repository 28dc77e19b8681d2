// SPDX-License-Identifier: MIT

//! Dashboard settings reconciliation.
//!
//! The dashboard view is built from three sources that can drift apart:
//! the stored settings, the user's live calendar list, and Google's event
//! color palette. Reconciliation makes the drift visible and safe: a
//! stored calendar that no longer exists falls back to "no selection" (and
//! the store is rewritten to match), unknown colors fall back to the
//! palette key that Google guarantees, and structurally broken data is
//! surfaced as an integrity error instead of a half-rendered page.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{CourseSettings, UserSettings, FALLBACK_COLOR_ID};
use crate::services::google::{CalendarEntry, PaletteColor};
use serde::Serialize;
use std::collections::BTreeMap;

/// Event color palette keyed by color id.
pub type ColorPalette = BTreeMap<String, PaletteColor>;

/// A calendar the user can pick as sync target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarOption {
    pub id: String,
    pub summary: String,
}

impl From<&CalendarEntry> for CalendarOption {
    fn from(entry: &CalendarEntry) -> Self {
        Self {
            id: entry.id.clone(),
            summary: entry.summary.clone(),
        }
    }
}

/// Result of reconciling the stored calendar id against live options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedCalendar {
    /// Empty string means "nothing selected".
    pub selected: String,
    /// The store disagreed with the options and must be rewritten.
    pub needs_writeback: bool,
}

/// Reconcile the stored calendar id against the live calendar list.
///
/// A stored id that no longer appears among the options (deleted calendar,
/// revoked share) resets the selection to empty; the caller must persist
/// the reset so the stale id cannot resurface on the next page load.
pub fn reconcile_selected_calendar(
    stored: Option<&str>,
    options: &[CalendarOption],
) -> SelectedCalendar {
    match stored {
        None | Some("") => SelectedCalendar {
            selected: String::new(),
            needs_writeback: false,
        },
        Some(id) if options.iter().any(|o| o.id == id) => SelectedCalendar {
            selected: id.to_string(),
            needs_writeback: false,
        },
        Some(id) => {
            tracing::info!(calendar_id = id, "Stored calendar no longer available");
            SelectedCalendar {
                selected: String::new(),
                needs_writeback: true,
            }
        }
    }
}

/// The palette must contain the fallback key; every color decision leans
/// on it, so a palette without it cannot be rendered at all.
pub fn ensure_palette(palette: &ColorPalette) -> Result<(), AppError> {
    if palette.contains_key(FALLBACK_COLOR_ID) {
        return Ok(());
    }
    Err(AppError::integrity(
        format!("Color palette is missing key {:?}", FALLBACK_COLOR_ID),
        palette,
    ))
}

/// Map a stored color value onto the palette.
///
/// Values outside the palette (Google retired the id, or the store was
/// hand-edited) fall back to the guaranteed key. An absent value falls
/// back too when the field is required, and stays empty otherwise.
pub fn effective_color(value: Option<&str>, palette: &ColorPalette, required: bool) -> String {
    match value {
        Some(v) if palette.contains_key(v) => v.to_string(),
        Some(_) => FALLBACK_COLOR_ID.to_string(),
        None if required => FALLBACK_COLOR_ID.to_string(),
        None => String::new(),
    }
}

/// One dashboard row: course plus its resolved color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseColorRow {
    pub course_id: String,
    pub name: String,
    pub color: String,
}

/// Build the course rows for the dashboard.
///
/// A course without a name is not a display problem, it means the store
/// was corrupted between writes, so the whole view fails with the raw
/// payload attached for support. Colors merely degrade to the fallback.
pub fn course_color_rows(
    courses: &BTreeMap<String, CourseSettings>,
    palette: &ColorPalette,
) -> Result<Vec<CourseColorRow>, AppError> {
    ensure_palette(palette)?;

    let mut rows = Vec::with_capacity(courses.len());
    for (course_id, course) in courses {
        let name = match course.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => {
                return Err(AppError::integrity(
                    format!("Course {} has no name", course_id),
                    courses,
                ));
            }
        };

        rows.push(CourseColorRow {
            course_id: course_id.clone(),
            name,
            color: effective_color(course.color.as_deref(), palette, true),
        });
    }

    Ok(rows)
}

/// Normalize settings before they are written back from the dashboard.
///
/// Course colors outside the palette are coerced to the fallback, the
/// optional completed-assignment color likewise when set. Course names and
/// hrefs are never touched here; the course list endpoint owns those.
pub fn sanitize_settings(mut settings: UserSettings, palette: &ColorPalette) -> UserSettings {
    for course in settings.courses.values_mut() {
        course.color = Some(effective_color(course.color.as_deref(), palette, true));
    }

    if let Some(color) = settings.completed_assignment_color.as_deref() {
        if !color.is_empty() && !palette.contains_key(color) {
            settings.completed_assignment_color = Some(FALLBACK_COLOR_ID.to_string());
        }
    }

    settings
}

// ─── Data export ─────────────────────────────────────────────────

/// One exported document snapshot.
#[derive(Debug, Serialize)]
pub struct ExportFile {
    pub filename: String,
    pub description: String,
    /// Raw stored document, or null when the user has none.
    pub content: serde_json::Value,
    /// Set when this snapshot could not be read; the others still export.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

const EXPORT_SPECS: &[(&str, &str, &str)] = &[
    (
        crate::db::collections::SETTINGS,
        "settings.json",
        "Calendar selection, colors, and course configuration",
    ),
    (
        crate::db::collections::ASSIGNMENTS,
        "assignments.json",
        "Cached assignments and their calendar event ids",
    ),
    (
        crate::db::collections::AUTH_STATUS,
        "auth_status.json",
        "Which accounts are currently linked",
    ),
    (
        crate::db::collections::USERS,
        "profile.json",
        "Account profile",
    ),
];

/// Export every user-data snapshot. Each read is independent: one broken
/// subtree produces an error entry, the rest export normally.
pub async fn export_snapshots(db: &FirestoreDb, uid: &str) -> Vec<ExportFile> {
    let mut files = Vec::with_capacity(EXPORT_SPECS.len());

    for (collection, filename, description) in EXPORT_SPECS {
        let (content, error) = match db.get_subtree_json(collection, uid).await {
            Ok(Some(value)) => (value, None),
            Ok(None) => (serde_json::Value::Null, None),
            Err(e) => {
                tracing::warn!(collection, uid, error = %e, "Export snapshot failed");
                (serde_json::Value::Null, Some(e.to_string()))
            }
        };

        files.push(ExportFile {
            filename: filename.to_string(),
            description: description.to_string(),
            content,
            error,
        });
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn palette_with(keys: &[&str]) -> ColorPalette {
        keys.iter()
            .map(|k| {
                (
                    k.to_string(),
                    PaletteColor {
                        background: format!("#bg{k}"),
                        foreground: "#000".to_string(),
                    },
                )
            })
            .collect()
    }

    fn options(ids: &[&str]) -> Vec<CalendarOption> {
        ids.iter()
            .map(|id| CalendarOption {
                id: id.to_string(),
                summary: format!("Cal {id}"),
            })
            .collect()
    }

    #[test]
    fn stored_calendar_still_present_is_kept() {
        let result = reconcile_selected_calendar(Some("b"), &options(&["a", "b"]));
        assert_eq!(result.selected, "b");
        assert!(!result.needs_writeback);
    }

    #[test]
    fn vanished_calendar_resets_selection_and_requires_writeback() {
        let result = reconcile_selected_calendar(Some("gone"), &options(&["a", "b"]));
        assert_eq!(result.selected, "");
        assert!(result.needs_writeback);
    }

    #[test]
    fn empty_or_missing_selection_needs_no_writeback() {
        assert!(!reconcile_selected_calendar(None, &options(&["a"])).needs_writeback);
        assert!(!reconcile_selected_calendar(Some(""), &options(&["a"])).needs_writeback);
    }

    #[test]
    fn palette_without_fallback_key_is_an_integrity_error() {
        let bad = palette_with(&["2", "3"]);
        let err = ensure_palette(&bad).unwrap_err();
        assert!(matches!(err, AppError::Integrity { .. }));

        assert!(ensure_palette(&palette_with(&["1", "2"])).is_ok());
    }

    #[test]
    fn course_without_name_is_an_integrity_error() {
        let palette = palette_with(&["1"]);
        let mut courses = BTreeMap::new();
        courses.insert(
            "c1".to_string(),
            CourseSettings {
                name: None,
                href: Some("/courses/c1".to_string()),
                color: Some("1".to_string()),
            },
        );

        let err = course_color_rows(&courses, &palette).unwrap_err();
        match err {
            AppError::Integrity { payload, .. } => {
                // The raw store payload rides along for support diagnosis.
                assert!(payload.get("c1").is_some());
            }
            other => panic!("expected integrity error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_colors_fall_back_to_palette_key_one() {
        let palette = palette_with(&["1", "2", "3"]);

        assert_eq!(effective_color(Some("3"), &palette, true), "3");
        assert_eq!(effective_color(Some("9"), &palette, true), "1");
        assert_eq!(effective_color(None, &palette, true), "1");
        assert_eq!(effective_color(None, &palette, false), "");
        assert_eq!(effective_color(Some("9"), &palette, false), "1");
    }

    #[test]
    fn sanitize_coerces_invalid_course_colors_before_save() {
        let palette = palette_with(&["1", "2", "3"]);
        let mut settings = UserSettings::default();
        settings.courses.insert(
            "c1".to_string(),
            CourseSettings {
                name: Some("CS 101".to_string()),
                href: None,
                color: Some("3".to_string()),
            },
        );
        settings.courses.insert(
            "c2".to_string(),
            CourseSettings {
                name: Some("MATH 51".to_string()),
                href: None,
                color: Some("9".to_string()),
            },
        );

        let saved = sanitize_settings(settings, &palette);
        assert_eq!(saved.courses["c1"].color.as_deref(), Some("3"));
        assert_eq!(saved.courses["c2"].color.as_deref(), Some("1"));
    }

    #[test]
    fn sanitize_keeps_valid_completed_color_and_coerces_invalid() {
        let palette = palette_with(&["1", "2"]);

        let mut settings = UserSettings::default();
        settings.completed_assignment_color = Some("2".to_string());
        let saved = sanitize_settings(settings, &palette);
        assert_eq!(saved.completed_assignment_color.as_deref(), Some("2"));

        let mut settings = UserSettings::default();
        settings.completed_assignment_color = Some("11".to_string());
        let saved = sanitize_settings(settings, &palette);
        assert_eq!(saved.completed_assignment_color.as_deref(), Some("1"));

        // Empty means "do not recolor completed assignments", keep it.
        let mut settings = UserSettings::default();
        settings.completed_assignment_color = Some(String::new());
        let saved = sanitize_settings(settings, &palette);
        assert_eq!(saved.completed_assignment_color.as_deref(), Some(""));
    }
}
