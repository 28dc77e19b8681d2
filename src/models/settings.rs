// SPDX-License-Identifier: MIT

//! User preference data stored in `settings/{uid}`.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Palette key used when a color value is missing or invalid.
pub const FALLBACK_COLOR_ID: &str = "1";

/// Per-course settings. `name` is required for rendering and event creation;
/// its absence is a data-integrity violation, never silently defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourseSettings {
    pub name: Option<String>,
    /// Course page path relative to the Gradescope origin (`/courses/{id}`).
    pub href: Option<String>,
    pub color: Option<String>,
}

/// User settings document. All fields are optional on the wire; operations
/// that need them validate explicitly instead of defaulting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
    pub calendar_id: Option<String>,
    pub completed_assignment_color: Option<String>,
    #[serde(default)]
    pub courses: BTreeMap<String, CourseSettings>,
}

/// Settings view with the fields the sync pipeline requires present.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub calendar_id: String,
    pub completed_assignment_color: String,
    pub courses: BTreeMap<String, CourseSettings>,
}

impl UserSettings {
    /// Validate that the fields the event sync requires are present.
    ///
    /// Mirrors the precondition of the `refresh_events` operation: a missing
    /// calendar selection, completed-assignment color or course list means
    /// the user has not finished setting up, which is reported as
    /// `invalid_user_settings` rather than an integrity error.
    pub fn for_sync(&self) -> Result<SyncSettings, AppError> {
        let calendar_id = match self.calendar_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(AppError::UserSettings),
        };
        let completed_assignment_color = match &self.completed_assignment_color {
            Some(color) => color.clone(),
            None => return Err(AppError::UserSettings),
        };
        if self.courses.is_empty() {
            return Err(AppError::UserSettings);
        }

        Ok(SyncSettings {
            calendar_id,
            completed_assignment_color,
            courses: self.courses.clone(),
        })
    }
}
