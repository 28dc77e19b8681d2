// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod assignment;
pub mod auth;
pub mod settings;
pub mod user;

pub use assignment::{Assignment, AssignmentCache};
pub use auth::{AuthStatus, GoogleCredentials, GradescopeCredentials, Provider, UserCredentials};
pub use settings::{CourseSettings, SyncSettings, UserSettings, FALLBACK_COLOR_ID};
pub use user::UserProfile;
