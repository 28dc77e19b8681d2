// SPDX-License-Identifier: MIT

//! User profile model for storage and API.

use serde::{Deserialize, Serialize};

/// User profile stored in `users/{uid}`.
///
/// The profile exists mainly so the background refresh can enumerate users;
/// identity itself lives with the Identity Provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Identity Provider subject (also used as document ID)
    pub uid: String,
    /// Email address (may be None if not shared)
    pub email: Option<String>,
    /// Display name from the identity assertion
    pub display_name: Option<String>,
    /// When the user first signed in
    pub created_at: String,
    /// Last session timestamp
    pub last_active: String,
}
