// SPDX-License-Identifier: MIT

//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
///
/// Canonical schema: sibling top-level collections, each keyed by uid.
pub mod collections {
    pub const USERS: &str = "users";
    pub const AUTH_STATUS: &str = "auth_status";
    pub const CREDENTIALS: &str = "credentials";
    pub const SETTINGS: &str = "settings";
    pub const ASSIGNMENTS: &str = "assignments";

    /// Every collection holding per-user data, in cascade-delete order.
    pub const USER_DATA: [&str; 5] = [ASSIGNMENTS, AUTH_STATUS, CREDENTIALS, SETTINGS, USERS];
}
