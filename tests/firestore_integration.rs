// SPDX-License-Identifier: MIT

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (FIRESTORE_EMULATOR_HOST set). The emulator provides a clean state for
//! each test run.

use gradesync::db::FirestoreDb;
use gradesync::models::{
    AssignmentCache, AuthStatus, CourseSettings, GradescopeCredentials, Provider, UserProfile,
    UserSettings,
};
use std::collections::BTreeMap;

mod common;
use common::test_db;

/// Generate a unique uid for test isolation.
fn unique_uid() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    format!(
        "test-{}",
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

fn test_course(name: &str) -> CourseSettings {
    CourseSettings {
        name: Some(name.to_string()),
        href: Some("/courses/1".to_string()),
        color: Some("3".to_string()),
    }
}

// ═══════════════════════════════════════════════════════════════════
// SETTINGS
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn settings_round_trip() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    assert!(db.get_settings(&uid).await.unwrap().is_none());

    let settings = UserSettings {
        calendar_id: Some("cal@example.com".to_string()),
        completed_assignment_color: Some("8".to_string()),
        courses: BTreeMap::from([("101".to_string(), test_course("CS 101"))]),
    };
    db.set_settings(&uid, &settings).await.unwrap();

    let loaded = db.get_settings(&uid).await.unwrap().unwrap();
    assert_eq!(loaded.calendar_id.as_deref(), Some("cal@example.com"));
    assert_eq!(loaded.completed_assignment_color.as_deref(), Some("8"));
    assert_eq!(loaded.courses["101"].name.as_deref(), Some("CS 101"));
}

#[tokio::test]
async fn clearing_calendar_id_reads_back_empty() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    db.set_calendar_id(&uid, "cal@example.com").await.unwrap();
    db.set_calendar_id(&uid, "").await.unwrap();

    // Reconciliation writes an empty selection; it must survive the
    // round trip as empty, not resurrect the old id.
    let loaded = db.get_settings(&uid).await.unwrap().unwrap();
    assert_eq!(loaded.calendar_id.as_deref(), Some(""));
}

#[tokio::test]
async fn set_courses_preserves_other_settings_fields() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    db.set_calendar_id(&uid, "cal@example.com").await.unwrap();

    let courses = BTreeMap::from([("202".to_string(), test_course("MATH 51"))]);
    db.set_courses(&uid, courses).await.unwrap();

    let loaded = db.get_settings(&uid).await.unwrap().unwrap();
    assert_eq!(loaded.calendar_id.as_deref(), Some("cal@example.com"));
    assert!(loaded.courses.contains_key("202"));
}

// ═══════════════════════════════════════════════════════════════════
// AUTH STATUS AND CREDENTIALS
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn provider_flags_update_independently() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    db.set_provider_status(&uid, Provider::Google, true)
        .await
        .unwrap();
    db.set_provider_status(&uid, Provider::Gradescope, true)
        .await
        .unwrap();
    db.set_provider_status(&uid, Provider::Google, false)
        .await
        .unwrap();

    let status: AuthStatus = db.get_auth_status(&uid).await.unwrap().unwrap();
    assert!(!status.google);
    assert!(status.gradescope, "gradescope flag must survive google flip");
}

#[tokio::test]
async fn credentials_for_one_provider_preserve_the_other() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    db.set_google_token(&uid, "refresh-token-1").await.unwrap();
    db.set_gradescope_credentials(
        &uid,
        &GradescopeCredentials {
            token: Some("signed-token".to_string()),
            email: Some("student@example.com".to_string()),
            password: None,
        },
    )
    .await
    .unwrap();

    let creds = db.get_credentials(&uid).await.unwrap().unwrap();
    assert_eq!(creds.google.unwrap().token, "refresh-token-1");
    let gs = creds.gradescope.unwrap();
    assert_eq!(gs.token.as_deref(), Some("signed-token"));
    assert_eq!(gs.email.as_deref(), Some("student@example.com"));
}

// ═══════════════════════════════════════════════════════════════════
// ASSIGNMENT CACHE
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn assignment_cache_round_trip() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    let mut cache = AssignmentCache::default();
    cache.assignments.insert(
        "HW 1 [101]".to_string(),
        gradesync::models::Assignment {
            name: "HW 1".to_string(),
            due_date: "2026-09-10T23:59:00-07:00".to_string(),
            completed: false,
            course_id: "101".to_string(),
            event_id: "evt_abc".to_string(),
            outdated: true,
        },
    );
    db.set_assignment_cache(&uid, &cache).await.unwrap();

    let loaded = db.get_assignment_cache(&uid).await.unwrap().unwrap();
    let entry = &loaded.assignments["HW 1 [101]"];
    assert_eq!(entry.event_id, "evt_abc");
    assert!(entry.outdated);
}

// ═══════════════════════════════════════════════════════════════════
// ACCOUNT DELETION
// ═══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn account_deletion_cascades_over_every_subtree() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();
    let now = chrono::Utc::now().to_rfc3339();

    // Populate all five user-data subtrees.
    db.upsert_user_profile(&UserProfile {
        uid: uid.clone(),
        email: Some("student@example.com".to_string()),
        display_name: Some("Test Student".to_string()),
        created_at: now.clone(),
        last_active: now,
    })
    .await
    .unwrap();
    db.set_provider_status(&uid, Provider::Google, true)
        .await
        .unwrap();
    db.set_google_token(&uid, "refresh-token").await.unwrap();
    db.set_calendar_id(&uid, "cal@example.com").await.unwrap();
    db.set_assignment_cache(&uid, &AssignmentCache::default())
        .await
        .unwrap();

    let deleted = db.delete_user_data(&uid).await.unwrap();
    assert_eq!(deleted, FirestoreDb::user_data_paths(&uid).len());

    assert!(db.get_user_profile(&uid).await.unwrap().is_none());
    assert!(db.get_auth_status(&uid).await.unwrap().is_none());
    assert!(db.get_credentials(&uid).await.unwrap().is_none());
    assert!(db.get_settings(&uid).await.unwrap().is_none());
    assert!(db.get_assignment_cache(&uid).await.unwrap().is_none());
}

#[tokio::test]
async fn deletion_of_absent_user_is_harmless() {
    require_emulator!();

    let db = test_db().await;
    let uid = unique_uid();

    // Firestore deletes are idempotent; all paths still count as handled.
    let deleted = db.delete_user_data(&uid).await.unwrap();
    assert_eq!(deleted, FirestoreDb::user_data_paths(&uid).len());
}
