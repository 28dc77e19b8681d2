// SPDX-License-Identifier: MIT

//! Gradesync: keep Gradescope assignments in Google Calendar
//!
//! This crate provides the backend API for linking a Google account,
//! holding a Gradescope session, and syncing assignment deadlines into a
//! calendar the user picks.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::FirestoreDb;
use services::google::GoogleCalendarService;
use services::gradescope::GradescopeService;
use services::identity::IdentityVerifier;
use services::lifecycle::LinkingService;
use services::sync::SyncService;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub identity: Arc<IdentityVerifier>,
    pub google: GoogleCalendarService,
    pub gradescope: GradescopeService,
    pub linking: LinkingService,
    pub sync: SyncService,
}
