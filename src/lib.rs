#![doc = "The `taskdeck` library crate."]
#![doc = ""]
#![doc = "This crate contains the core business logic for the TaskDeck application:"]
#![doc = "the authentication and account-recovery subsystem (credential hashing with"]
#![doc = "transparent algorithm migration, mandatory backup-code MFA, grace-period and"]
#![doc = "emergency-access sessions, recovery grants and multi-method identity"]
#![doc = "re-verification), the storage boundary, domain models, routing configuration"]
#![doc = "and error handling. It is used by the main binary (`main.rs`) to construct"]
#![doc = "and run the application."]

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod routes;
pub mod store;

use std::sync::Arc;

use crate::notify::NotificationSender;
use crate::store::Store;

/// Shared application state handed to every handler.
///
/// The storage and notification boundaries are trait objects so the same
/// handlers run against Postgres in production and the in-memory store in
/// integration tests.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub notifier: Arc<dyn NotificationSender>,
    /// When true, recovery tokens and email codes are echoed in responses
    /// under `dev` keys. Never enabled in production.
    pub dev_mode: bool,
}
