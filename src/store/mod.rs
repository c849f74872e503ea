//! Storage boundary for the authentication core.
//!
//! All persistence goes through the [`Store`] trait so the login, recovery and
//! verification logic can be exercised against the in-memory implementation in
//! tests and local development, and against Postgres in production. The
//! operations with concurrency requirements (`consume_backup_code`,
//! `replace_backup_codes`, `consume_recovery_grant`) are specified as atomic
//! at this boundary: implementations must use conditional updates or
//! equivalent so that two concurrent consumers of the same code or grant
//! cannot both succeed, and a replacement is never observable half-done.

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::email_challenge::{ChallengePurpose, EmailChallenge};
use crate::models::recovery_grant::RecoveryGrant;
use crate::models::security_event::SecurityEvent;
use crate::models::task::Task;
use crate::models::user::{Role, User};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors surfaced by storage implementations.
#[derive(Debug)]
pub enum StoreError {
    /// Backend unreachable or timed out; the request is retryable.
    Unavailable(String),
    /// Constraint violation or other database failure.
    Database(String),
    /// The operation conflicts with current state (e.g. duplicate email).
    Conflict(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
            StoreError::Database(msg) => write!(f, "database error: {}", msg),
            StoreError::Conflict(msg) => write!(f, "conflict: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(error.to_string())
            }
            _ => StoreError::Database(error.to_string()),
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- identities ---

    /// Lookup by email; implementations compare case-insensitively.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError>;
    /// Fails with `Conflict` if the email is already registered.
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: Option<&str>,
        role: Role,
    ) -> Result<User, StoreError>;
    async fn update_password_hash(&self, user_id: i32, hash: &str) -> Result<(), StoreError>;

    // --- backup codes ---

    /// Atomic full replacement of the user's backup-code set. Also used for
    /// the first set at registration (replacing the empty set).
    async fn replace_backup_codes(
        &self,
        user_id: i32,
        code_hashes: &[String],
    ) -> Result<(), StoreError>;
    /// Compare-and-set: flips `used` on the row matching `code_hash` with
    /// `used = false`. Returns whether a row was flipped.
    async fn consume_backup_code(&self, user_id: i32, code_hash: &str)
        -> Result<bool, StoreError>;
    async fn count_unused_backup_codes(&self, user_id: i32) -> Result<i64, StoreError>;
    /// Whether the user has ever had a backup-code set (used or not).
    /// Distinguishes "never generated" from "exhausted".
    async fn has_backup_code_set(&self, user_id: i32) -> Result<bool, StoreError>;

    // --- security events ---

    async fn append_security_event(&self, event: SecurityEvent) -> Result<(), StoreError>;
    /// All events for a user, oldest first.
    async fn security_events_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SecurityEvent>, StoreError>;

    // --- recovery grants ---

    async fn insert_recovery_grant(&self, grant: RecoveryGrant) -> Result<(), StoreError>;
    /// Non-consuming lookup of an unused, unexpired grant by token.
    async fn find_actionable_grant(&self, token: &str)
        -> Result<Option<RecoveryGrant>, StoreError>;
    /// Compare-and-set consumption: marks the grant used iff it is still
    /// unused and unexpired, returning it. Two concurrent calls on the same
    /// token cannot both receive the grant.
    async fn consume_recovery_grant(
        &self,
        token: &str,
    ) -> Result<Option<RecoveryGrant>, StoreError>;

    // --- email challenges ---

    async fn insert_email_challenge(&self, challenge: EmailChallenge) -> Result<(), StoreError>;
    /// The most recent challenge for the user and purpose, valid or not.
    async fn latest_email_challenge(
        &self,
        user_id: i32,
        purpose: ChallengePurpose,
    ) -> Result<Option<EmailChallenge>, StoreError>;
    /// Marks the challenge used; returns false if it was already consumed.
    async fn consume_email_challenge(&self, id: Uuid) -> Result<bool, StoreError>;

    // --- re-verification signals ---
    // Security questions, trusted devices and IP whitelists are owned by
    // external collaborators; only the read boundary lives here.

    /// SHA-256 hex digests of the user's registered security answers.
    async fn security_answer_hashes(&self, user_id: i32) -> Result<Vec<String>, StoreError>;
    async fn is_trusted_device(&self, user_id: i32, device_token: &str)
        -> Result<bool, StoreError>;
    async fn is_whitelisted_ip(&self, user_id: i32, ip: &str) -> Result<bool, StoreError>;

    // --- tasks (downstream collaborator boundary) ---

    async fn insert_task(&self, task: Task) -> Result<(), StoreError>;
    async fn list_tasks(&self, user_id: i32) -> Result<Vec<Task>, StoreError>;
    async fn find_task(&self, id: Uuid, user_id: i32) -> Result<Option<Task>, StoreError>;
}
