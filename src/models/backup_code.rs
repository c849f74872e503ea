//! Backup code model.
//!
//! Backup codes are the mandatory second factor after the password. They are
//! issued in sets of eight; each code is stored as a SHA-256 hash and is
//! usable exactly once. Plaintext codes exist only in the response that
//! delivered them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A single stored backup code.
///
/// The `used` flag is monotonic: once flipped to true it never reverts.
/// Regeneration replaces the whole set atomically rather than resetting flags.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BackupCode {
    pub id: Uuid,
    pub user_id: i32,
    /// SHA-256 hex digest of the plaintext code.
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub used: bool,
    /// When this code was consumed (None while unused).
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BackupCode {
    pub fn new(user_id: i32, code_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            code_hash,
            used: false,
            used_at: None,
            created_at: Utc::now(),
        }
    }
}
