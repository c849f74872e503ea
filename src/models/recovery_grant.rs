//! Recovery grant model.
//!
//! A grant represents one outstanding account-recovery attempt: a single-use,
//! unguessable token that authorizes backup-code regeneration or emergency
//! access for 24 hours.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Why recovery was requested.
/// Corresponds to the `recovery_reason` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "recovery_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    CodesExhausted,
    ForgotPassword,
    Lockout,
}

/// Grant validity window.
pub const GRANT_TTL_HOURS: i64 = 24;

/// One outstanding recovery attempt.
///
/// The token is 256 bits from the OS RNG, hex encoded, created once and never
/// regenerated. `used` flips exactly once, via a compare-and-set at the
/// storage layer so concurrent consumers cannot both succeed.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RecoveryGrant {
    pub id: Uuid,
    pub user_id: i32,
    #[serde(skip_serializing)]
    pub token: String,
    pub reason: RecoveryReason,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RecoveryGrant {
    pub fn new(
        user_id: i32,
        token: String,
        reason: RecoveryReason,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token,
            reason,
            used: false,
            used_at: None,
            expires_at: now + Duration::hours(GRANT_TTL_HOURS),
            created_at: now,
            ip_address,
            user_agent,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Unused and unexpired: actionable by either `verify_recovery` or
    /// `emergency_login`.
    pub fn is_actionable(&self) -> bool {
        !self.used && !self.is_expired()
    }
}
