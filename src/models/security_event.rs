//! Security event model - append-only audit trail.
//!
//! Every authentication-relevant success or failure writes exactly one event.
//! Events are created and read, never mutated or deleted by the application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kinds of authentication-relevant events.
/// Corresponds to the `security_event_kind` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "security_event_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Successful password + backup-code login.
    LoginSuccess,
    /// Any rejected login attempt.
    LoginFailed,
    /// Session closed by the user; pairs with the preceding `LoginSuccess`.
    Logout,
    /// New account created.
    Registration,
    /// Login succeeded into a grace-period session (no backup codes yet).
    GracePeriodLogin,
    /// A recovery grant was requested (or an attempt was made for an
    /// unknown email - recorded with no owning identity).
    AccountRecoveryRequested,
    /// A recovery grant was consumed and backup codes regenerated.
    AccountRecoveryCompleted,
    /// An emergency-access session was issued from a recovery grant.
    EmergencyAccessGranted,
    /// Backup codes replaced outside the recovery flow.
    BackupCodesRegenerated,
    /// A re-verification attempt (any method) failed.
    VerificationFailed,
}

/// An immutable audit record.
///
/// `user_id` is `None` for anonymous attempts (unknown email, bad recovery
/// token). The free-form `metadata` map carries the detailed reason that the
/// client-facing error deliberately omits.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub user_id: Option<i32>,
    pub kind: SecurityEventKind,
    pub success: bool,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One entry of the session-activity projection: a login paired with the
/// logout that closed it. Duration is computed at read time, not stored.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionActivity {
    #[serde(rename = "loginTime")]
    pub login_time: DateTime<Utc>,
    #[serde(rename = "logoutTime")]
    pub logout_time: Option<DateTime<Utc>>,
    /// Seconds between login and logout; None while the session is open.
    #[serde(rename = "duration")]
    pub duration_secs: Option<i64>,
}
