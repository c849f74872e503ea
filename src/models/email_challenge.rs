//! Email challenge model - one-time 6-digit verification codes.
//!
//! Challenges back the `email_verification` re-verification method and the
//! self-service regeneration path. Codes are stored as SHA-256 hashes and
//! expire after ten minutes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// What the challenge authorizes.
/// Corresponds to the `challenge_purpose` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "challenge_purpose", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    /// Voluntary backup-code regeneration via the method dispatcher.
    BackupCodeRegeneration,
    /// The stricter self-service path used when codes are exhausted.
    SelfServiceRecovery,
}

pub const CHALLENGE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EmailChallenge {
    pub id: Uuid,
    pub user_id: i32,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub purpose: ChallengePurpose,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl EmailChallenge {
    pub fn new(user_id: i32, code_hash: String, purpose: ChallengePurpose) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            code_hash,
            purpose,
            used_at: None,
            expires_at: now + Duration::minutes(CHALLENGE_TTL_MINUTES),
            created_at: now,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.used_at.is_none() && Utc::now() <= self.expires_at
    }
}
