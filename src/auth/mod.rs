pub mod backup_codes;
pub mod events;
pub mod extractors;
pub mod hasher;
pub mod login;
pub mod middleware;
pub mod recovery;
pub mod token;
pub mod verifier;

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::user::{Role, UserPublic};

// Re-export necessary items
pub use backup_codes::BackupCodeVault;
pub use events::{ClientMeta, SecurityEventLog};
pub use login::{LoginOutcome, LoginStateMachine};
pub use middleware::{require_backup_codes, AuthMiddleware};
pub use recovery::RecoveryOrchestrator;
pub use token::{generate_token, verify_token, Claims, SessionKind};
pub use verifier::{MultiMethodVerifier, VerificationData, VerificationMethod};

lazy_static! {
    // Regex for username validation: alphanumeric, underscores, hyphens
    static ref USERNAME_REGEX: regex::Regex = regex::Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Represents the payload for a user login request.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// User's email address.
    /// Must be a valid email format.
    #[validate(email)]
    pub email: String,
    /// User's password.
    /// Must be at least 6 characters long.
    #[validate(length(min = 6))]
    pub password: String,
    /// The mandatory second factor. May be omitted only for accounts still
    /// in their grace period; otherwise its absence rejects the login.
    #[serde(rename = "backupCode")]
    pub backup_code: Option<String>,
}

/// Represents the payload for a new user registration request.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    /// Desired username for the new account.
    /// Must be between 3 and 32 characters, alphanumeric, and can include underscores or hyphens.
    #[validate(
        length(min = 3, max = 32),
        regex(
            path = "USERNAME_REGEX",
            message = "Username must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub username: String,
    /// Email address for the new account.
    /// Must be a valid email format.
    #[validate(email)]
    pub email: String,
    /// Password for the new account.
    /// Must be at least 6 characters long.
    #[validate(length(min = 6))]
    pub password: String,
    /// Role for the new account; defaults to employee.
    pub role: Option<Role>,
}

/// Response structure after successful authentication (login or registration).
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    /// The JWT (JSON Web Token) for session authentication.
    pub token: String,
    pub user: UserPublic,
    #[serde(rename = "gracePeriod", skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<bool>,
    #[serde(rename = "mustSetupBackupCodes", skip_serializing_if = "Option::is_none")]
    pub must_setup_backup_codes: Option<bool>,
}
