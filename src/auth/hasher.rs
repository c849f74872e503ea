//! Credential hashing with transparent algorithm migration.
//!
//! Two hash generations are supported: the modern memory-hard argon2id format
//! and the legacy bcrypt format. The algorithm is read from the stored hash's
//! self-describing prefix; anything unrecognized is a distinct variant that
//! always fails closed. When a legacy hash verifies, the caller is told to
//! re-hash with the modern algorithm and persist the replacement, silently,
//! once per successful legacy login.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::AppError;

/// Hash algorithm family, parsed from the stored hash prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashTag {
    /// argon2id PHC string (`$argon2...`).
    Modern,
    /// bcrypt (`$2a$`, `$2b$`, `$2y$`).
    Legacy,
    /// Unrecognized or malformed prefix; verification always fails.
    Unknown,
}

impl HashTag {
    pub fn parse(stored: &str) -> Self {
        if stored.starts_with("$argon2") {
            HashTag::Modern
        } else if stored.starts_with("$2a$")
            || stored.starts_with("$2b$")
            || stored.starts_with("$2y$")
        {
            HashTag::Legacy
        } else {
            HashTag::Unknown
        }
    }
}

/// Outcome of a verification attempt.
#[derive(Debug, Clone, Copy)]
pub struct Verification {
    pub matches: bool,
    /// True iff the stored hash is legacy and the plaintext matched: the
    /// caller must re-hash and persist (best effort).
    pub should_upgrade: bool,
}

impl Verification {
    fn rejected() -> Self {
        Self {
            matches: false,
            should_upgrade: false,
        }
    }
}

/// Hashes a plaintext with the modern algorithm (argon2id, fresh OS salt).
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalServerError(format!("Failed to hash password: {}", e)))
}

/// Verifies a plaintext against a stored hash of either generation.
///
/// Fails closed on unknown tags and malformed hashes: the result is a
/// non-match, never an error the caller might misread as "maybe". The
/// underlying argon2/bcrypt comparisons are constant-time at the digest step.
pub fn verify_password(stored_hash: &str, password: &str) -> Verification {
    match HashTag::parse(stored_hash) {
        HashTag::Modern => match PasswordHash::new(stored_hash) {
            Ok(parsed) => {
                let matches = Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok();
                Verification {
                    matches,
                    should_upgrade: false,
                }
            }
            Err(_) => Verification::rejected(),
        },
        HashTag::Legacy => match bcrypt::verify(password, stored_hash) {
            Ok(matches) => Verification {
                matches,
                should_upgrade: matches,
            },
            Err(_) => Verification::rejected(),
        },
        HashTag::Unknown => Verification::rejected(),
    }
}
