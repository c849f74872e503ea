use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role of an identity within the platform.
/// Corresponds to the `user_role` SQL enum.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular team member.
    Employee,
    /// Manager; additionally eligible for the emergency-override
    /// verification method.
    Manager,
}

/// An account identity as stored in the database.
///
/// `password_hash` is `None` for federated-only accounts (OAuth sign-in with
/// no local password); such accounts can never pass password login. The hash
/// algorithm is implicit in the PHC prefix of the stored string and parsed by
/// the credential hasher, never by callers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub username: String,
    /// Stored lowercased; all lookups lowercase their input first.
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Public projection of a `User`, safe to embed in API responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserPublic {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}
