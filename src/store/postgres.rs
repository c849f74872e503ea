//! Postgres implementation of the [`Store`] trait.
//!
//! Single-use semantics are enforced with conditional updates checking the
//! affected-row count, and full backup-code replacement runs inside one
//! transaction so readers never observe a mixed old/new set.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::email_challenge::{ChallengePurpose, EmailChallenge};
use crate::models::recovery_grant::RecoveryGrant;
use crate::models::security_event::SecurityEvent;
use crate::models::task::Task;
use crate::models::user::{Role, User};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, role, created_at
             FROM users WHERE email = LOWER($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, role, created_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: Option<&str>,
        role: Role,
    ) -> Result<User, StoreError> {
        let result = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, email, password_hash, role)
             VALUES ($1, LOWER($2), $3, $4)
             RETURNING id, username, email, password_hash, role, created_at",
        )
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Conflict("Email already registered".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_password_hash(&self, user_id: i32, hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: i32,
        code_hashes: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let hashes: Vec<&str> = code_hashes.iter().map(String::as_str).collect();
        sqlx::query(
            "INSERT INTO backup_codes (user_id, code_hash)
             SELECT $1, unnest($2::text[])",
        )
        .bind(user_id)
        .bind(&hashes)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: i32,
        code_hash: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE backup_codes
             SET used = TRUE, used_at = NOW()
             WHERE user_id = $1 AND code_hash = $2 AND used = FALSE",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_unused_backup_codes(&self, user_id: i32) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM backup_codes WHERE user_id = $1 AND used = FALSE",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn has_backup_code_set(&self, user_id: i32) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM backup_codes WHERE user_id = $1)")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn append_security_event(&self, event: SecurityEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO security_events
               (id, user_id, kind, success, ip_address, user_agent, metadata, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.kind)
        .bind(event.success)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn security_events_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let events = sqlx::query_as::<_, SecurityEvent>(
            "SELECT id, user_id, kind, success, ip_address, user_agent, metadata, created_at
             FROM security_events WHERE user_id = $1 ORDER BY created_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn insert_recovery_grant(&self, grant: RecoveryGrant) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO recovery_grants
               (id, user_id, token, reason, used, used_at, expires_at, created_at,
                ip_address, user_agent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(grant.id)
        .bind(grant.user_id)
        .bind(&grant.token)
        .bind(grant.reason)
        .bind(grant.used)
        .bind(grant.used_at)
        .bind(grant.expires_at)
        .bind(grant.created_at)
        .bind(&grant.ip_address)
        .bind(&grant.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_actionable_grant(
        &self,
        token: &str,
    ) -> Result<Option<RecoveryGrant>, StoreError> {
        let grant = sqlx::query_as::<_, RecoveryGrant>(
            "SELECT id, user_id, token, reason, used, used_at, expires_at, created_at,
                    ip_address, user_agent
             FROM recovery_grants
             WHERE token = $1 AND used = FALSE AND expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grant)
    }

    async fn consume_recovery_grant(
        &self,
        token: &str,
    ) -> Result<Option<RecoveryGrant>, StoreError> {
        let grant = sqlx::query_as::<_, RecoveryGrant>(
            "UPDATE recovery_grants
             SET used = TRUE, used_at = NOW()
             WHERE token = $1 AND used = FALSE AND expires_at > NOW()
             RETURNING id, user_id, token, reason, used, used_at, expires_at, created_at,
                       ip_address, user_agent",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(grant)
    }

    async fn insert_email_challenge(&self, challenge: EmailChallenge) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO email_challenges
               (id, user_id, code_hash, purpose, used_at, expires_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(challenge.id)
        .bind(challenge.user_id)
        .bind(&challenge.code_hash)
        .bind(challenge.purpose)
        .bind(challenge.used_at)
        .bind(challenge.expires_at)
        .bind(challenge.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_email_challenge(
        &self,
        user_id: i32,
        purpose: ChallengePurpose,
    ) -> Result<Option<EmailChallenge>, StoreError> {
        let challenge = sqlx::query_as::<_, EmailChallenge>(
            "SELECT id, user_id, code_hash, purpose, used_at, expires_at, created_at
             FROM email_challenges
             WHERE user_id = $1 AND purpose = $2
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(purpose)
        .fetch_optional(&self.pool)
        .await?;
        Ok(challenge)
    }

    async fn consume_email_challenge(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE email_challenges SET used_at = NOW() WHERE id = $1 AND used_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn security_answer_hashes(&self, user_id: i32) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT answer_hash FROM security_answers WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(h,)| h).collect())
    }

    async fn is_trusted_device(
        &self,
        user_id: i32,
        device_token: &str,
    ) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
               SELECT 1 FROM trusted_devices WHERE user_id = $1 AND device_token = $2
             )",
        )
        .bind(user_id)
        .bind(device_token)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn is_whitelisted_ip(&self, user_id: i32, ip: &str) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(
               SELECT 1 FROM whitelisted_ips WHERE user_id = $1 AND ip_address = $2
             )",
        )
        .bind(user_id)
        .bind(ip)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, title, description, status, created_at, user_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status)
        .bind(task.created_at)
        .bind(task.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tasks(&self, user_id: i32) -> Result<Vec<Task>, StoreError> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT id, title, description, status, created_at, user_id
             FROM tasks WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn find_task(&self, id: Uuid, user_id: i32) -> Result<Option<Task>, StoreError> {
        let task = sqlx::query_as::<_, Task>(
            "SELECT id, title, description, status, created_at, user_id
             FROM tasks WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }
}
