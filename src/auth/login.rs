//! Login state machine.
//!
//! `CheckingCredentials -> { Rejected, BackupCodesRequired, GracePeriod, Normal }`.
//!
//! Credential check first, then the backup-code requirement check, then
//! grace-period/emergency branching, then token issuance. Every terminal
//! transition writes exactly one security event; every rejection is generic
//! toward the client with the real reason only in event metadata.

use serde_json::json;

use crate::auth::backup_codes::BackupCodeVault;
use crate::auth::events::{ClientMeta, SecurityEventLog};
use crate::auth::hasher;
use crate::auth::token::{generate_token, SessionKind};
use crate::error::AppError;
use crate::models::security_event::SecurityEventKind;
use crate::models::user::User;
use crate::store::Store;

/// Terminal state of a login attempt.
#[derive(Debug)]
pub enum LoginOutcome {
    /// Generic rejection: unknown email, federated-only account, wrong
    /// password, or invalid/missing backup code. Indistinguishable outside.
    Rejected,
    /// Codes previously existed and are now exhausted. No session; the
    /// client is directed to the recovery flow.
    BackupCodesRequired,
    /// The account has never had backup codes: a restricted, time-boxed
    /// session is issued so the user can generate their first set.
    GracePeriod { token: String, user: User },
    /// Full login with a consumed backup code.
    Normal { token: String, user: User },
}

pub struct LoginStateMachine<'a> {
    store: &'a dyn Store,
}

impl<'a> LoginStateMachine<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &str,
        backup_code: Option<&str>,
        meta: &ClientMeta,
    ) -> Result<LoginOutcome, AppError> {
        let events = SecurityEventLog::new(self.store);
        let vault = BackupCodeVault::new(self.store);

        // 1. Identity lookup, case-insensitive. Missing identity and
        //    federated-only accounts collapse into the same rejection.
        let user = match self.store.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                events
                    .record(
                        SecurityEventKind::LoginFailed,
                        None,
                        false,
                        meta,
                        json!({"reason": "unknown_email", "email": email.to_lowercase()}),
                    )
                    .await?;
                return Ok(LoginOutcome::Rejected);
            }
        };

        let stored_hash = match &user.password_hash {
            Some(hash) => hash.clone(),
            None => {
                events
                    .record(
                        SecurityEventKind::LoginFailed,
                        Some(user.id),
                        false,
                        meta,
                        json!({"reason": "federated_only_account"}),
                    )
                    .await?;
                return Ok(LoginOutcome::Rejected);
            }
        };

        // 2. Credential check; unknown hash formats fail closed inside.
        let verification = hasher::verify_password(&stored_hash, password);
        if !verification.matches {
            events
                .record(
                    SecurityEventKind::LoginFailed,
                    Some(user.id),
                    false,
                    meta,
                    json!({"reason": "invalid_password"}),
                )
                .await?;
            return Ok(LoginOutcome::Rejected);
        }

        // Silent legacy-to-modern rehash. Best effort: the user just proved
        // possession of the password, so a failed persist must not fail the
        // login.
        if verification.should_upgrade {
            match hasher::hash_password(password) {
                Ok(upgraded) => {
                    if let Err(e) = self.store.update_password_hash(user.id, &upgraded).await {
                        log::warn!(
                            "failed to persist upgraded password hash for user {}: {}",
                            user.id,
                            e
                        );
                    }
                }
                Err(e) => {
                    log::warn!("failed to compute upgraded hash for user {}: {}", user.id, e);
                }
            }
        }

        // 3. Backup-code requirement check.
        let unused = vault.count_unused(user.id).await?;
        if unused == 0 {
            if !vault.has_any_set(user.id).await? {
                // Never had codes: restricted grace-period session.
                let token = generate_token(user.id, user.role, SessionKind::GracePeriod)?;
                events
                    .record(
                        SecurityEventKind::GracePeriodLogin,
                        Some(user.id),
                        true,
                        meta,
                        json!({"must_setup_backup_codes": true}),
                    )
                    .await?;
                return Ok(LoginOutcome::GracePeriod { token, user });
            }

            // Codes existed and are exhausted: hard rejection, recovery flow.
            events
                .record(
                    SecurityEventKind::LoginFailed,
                    Some(user.id),
                    false,
                    meta,
                    json!({"reason": "backup_codes_exhausted"}),
                )
                .await?;
            return Ok(LoginOutcome::BackupCodesRequired);
        }

        // 4. Mandatory second factor: a valid unused backup code in the same
        //    request.
        let consumed = match backup_code {
            Some(code) => vault.consume(user.id, code).await?,
            None => false,
        };
        if !consumed {
            let reason = if backup_code.is_some() {
                "invalid_backup_code"
            } else {
                "missing_backup_code"
            };
            events
                .record(
                    SecurityEventKind::LoginFailed,
                    Some(user.id),
                    false,
                    meta,
                    json!({"reason": reason}),
                )
                .await?;
            return Ok(LoginOutcome::Rejected);
        }

        let token = generate_token(user.id, user.role, SessionKind::Normal)?;
        events
            .record(
                SecurityEventKind::LoginSuccess,
                Some(user.id),
                true,
                meta,
                json!({"remaining_backup_codes": unused - 1}),
            )
            .await?;
        Ok(LoginOutcome::Normal { token, user })
    }
}
