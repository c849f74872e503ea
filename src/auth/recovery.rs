//! Account recovery orchestration for the "all backup codes exhausted" case.
//!
//! Three operations: request a recovery grant (delivered out-of-band),
//! consume it to regenerate the full backup-code set, or trade it for a
//! short-lived emergency session without consuming it. Responses never
//! distinguish wrong tokens from expired or used ones, and requesting
//! recovery for an unknown email looks identical to the known-email case.

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;

use crate::auth::backup_codes::BackupCodeVault;
use crate::auth::events::{ClientMeta, SecurityEventLog};
use crate::auth::token::{generate_token, SessionKind, EMERGENCY_TTL_MINUTES};
use crate::error::AppError;
use crate::models::recovery_grant::{RecoveryGrant, RecoveryReason};
use crate::models::security_event::SecurityEventKind;
use crate::models::user::User;
use crate::notify::NotificationSender;
use crate::store::Store;

/// 256 bits of entropy, hex encoded.
const TOKEN_BYTES: usize = 32;

fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Outcome of a recovery request. The message is identical whether or not the
/// email exists; `dev_token` is populated only in dev mode for a real grant.
#[derive(Debug)]
pub struct RecoveryRequested {
    pub message: &'static str,
    pub dev_token: Option<String>,
}

/// Outcome of consuming a grant: one final display of the fresh plaintext set.
#[derive(Debug)]
pub struct RecoveryCompleted {
    pub plain_codes: Vec<String>,
    pub user: User,
}

/// Outcome of an emergency login.
#[derive(Debug)]
pub struct EmergencySession {
    pub token: String,
    pub expires_in_secs: i64,
    pub user: User,
}

pub struct RecoveryOrchestrator<'a> {
    store: &'a dyn Store,
    notifier: &'a dyn NotificationSender,
    dev_mode: bool,
}

const GENERIC_RECOVERY_MESSAGE: &str =
    "If an account exists for that email, recovery instructions have been sent";

impl<'a> RecoveryOrchestrator<'a> {
    pub fn new(store: &'a dyn Store, notifier: &'a dyn NotificationSender, dev_mode: bool) -> Self {
        Self {
            store,
            notifier,
            dev_mode,
        }
    }

    /// Creates a 24h single-use grant and dispatches its token out-of-band.
    ///
    /// Unknown emails get the same success-shaped reply (no enumeration).
    /// An identity that still has unused codes gets a specific precondition
    /// error instead, directing it to ordinary login.
    pub async fn request_recovery(
        &self,
        email: &str,
        reason: RecoveryReason,
        meta: &ClientMeta,
    ) -> Result<RecoveryRequested, AppError> {
        let events = SecurityEventLog::new(self.store);

        let user = match self.store.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                events
                    .record(
                        SecurityEventKind::AccountRecoveryRequested,
                        None,
                        false,
                        meta,
                        json!({"reason": "unknown_email", "email": email.to_lowercase()}),
                    )
                    .await?;
                return Ok(RecoveryRequested {
                    message: GENERIC_RECOVERY_MESSAGE,
                    dev_token: None,
                });
            }
        };

        // Defense in depth: recovery is for exhausted codes only.
        let vault = BackupCodeVault::new(self.store);
        if vault.count_unused(user.id).await? > 0 {
            events
                .record(
                    SecurityEventKind::AccountRecoveryRequested,
                    Some(user.id),
                    false,
                    meta,
                    json!({"reason": "unused_codes_remain"}),
                )
                .await?;
            return Err(AppError::PreconditionFailed(
                "Unused backup codes remain; log in normally instead".into(),
            ));
        }

        let token = random_token();
        let grant = RecoveryGrant::new(
            user.id,
            token.clone(),
            reason,
            meta.ip.clone(),
            meta.user_agent.clone(),
        );
        let grant_id = grant.id;
        self.store.insert_recovery_grant(grant).await?;

        self.notifier.send_recovery_token(&user.email, &token).await?;

        events
            .record(
                SecurityEventKind::AccountRecoveryRequested,
                Some(user.id),
                true,
                meta,
                json!({"grant_id": grant_id, "reason": reason}),
            )
            .await?;

        Ok(RecoveryRequested {
            message: GENERIC_RECOVERY_MESSAGE,
            dev_token: self.dev_mode.then_some(token),
        })
    }

    /// Consumes a grant (compare-and-set) and regenerates the user's entire
    /// backup-code set. The plaintext codes are returned exactly once.
    pub async fn verify_recovery(
        &self,
        token: &str,
        meta: &ClientMeta,
    ) -> Result<RecoveryCompleted, AppError> {
        let events = SecurityEventLog::new(self.store);

        let grant = match self.store.consume_recovery_grant(token).await? {
            Some(grant) => grant,
            None => {
                // Wrong, expired and already-used all collapse here.
                events
                    .record(
                        SecurityEventKind::AccountRecoveryCompleted,
                        None,
                        false,
                        meta,
                        json!({"reason": "invalid_or_expired_token"}),
                    )
                    .await?;
                return Err(AppError::Unauthorized(
                    "Invalid or expired recovery token".into(),
                ));
            }
        };

        let user = self
            .store
            .find_user(grant.user_id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Grant owner missing".into()))?;

        let vault = BackupCodeVault::new(self.store);
        let set = vault.generate();
        vault.replace_all(user.id, &set).await?;

        events
            .record(
                SecurityEventKind::AccountRecoveryCompleted,
                Some(user.id),
                true,
                meta,
                json!({"grant_id": grant.id, "reason": grant.reason}),
            )
            .await?;

        Ok(RecoveryCompleted {
            plain_codes: set.plain_codes,
            user,
        })
    }

    /// Issues a 30-minute emergency session bound to the grant without
    /// consuming it. The session is gated by `must_regenerate_backup_codes`
    /// until the user regenerates; the grant stays actionable for the rest of
    /// its 24h window so an expired emergency session can be re-entered.
    pub async fn emergency_login(
        &self,
        token: &str,
        meta: &ClientMeta,
    ) -> Result<EmergencySession, AppError> {
        let events = SecurityEventLog::new(self.store);

        let grant = match self.store.find_actionable_grant(token).await? {
            Some(grant) => grant,
            None => {
                events
                    .record(
                        SecurityEventKind::EmergencyAccessGranted,
                        None,
                        false,
                        meta,
                        json!({"reason": "invalid_or_expired_token"}),
                    )
                    .await?;
                return Err(AppError::Unauthorized(
                    "Invalid or expired recovery token".into(),
                ));
            }
        };

        let user = self
            .store
            .find_user(grant.user_id)
            .await?
            .ok_or_else(|| AppError::InternalServerError("Grant owner missing".into()))?;

        let session_token = generate_token(
            user.id,
            user.role,
            SessionKind::Emergency { grant_id: grant.id },
        )?;

        events
            .record(
                SecurityEventKind::EmergencyAccessGranted,
                Some(user.id),
                true,
                meta,
                json!({"grant_id": grant.id}),
            )
            .await?;

        Ok(EmergencySession {
            token: session_token,
            expires_in_secs: EMERGENCY_TTL_MINUTES * 60,
            user,
        })
    }
}
