//! Multi-method identity re-verification for backup-code regeneration.
//!
//! Used when a user wants fresh codes outside the recovery flow. One
//! dispatcher covers five interchangeable methods, each sufficient alone;
//! a distinct self-service path (for exhausted codes without the recovery
//! email) requires password AND email code together. Failures are generic
//! toward the client; the method attempted is recorded in event metadata.

use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::auth::backup_codes::BackupCodeVault;
use crate::auth::events::{ClientMeta, SecurityEventLog};
use crate::auth::hasher;
use crate::auth::token::Claims;
use crate::error::AppError;
use crate::models::email_challenge::{ChallengePurpose, EmailChallenge};
use crate::models::security_event::SecurityEventKind;
use crate::models::user::{Role, User};
use crate::notify::NotificationSender;
use crate::store::Store;

/// Progressive-verification weights and threshold.
const WEIGHT_PASSWORD: u32 = 40;
const WEIGHT_EMAIL: u32 = 30;
const WEIGHT_TRUSTED_DEVICE: u32 = 20;
const WEIGHT_WHITELISTED_IP: u32 = 10;
const PROGRESSIVE_THRESHOLD: u32 = 70;

/// Security questions require at least this many matching answers.
const MIN_MATCHING_ANSWERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    PasswordConfirmation,
    EmailVerification,
    SecurityQuestions,
    EmergencyOverride,
    ProgressiveVerification,
}

impl VerificationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            VerificationMethod::PasswordConfirmation => "password_confirmation",
            VerificationMethod::EmailVerification => "email_verification",
            VerificationMethod::SecurityQuestions => "security_questions",
            VerificationMethod::EmergencyOverride => "emergency_override",
            VerificationMethod::ProgressiveVerification => "progressive_verification",
        }
    }
}

/// Caller-supplied evidence; each method reads only the fields it needs.
#[derive(Debug, Deserialize, Default)]
pub struct VerificationData {
    pub password: Option<String>,
    #[serde(rename = "emailCode")]
    pub email_code: Option<String>,
    #[serde(rename = "securityAnswers")]
    pub security_answers: Option<Vec<String>>,
    #[serde(rename = "deviceToken")]
    pub device_token: Option<String>,
}

/// A successful verification, tagged with the method for the audit trail.
#[derive(Debug)]
pub struct Verified {
    pub label: &'static str,
}

/// One-time code issuance result; the code is echoed only in dev mode.
pub struct IssuedChallenge {
    pub dev_code: Option<String>,
}

/// SHA-256 hex digest of a 6-digit code or a normalized security answer.
fn digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub struct MultiMethodVerifier<'a> {
    store: &'a dyn Store,
    notifier: &'a dyn NotificationSender,
    dev_mode: bool,
}

impl<'a> MultiMethodVerifier<'a> {
    pub fn new(store: &'a dyn Store, notifier: &'a dyn NotificationSender, dev_mode: bool) -> Self {
        Self {
            store,
            notifier,
            dev_mode,
        }
    }

    /// Creates and dispatches a one-time 6-digit code (10-minute expiry) for
    /// the given purpose.
    pub async fn issue_email_challenge(
        &self,
        user: &User,
        purpose: ChallengePurpose,
    ) -> Result<IssuedChallenge, AppError> {
        use rand::rngs::OsRng;
        use rand::Rng;

        let code = format!("{:06}", OsRng.gen_range(0..1_000_000u32));
        let challenge = EmailChallenge::new(user.id, digest(&code), purpose);
        self.store.insert_email_challenge(challenge).await?;
        self.notifier
            .send_verification_code(&user.email, &code)
            .await?;
        Ok(IssuedChallenge {
            dev_code: self.dev_mode.then_some(code),
        })
    }

    /// Single-method dispatcher. Each method is independently sufficient.
    ///
    /// On failure this records one `verification_failed` event and returns a
    /// generic error that does not reveal which sub-check failed; progressive
    /// verification instead reports the score needed.
    pub async fn verify(
        &self,
        user: &User,
        method: VerificationMethod,
        data: &VerificationData,
        session: Option<&Claims>,
        meta: &ClientMeta,
    ) -> Result<Verified, AppError> {
        let passed = match method {
            VerificationMethod::PasswordConfirmation => self.check_password(user, data).await?,
            VerificationMethod::EmailVerification => {
                self.check_email_code(user, data, ChallengePurpose::BackupCodeRegeneration)
                    .await?
            }
            VerificationMethod::SecurityQuestions => {
                self.check_security_answers(user, data).await?
            }
            VerificationMethod::EmergencyOverride => Self::check_override(user, session),
            VerificationMethod::ProgressiveVerification => {
                let score = self.progressive_score(user, data, meta).await?;
                if score < PROGRESSIVE_THRESHOLD {
                    self.record_failure(user, method, meta, json!({"score": score}))
                        .await?;
                    return Err(AppError::VerificationInsufficient {
                        achieved: score,
                        required: PROGRESSIVE_THRESHOLD,
                    });
                }
                true
            }
        };

        if !passed {
            self.record_failure(user, method, meta, json!({})).await?;
            return Err(AppError::Unauthorized("Verification failed".into()));
        }

        Ok(Verified {
            label: method.label(),
        })
    }

    /// Verify-then-regenerate: the only way this module hands out codes.
    pub async fn regenerate(
        &self,
        user: &User,
        method: VerificationMethod,
        data: &VerificationData,
        session: Option<&Claims>,
        meta: &ClientMeta,
    ) -> Result<Vec<String>, AppError> {
        let verified = self.verify(user, method, data, session, meta).await?;

        let vault = BackupCodeVault::new(self.store);
        let set = vault.generate();
        vault.replace_all(user.id, &set).await?;

        SecurityEventLog::new(self.store)
            .record(
                SecurityEventKind::BackupCodesRegenerated,
                Some(user.id),
                true,
                meta,
                json!({"method": verified.label}),
            )
            .await?;

        Ok(set.plain_codes)
    }

    /// The stricter self-service path for exhausted codes: password AND email
    /// code, both required. Refuses outright while any unused code remains
    /// (ordinary login must be used instead).
    pub async fn self_service_regenerate(
        &self,
        email: &str,
        password: &str,
        email_code: &str,
        meta: &ClientMeta,
    ) -> Result<(Vec<String>, User), AppError> {
        let events = SecurityEventLog::new(self.store);

        let user = match self.store.find_user_by_email(email).await? {
            Some(user) => user,
            None => {
                events
                    .record(
                        SecurityEventKind::VerificationFailed,
                        None,
                        false,
                        meta,
                        json!({"method": "self_service", "reason": "unknown_email"}),
                    )
                    .await?;
                return Err(AppError::Unauthorized("Verification failed".into()));
            }
        };

        let vault = BackupCodeVault::new(self.store);
        if vault.count_unused(user.id).await? > 0 {
            events
                .record(
                    SecurityEventKind::VerificationFailed,
                    Some(user.id),
                    false,
                    meta,
                    json!({"method": "self_service", "reason": "unused_codes_remain"}),
                )
                .await?;
            return Err(AppError::PreconditionFailed(
                "Unused backup codes remain; log in normally instead".into(),
            ));
        }

        // Both factors, unconditionally. Evaluate both before branching so a
        // present-but-wrong factor and a missing one are indistinguishable.
        let data = VerificationData {
            password: Some(password.to_string()),
            ..Default::default()
        };
        let password_ok = self.check_password(&user, &data).await?;
        let code_data = VerificationData {
            email_code: Some(email_code.to_string()),
            ..Default::default()
        };
        let code_ok = self
            .check_email_code(&user, &code_data, ChallengePurpose::SelfServiceRecovery)
            .await?;

        if !(password_ok && code_ok) {
            events
                .record(
                    SecurityEventKind::VerificationFailed,
                    Some(user.id),
                    false,
                    meta,
                    json!({
                        "method": "self_service",
                        "password_ok": password_ok,
                        "code_ok": code_ok
                    }),
                )
                .await?;
            return Err(AppError::Unauthorized("Verification failed".into()));
        }

        let set = vault.generate();
        vault.replace_all(user.id, &set).await?;
        events
            .record(
                SecurityEventKind::BackupCodesRegenerated,
                Some(user.id),
                true,
                meta,
                json!({"method": "self_service"}),
            )
            .await?;

        Ok((set.plain_codes, user))
    }

    async fn record_failure(
        &self,
        user: &User,
        method: VerificationMethod,
        meta: &ClientMeta,
        mut metadata: serde_json::Value,
    ) -> Result<(), AppError> {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("method".into(), json!(method.label()));
        }
        SecurityEventLog::new(self.store)
            .record(
                SecurityEventKind::VerificationFailed,
                Some(user.id),
                false,
                meta,
                metadata,
            )
            .await
    }

    async fn check_password(
        &self,
        user: &User,
        data: &VerificationData,
    ) -> Result<bool, AppError> {
        let (Some(stored), Some(password)) = (&user.password_hash, &data.password) else {
            return Ok(false);
        };
        Ok(hasher::verify_password(stored, password).matches)
    }

    /// Matches the submitted 6-digit code against the latest valid challenge
    /// for the purpose, timing-safe at the digest compare, consuming the
    /// challenge on success (compare-and-set, so a code works once).
    async fn check_email_code(
        &self,
        user: &User,
        data: &VerificationData,
        purpose: ChallengePurpose,
    ) -> Result<bool, AppError> {
        let Some(code) = &data.email_code else {
            return Ok(false);
        };
        let Some(challenge) = self.store.latest_email_challenge(user.id, purpose).await? else {
            return Ok(false);
        };
        if !challenge.is_valid() {
            return Ok(false);
        }
        if !ct_eq(&challenge.code_hash, &digest(code.trim())) {
            return Ok(false);
        }
        Ok(self.store.consume_email_challenge(challenge.id).await?)
    }

    /// At least two pre-registered answers must match. Question storage is an
    /// external collaborator; only the digests are read here.
    async fn check_security_answers(
        &self,
        user: &User,
        data: &VerificationData,
    ) -> Result<bool, AppError> {
        let Some(answers) = &data.security_answers else {
            return Ok(false);
        };
        let stored = self.store.security_answer_hashes(user.id).await?;
        if stored.is_empty() {
            return Ok(false);
        }

        let submitted: Vec<String> = answers
            .iter()
            .map(|a| digest(&normalize_answer(a)))
            .collect();

        // Each stored answer counts at most once, whatever the caller sent.
        let matches = stored
            .iter()
            .filter(|stored_hash| submitted.iter().any(|s| ct_eq(s, stored_hash)))
            .count();
        Ok(matches >= MIN_MATCHING_ANSWERS)
    }

    /// Escape hatch, not a generally available method: only managers and
    /// active emergency-access sessions qualify.
    fn check_override(user: &User, session: Option<&Claims>) -> bool {
        match session {
            Some(claims) => {
                claims.sub == user.id && (claims.role == Role::Manager || claims.emergency_access)
            }
            None => false,
        }
    }

    /// Weighted composite: weaker partial signals may combine to reach the
    /// trust level of a single strong factor.
    async fn progressive_score(
        &self,
        user: &User,
        data: &VerificationData,
        meta: &ClientMeta,
    ) -> Result<u32, AppError> {
        let mut score = 0;

        if self.check_password(user, data).await? {
            score += WEIGHT_PASSWORD;
        }
        if self
            .check_email_code(user, data, ChallengePurpose::BackupCodeRegeneration)
            .await?
        {
            score += WEIGHT_EMAIL;
        }
        if let Some(device) = &data.device_token {
            if self.store.is_trusted_device(user.id, device).await? {
                score += WEIGHT_TRUSTED_DEVICE;
            }
        }
        if let Some(ip) = &meta.ip {
            if self.store.is_whitelisted_ip(user.id, ip).await? {
                score += WEIGHT_WHITELISTED_IP;
            }
        }

        Ok(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogSender;
    use crate::store::MemoryStore;

    async fn seed_user(store: &MemoryStore, email: &str, password: &str) -> User {
        let hash = hasher::hash_password(password).unwrap();
        store
            .create_user("vera", email, Some(&hash), Role::Employee)
            .await
            .unwrap()
    }

    fn verifier<'a>(store: &'a MemoryStore) -> MultiMethodVerifier<'a> {
        MultiMethodVerifier::new(store, &LogSender, true)
    }

    #[actix_rt::test]
    async fn test_password_confirmation_sufficient_alone() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "vera@example.com", "pw-vera-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();

        let data = VerificationData {
            password: Some("pw-vera-123".into()),
            ..Default::default()
        };
        let verified = v
            .verify(&user, VerificationMethod::PasswordConfirmation, &data, None, &meta)
            .await
            .unwrap();
        assert_eq!(verified.label, "password_confirmation");

        let bad = VerificationData {
            password: Some("wrong".into()),
            ..Default::default()
        };
        let err = v
            .verify(&user, VerificationMethod::PasswordConfirmation, &bad, None, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[actix_rt::test]
    async fn test_email_verification_code_is_single_use() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "walt@example.com", "pw-walt-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();

        let issued = v
            .issue_email_challenge(&user, ChallengePurpose::BackupCodeRegeneration)
            .await
            .unwrap();
        let code = issued.dev_code.unwrap();
        assert_eq!(code.len(), 6);

        let data = VerificationData {
            email_code: Some(code.clone()),
            ..Default::default()
        };
        v.verify(&user, VerificationMethod::EmailVerification, &data, None, &meta)
            .await
            .unwrap();

        // The challenge was consumed; the same code fails now.
        let err = v
            .verify(&user, VerificationMethod::EmailVerification, &data, None, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[actix_rt::test]
    async fn test_security_questions_require_two_matches() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "xena@example.com", "pw-xena-123").await;
        store.seed_security_answers(
            user.id,
            vec![
                digest(&normalize_answer("Rex")),
                digest(&normalize_answer("Springfield")),
                digest(&normalize_answer("Blue")),
            ],
        );
        let v = verifier(&store);
        let meta = ClientMeta::default();

        let one_match = VerificationData {
            security_answers: Some(vec!["rex".into(), "wrong".into()]),
            ..Default::default()
        };
        assert!(v
            .verify(&user, VerificationMethod::SecurityQuestions, &one_match, None, &meta)
            .await
            .is_err());

        let two_matches = VerificationData {
            security_answers: Some(vec!["REX ".into(), "springfield".into()]),
            ..Default::default()
        };
        v.verify(&user, VerificationMethod::SecurityQuestions, &two_matches, None, &meta)
            .await
            .unwrap();
    }

    #[actix_rt::test]
    async fn test_emergency_override_requires_privileged_session() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "yuri@example.com", "pw-yuri-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();
        let data = VerificationData::default();

        // No session at all.
        assert!(v
            .verify(&user, VerificationMethod::EmergencyOverride, &data, None, &meta)
            .await
            .is_err());

        let base = Claims {
            sub: user.id,
            role: Role::Employee,
            exp: 0,
            iat: 0,
            grace_period: false,
            must_setup_backup_codes: false,
            emergency_access: false,
            must_regenerate_backup_codes: false,
            recovery_grant_id: None,
        };

        // Plain employee session: refused.
        assert!(v
            .verify(&user, VerificationMethod::EmergencyOverride, &data, Some(&base), &meta)
            .await
            .is_err());

        // Manager role qualifies.
        let manager = Claims {
            role: Role::Manager,
            ..base.clone()
        };
        v.verify(&user, VerificationMethod::EmergencyOverride, &data, Some(&manager), &meta)
            .await
            .unwrap();

        // Emergency-access session qualifies.
        let emergency = Claims {
            emergency_access: true,
            must_regenerate_backup_codes: true,
            ..base.clone()
        };
        v.verify(&user, VerificationMethod::EmergencyOverride, &data, Some(&emergency), &meta)
            .await
            .unwrap();

        // A privileged session for a different user does not.
        let other = Claims {
            sub: user.id + 1,
            role: Role::Manager,
            ..base
        };
        assert!(v
            .verify(&user, VerificationMethod::EmergencyOverride, &data, Some(&other), &meta)
            .await
            .is_err());
    }

    #[actix_rt::test]
    async fn test_progressive_threshold() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "zoe@example.com", "pw-zoe-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();

        // Password alone: 40 < 70.
        let data = VerificationData {
            password: Some("pw-zoe-123".into()),
            ..Default::default()
        };
        let err = v
            .verify(&user, VerificationMethod::ProgressiveVerification, &data, None, &meta)
            .await
            .unwrap_err();
        match err {
            AppError::VerificationInsufficient { achieved, required } => {
                assert_eq!(achieved, 40);
                assert_eq!(required, 70);
            }
            other => panic!("expected VerificationInsufficient, got {:?}", other),
        }

        // Password + email: 70 passes.
        let issued = v
            .issue_email_challenge(&user, ChallengePurpose::BackupCodeRegeneration)
            .await
            .unwrap();
        let data = VerificationData {
            password: Some("pw-zoe-123".into()),
            email_code: issued.dev_code,
            ..Default::default()
        };
        v.verify(&user, VerificationMethod::ProgressiveVerification, &data, None, &meta)
            .await
            .unwrap();
    }

    #[actix_rt::test]
    async fn test_progressive_weak_signals_combine() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "abe@example.com", "pw-abe-123").await;
        store.seed_trusted_device(user.id, "device-1");
        store.seed_whitelisted_ip(user.id, "10.0.0.5");
        let v = verifier(&store);
        let meta = ClientMeta {
            ip: Some("10.0.0.5".into()),
            user_agent: None,
        };

        // Password 40 + device 20 + ip 10 = 70.
        let data = VerificationData {
            password: Some("pw-abe-123".into()),
            device_token: Some("device-1".into()),
            ..Default::default()
        };
        v.verify(&user, VerificationMethod::ProgressiveVerification, &data, None, &meta)
            .await
            .unwrap();
    }

    #[actix_rt::test]
    async fn test_regenerate_replaces_set_after_verification() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "bea@example.com", "pw-bea-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();

        let data = VerificationData {
            password: Some("pw-bea-123".into()),
            ..Default::default()
        };
        let codes = v
            .regenerate(&user, VerificationMethod::PasswordConfirmation, &data, None, &meta)
            .await
            .unwrap();
        assert_eq!(codes.len(), 8);
        assert_eq!(
            BackupCodeVault::new(&store).count_unused(user.id).await.unwrap(),
            8
        );
    }

    #[actix_rt::test]
    async fn test_self_service_requires_both_factors() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "cal@example.com", "pw-cal-123").await;
        let v = verifier(&store);
        let meta = ClientMeta::default();

        let issued = v
            .issue_email_challenge(&user, ChallengePurpose::SelfServiceRecovery)
            .await
            .unwrap();
        let code = issued.dev_code.unwrap();

        // Wrong password, valid code: refused, even though the email code
        // alone would satisfy the single-method dispatcher.
        let err = v
            .self_service_regenerate("cal@example.com", "wrong", &code, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        // The matched code was burned by the attempt; issue a fresh one and
        // pass with both factors.
        let issued = v
            .issue_email_challenge(&user, ChallengePurpose::SelfServiceRecovery)
            .await
            .unwrap();
        let (codes, verified_user) = v
            .self_service_regenerate(
                "cal@example.com",
                "pw-cal-123",
                &issued.dev_code.unwrap(),
                &meta,
            )
            .await
            .unwrap();
        assert_eq!(verified_user.id, user.id);
        assert_eq!(codes.len(), 8);
    }

    #[actix_rt::test]
    async fn test_self_service_refused_while_codes_remain() {
        let store = MemoryStore::new();
        let user = seed_user(&store, "dot@example.com", "pw-dot-123").await;
        let vault = BackupCodeVault::new(&store);
        let set = vault.generate();
        vault.replace_all(user.id, &set).await.unwrap();

        let v = verifier(&store);
        let err = v
            .self_service_regenerate("dot@example.com", "pw-dot-123", "123456", &ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PreconditionFailed(_)));
    }
}
