//! Authentication endpoints: registration, login/logout, the security
//! activity projection and voluntary backup-code regeneration.
//!
//! Handlers stay thin: they validate input, extract client metadata and
//! delegate to the state machine / verifier, then shape the HTTP response.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{
    backup_codes::BackupCodeVault,
    events::{ClientMeta, SecurityEventLog},
    extractors::AuthenticatedUser,
    hasher,
    login::{LoginOutcome, LoginStateMachine},
    token::{generate_token, SessionKind},
    verifier::{MultiMethodVerifier, VerificationData, VerificationMethod},
    AuthResponse, LoginRequest, RegisterRequest,
};
use crate::error::AppError;
use crate::models::email_challenge::ChallengePurpose;
use crate::models::security_event::SecurityEventKind;
use crate::models::user::{Role, UserPublic};
use crate::AppState;
use validator::Validate;

/// Register a new user
///
/// Creates the account, generates the first backup-code set and returns the
/// plaintext codes exactly once alongside a session token.
#[post("/register")]
pub async fn register(
    state: web::Data<AppState>,
    register_data: web::Json<RegisterRequest>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    // Validate input
    register_data.validate()?;
    let meta = ClientMeta::from_request(&req);

    let password_hash = hasher::hash_password(&register_data.password)?;
    let role = register_data.role.unwrap_or(Role::Employee);

    let user = state
        .store
        .create_user(
            &register_data.username,
            &register_data.email,
            Some(&password_hash),
            role,
        )
        .await?;

    // First backup-code set, generated at registration time.
    let vault = BackupCodeVault::new(state.store.as_ref());
    let set = vault.generate();
    vault.replace_all(user.id, &set).await?;

    SecurityEventLog::new(state.store.as_ref())
        .record(
            SecurityEventKind::Registration,
            Some(user.id),
            true,
            &meta,
            json!({"role": role}),
        )
        .await?;

    let token = generate_token(user.id, user.role, SessionKind::Normal)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "token": token,
        "user": UserPublic::from(&user),
        "requiresBackupCodeDownload": true,
        "backupCodes": set.plain_codes
    })))
}

/// Login user
///
/// Runs the login state machine: credentials, then the mandatory backup-code
/// second factor, with grace-period and exhausted-codes branching.
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    login_data: web::Json<LoginRequest>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    // Validate input
    login_data.validate()?;
    let meta = ClientMeta::from_request(&req);

    let outcome = LoginStateMachine::new(state.store.as_ref())
        .login(
            &login_data.email,
            &login_data.password,
            login_data.backup_code.as_deref(),
            &meta,
        )
        .await?;

    match outcome {
        LoginOutcome::Normal { token, user } => Ok(HttpResponse::Ok().json(AuthResponse {
            success: true,
            token,
            user: UserPublic::from(&user),
            grace_period: None,
            must_setup_backup_codes: None,
        })),
        LoginOutcome::GracePeriod { token, user } => Ok(HttpResponse::Ok().json(AuthResponse {
            success: true,
            token,
            user: UserPublic::from(&user),
            grace_period: Some(true),
            must_setup_backup_codes: Some(true),
        })),
        LoginOutcome::BackupCodesRequired => Ok(HttpResponse::Unauthorized().json(json!({
            "success": false,
            "error": "All backup codes have been used; account recovery is required",
            "requiresRecovery": true
        }))),
        LoginOutcome::Rejected => Err(AppError::Unauthorized("Invalid credentials".into())),
    }
}

/// Logout
///
/// Records the closing `logout` event; the activity projection pairs it with
/// the session's `login_success`.
#[post("/logout")]
pub async fn logout(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    let meta = ClientMeta::from_request(&req);
    SecurityEventLog::new(state.store.as_ref())
        .record(
            SecurityEventKind::Logout,
            Some(user.0.sub),
            true,
            &meta,
            json!({}),
        )
        .await?;
    Ok(HttpResponse::Ok().json(json!({"success": true})))
}

/// Security activity
///
/// Read-only projection of the user's login/logout history with durations
/// computed at read time.
#[get("/activity")]
pub async fn security_activity(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let activity = SecurityEventLog::new(state.store.as_ref())
        .session_activity(user.0.sub)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "activity": activity
    })))
}

/// Issues the one-time email code consumed by the `email_verification` and
/// `progressive_verification` methods.
#[post("/backup-codes/challenge")]
pub async fn backup_code_challenge(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<impl Responder, AppError> {
    let identity = state
        .store
        .find_user(user.0.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;

    let verifier =
        MultiMethodVerifier::new(state.store.as_ref(), state.notifier.as_ref(), state.dev_mode);
    let issued = verifier
        .issue_email_challenge(&identity, ChallengePurpose::BackupCodeRegeneration)
        .await?;

    let mut body = json!({
        "success": true,
        "message": "A verification code has been sent to your email"
    });
    if let Some(code) = issued.dev_code {
        body["devCode"] = json!(code);
    }
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub method: VerificationMethod,
    #[serde(rename = "verificationData", default)]
    pub verification_data: VerificationData,
}

/// Regenerate backup codes
///
/// Voluntary regeneration via any single sufficient verification method.
/// Deliberately not gated on `require_backup_codes`: emergency sessions must
/// be able to reach this to clear their flag.
#[post("/backup-codes/regenerate")]
pub async fn regenerate_backup_codes(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    request: web::Json<RegenerateRequest>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    let meta = ClientMeta::from_request(&req);
    let identity = state
        .store
        .find_user(user.0.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid session".into()))?;

    let verifier =
        MultiMethodVerifier::new(state.store.as_ref(), state.notifier.as_ref(), state.dev_mode);
    let codes = verifier
        .regenerate(
            &identity,
            request.method,
            &request.verification_data,
            Some(&user.0),
            &meta,
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "codes": codes,
        "method": request.method.label()
    })))
}
