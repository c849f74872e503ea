//! Account-recovery endpoints.
//!
//! All of these run before a session exists, so none require authentication.
//! Replies are shaped identically for known and unknown emails, and token
//! failures never say whether the token was wrong, expired or already spent.

use actix_web::{post, web, HttpRequest, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use validator::Validate;

use crate::auth::events::ClientMeta;
use crate::auth::recovery::RecoveryOrchestrator;
use crate::auth::verifier::MultiMethodVerifier;
use crate::error::AppError;
use crate::models::email_challenge::ChallengePurpose;
use crate::models::recovery_grant::RecoveryReason;
use crate::models::user::UserPublic;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RequestRecoveryBody {
    #[validate(email)]
    pub email: String,
    pub reason: Option<RecoveryReason>,
}

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SelfServiceChallengeBody {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SelfServiceBody {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6))]
    pub password: String,
    #[serde(rename = "emailCode")]
    #[validate(length(equal = 6))]
    pub email_code: String,
}

/// Request recovery
///
/// Creates a 24h single-use grant for an account with exhausted backup codes
/// and dispatches the token out-of-band. The reply is the same whether or not
/// the email exists.
#[post("/recovery/request")]
pub async fn request_recovery(
    state: web::Data<AppState>,
    body: web::Json<RequestRecoveryBody>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    body.validate()?;
    let meta = ClientMeta::from_request(&req);

    let orchestrator = RecoveryOrchestrator::new(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.dev_mode,
    );
    let requested = orchestrator
        .request_recovery(
            &body.email,
            body.reason.unwrap_or(RecoveryReason::CodesExhausted),
            &meta,
        )
        .await?;

    let mut response = json!({
        "success": true,
        "message": requested.message
    });
    if let Some(token) = requested.dev_token {
        response["devToken"] = json!(token);
    }
    Ok(HttpResponse::Ok().json(response))
}

/// Verify recovery
///
/// Consumes the grant and returns a fresh backup-code set, exactly once.
#[post("/recovery/verify")]
pub async fn verify_recovery(
    state: web::Data<AppState>,
    body: web::Json<TokenBody>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    let meta = ClientMeta::from_request(&req);

    let orchestrator = RecoveryOrchestrator::new(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.dev_mode,
    );
    let completed = orchestrator.verify_recovery(&body.token, &meta).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "codes": completed.plain_codes,
        "user": UserPublic::from(&completed.user)
    })))
}

/// Emergency login
///
/// Trades a valid grant for a 30-minute emergency session without consuming
/// the grant; sensitive routes stay gated until codes are regenerated.
#[post("/recovery/emergency")]
pub async fn emergency_login(
    state: web::Data<AppState>,
    body: web::Json<TokenBody>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    let meta = ClientMeta::from_request(&req);

    let orchestrator = RecoveryOrchestrator::new(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.dev_mode,
    );
    let session = orchestrator.emergency_login(&body.token, &meta).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "token": session.token,
        "expiresIn": session.expires_in_secs,
        "user": UserPublic::from(&session.user)
    })))
}

/// Self-service challenge
///
/// Issues the email one-time code for the self-service AND path. The reply
/// does not reveal whether the account exists.
#[post("/recovery/self-service/challenge")]
pub async fn self_service_challenge(
    state: web::Data<AppState>,
    body: web::Json<SelfServiceChallengeBody>,
) -> Result<impl Responder, AppError> {
    body.validate()?;

    let mut response = json!({
        "success": true,
        "message": "If an account exists for that email, a verification code has been sent"
    });

    if let Some(user) = state.store.find_user_by_email(&body.email).await? {
        let verifier = MultiMethodVerifier::new(
            state.store.as_ref(),
            state.notifier.as_ref(),
            state.dev_mode,
        );
        let issued = verifier
            .issue_email_challenge(&user, ChallengePurpose::SelfServiceRecovery)
            .await?;
        if let Some(code) = issued.dev_code {
            response["devCode"] = json!(code);
        }
    }

    Ok(HttpResponse::Ok().json(response))
}

/// Self-service regeneration
///
/// The stricter AND path for exhausted codes: password AND email code, both
/// required; refused while any unused backup code remains.
#[post("/recovery/self-service")]
pub async fn self_service_regenerate(
    state: web::Data<AppState>,
    body: web::Json<SelfServiceBody>,
    req: HttpRequest,
) -> Result<impl Responder, AppError> {
    body.validate()?;
    let meta = ClientMeta::from_request(&req);

    let verifier = MultiMethodVerifier::new(
        state.store.as_ref(),
        state.notifier.as_ref(),
        state.dev_mode,
    );
    let (codes, user) = verifier
        .self_service_regenerate(&body.email, &body.password, &body.email_code, &meta)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "codes": codes,
        "user": UserPublic::from(&user),
        "method": "self_service"
    })))
}
