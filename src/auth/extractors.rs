use actix_web::dev::Payload;
use actix_web::{Error as ActixError, FromRequest, HttpMessage, HttpRequest};
use std::future::{ready, Ready};

use crate::auth::token::Claims;
use crate::error::AppError;

/// Extracts the authenticated session's claims from request extensions.
///
/// This extractor is intended to be used on routes protected by `AuthMiddleware`,
/// which validates the JWT and inserts the decoded `Claims` into request
/// extensions. Handlers read the user id, role and session flags from here;
/// routes gated on backup codes pass the claims to `require_backup_codes`.
///
/// If no claims are found in the extensions (e.g. `AuthMiddleware` did not run),
/// this extractor returns an `AppError::Unauthorized` error.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

impl FromRequest for AuthenticatedUser {
    type Error = ActixError; // AppError will be converted into ActixError via ResponseError
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        match req.extensions().get::<Claims>().cloned() {
            Some(claims) => ready(Ok(AuthenticatedUser(claims))),
            None => {
                // This case should not be reached if AuthMiddleware is applied
                // and has inserted the claims; Unauthorized is a safe default.
                let err = AppError::Unauthorized(
                    "Session not found in request. Ensure AuthMiddleware is active.".to_string(),
                );
                ready(Err(err.into()))
            }
        }
    }
}
