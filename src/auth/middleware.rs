use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use futures::future::{ready, LocalBoxFuture, Ready};

use crate::auth::token::{verify_token, Claims};
use crate::error::AppError;

/// Guard consumed by downstream feature routes.
///
/// Grace-period and emergency sessions carry flags that lock them out of
/// ordinary operations until backup codes exist (again). Routes call this and
/// implement none of the logic themselves.
pub fn require_backup_codes(claims: &Claims) -> Result<(), AppError> {
    if claims.must_setup_backup_codes {
        return Err(AppError::BackupCodeSetupRequired);
    }
    if claims.must_regenerate_backup_codes {
        return Err(AppError::BackupCodeRegenerationRequired);
    }
    Ok(())
}

pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService { service }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Skip authentication for health check and the pre-auth endpoints:
        // login, registration and the whole recovery flow happen before a
        // session exists.
        let path = req.path();
        if path == "/health"
            || path.starts_with("/api/auth/login")
            || path.starts_with("/api/auth/register")
            || path.starts_with("/api/auth/recovery")
        {
            let fut = self.service.call(req);
            return Box::pin(fut);
        }

        let auth_header = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        match auth_header {
            Some(token) => {
                match verify_token(token) {
                    Ok(claims) => {
                        req.extensions_mut().insert(claims);
                        let fut = self.service.call(req);
                        Box::pin(fut)
                    }
                    Err(app_err) => {
                        // Convert AppError to actix_web::Error
                        Box::pin(async move { Err(app_err.into()) })
                    }
                }
            }
            None => {
                let app_err = AppError::Unauthorized("Missing token".into());
                Box::pin(async move { Err(app_err.into()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;

    fn claims() -> Claims {
        Claims {
            sub: 1,
            role: Role::Employee,
            exp: 0,
            iat: 0,
            grace_period: false,
            must_setup_backup_codes: false,
            emergency_access: false,
            must_regenerate_backup_codes: false,
            recovery_grant_id: None,
        }
    }

    #[test]
    fn test_guard_passes_normal_sessions() {
        assert!(require_backup_codes(&claims()).is_ok());
    }

    #[test]
    fn test_guard_rejects_grace_period_sessions() {
        let mut c = claims();
        c.grace_period = true;
        c.must_setup_backup_codes = true;
        match require_backup_codes(&c) {
            Err(AppError::BackupCodeSetupRequired) => {}
            other => panic!("expected BackupCodeSetupRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_guard_rejects_emergency_sessions() {
        let mut c = claims();
        c.emergency_access = true;
        c.must_regenerate_backup_codes = true;
        match require_backup_codes(&c) {
            Err(AppError::BackupCodeRegenerationRequired) => {}
            other => panic!("expected BackupCodeRegenerationRequired, got {:?}", other),
        }
    }
}
