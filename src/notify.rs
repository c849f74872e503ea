//! Notification boundary.
//!
//! Email delivery is an external collaborator. The auth core only needs to
//! hand a recovery token or one-time code to *something* that reaches the
//! account owner out-of-band; transport, templating and retries live behind
//! this trait. The log-backed sender is for development and tests.

use async_trait::async_trait;

use crate::error::AppError;

#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a recovery link/token to the account's email address.
    async fn send_recovery_token(&self, email: &str, token: &str) -> Result<(), AppError>;

    /// Deliver a one-time 6-digit verification code.
    async fn send_verification_code(&self, email: &str, code: &str) -> Result<(), AppError>;
}

/// Development sender: records that a delivery happened without exposing the
/// secret in logs.
pub struct LogSender;

#[async_trait]
impl NotificationSender for LogSender {
    async fn send_recovery_token(&self, email: &str, token: &str) -> Result<(), AppError> {
        log::info!(
            "would send recovery token to {} ({} chars, redacted)",
            email,
            token.len()
        );
        Ok(())
    }

    async fn send_verification_code(&self, email: &str, code: &str) -> Result<(), AppError> {
        log::info!(
            "would send verification code to {} ({} digits, redacted)",
            email,
            code.len()
        );
        Ok(())
    }
}
