//! Append-only security event log.
//!
//! Every authentication-relevant success or failure writes exactly one event.
//! The client-facing error stays generic; the detailed reason goes into the
//! event's metadata map, which only the audit trail sees.

use actix_web::HttpRequest;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::security_event::{SecurityEvent, SecurityEventKind, SessionActivity};
use crate::store::Store;

/// Client metadata attached to every event.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    /// Extracts peer address and User-Agent from an incoming request.
    pub fn from_request(req: &HttpRequest) -> Self {
        Self {
            ip: req
                .connection_info()
                .realip_remote_addr()
                .map(str::to_string),
            user_agent: req
                .headers()
                .get("User-Agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

pub struct SecurityEventLog<'a> {
    store: &'a dyn Store,
}

impl<'a> SecurityEventLog<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Appends one immutable event. `user_id` is `None` for anonymous
    /// attempts (unknown email, bad recovery token).
    pub async fn record(
        &self,
        kind: SecurityEventKind,
        user_id: Option<i32>,
        success: bool,
        meta: &ClientMeta,
        metadata: Value,
    ) -> Result<(), AppError> {
        let event = SecurityEvent {
            id: Uuid::new_v4(),
            user_id,
            kind,
            success,
            ip_address: meta.ip.clone(),
            user_agent: meta.user_agent.clone(),
            metadata,
            created_at: Utc::now(),
        };
        self.store.append_security_event(event).await?;
        Ok(())
    }

    /// Read-only projection of a user's login sessions: each `login_success`
    /// paired with the next `logout`, duration computed here rather than
    /// stored redundantly. A login without a following logout is an open
    /// session.
    pub async fn session_activity(&self, user_id: i32) -> Result<Vec<SessionActivity>, AppError> {
        let events = self.store.security_events_for_user(user_id).await?;

        let mut sessions = Vec::new();
        for event in events {
            match event.kind {
                SecurityEventKind::LoginSuccess if event.success => {
                    sessions.push(SessionActivity {
                        login_time: event.created_at,
                        logout_time: None,
                        duration_secs: None,
                    });
                }
                SecurityEventKind::Logout => {
                    if let Some(open) = sessions
                        .iter_mut()
                        .rev()
                        .find(|s| s.logout_time.is_none())
                    {
                        open.logout_time = Some(event.created_at);
                        open.duration_secs =
                            Some((event.created_at - open.login_time).num_seconds());
                    }
                }
                _ => {}
            }
        }
        Ok(sessions)
    }
}
