pub mod backup_code;
pub mod email_challenge;
pub mod recovery_grant;
pub mod security_event;
pub mod task;
pub mod user;

pub use backup_code::BackupCode;
pub use email_challenge::{ChallengePurpose, EmailChallenge};
pub use recovery_grant::{RecoveryGrant, RecoveryReason};
pub use security_event::{SecurityEvent, SecurityEventKind};
pub use task::{Task, TaskInput, TaskStatus};
pub use user::{Role, User};
