//! In-memory implementation of the [`Store`] trait.
//!
//! Backs the integration tests and local development without a database. A
//! single mutex over the whole state gives the same atomicity the Postgres
//! implementation gets from conditional updates: consumption and replacement
//! are single critical sections, so concurrent consumers of one code or grant
//! cannot both succeed.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{Store, StoreError};
use crate::models::backup_code::BackupCode;
use crate::models::email_challenge::{ChallengePurpose, EmailChallenge};
use crate::models::recovery_grant::RecoveryGrant;
use crate::models::security_event::SecurityEvent;
use crate::models::task::Task;
use crate::models::user::{Role, User};

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    next_user_id: i32,
    backup_codes: Vec<BackupCode>,
    events: Vec<SecurityEvent>,
    grants: Vec<RecoveryGrant>,
    challenges: Vec<EmailChallenge>,
    answer_hashes: HashMap<i32, Vec<String>>,
    trusted_devices: HashMap<i32, HashSet<String>>,
    whitelisted_ips: HashMap<i32, HashSet<String>>,
    tasks: Vec<Task>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning only happens if a panic occurred mid-mutation;
        // in-memory state is test-scoped, so recover the guard.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Test/dev seeding: register security-answer digests for a user.
    pub fn seed_security_answers(&self, user_id: i32, hashes: Vec<String>) {
        self.lock().answer_hashes.insert(user_id, hashes);
    }

    /// Test/dev seeding: mark a device token as trusted for a user.
    pub fn seed_trusted_device(&self, user_id: i32, device_token: &str) {
        self.lock()
            .trusted_devices
            .entry(user_id)
            .or_default()
            .insert(device_token.to_string());
    }

    /// Test/dev seeding: whitelist a client IP for a user.
    pub fn seed_whitelisted_ip(&self, user_id: i32, ip: &str) {
        self.lock()
            .whitelisted_ips
            .entry(user_id)
            .or_default()
            .insert(ip.to_string());
    }
}

fn ct_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let needle = email.to_lowercase();
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.email == needle)
            .cloned())
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: Option<&str>,
        role: Role,
    ) -> Result<User, StoreError> {
        let mut inner = self.lock();
        let email = email.to_lowercase();
        if inner.users.iter().any(|u| u.email == email) {
            return Err(StoreError::Conflict("Email already registered".into()));
        }
        inner.next_user_id += 1;
        let user = User {
            id: inner.next_user_id,
            username: username.to_string(),
            email,
            password_hash: password_hash.map(str::to_string),
            role,
            created_at: Utc::now(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    async fn update_password_hash(&self, user_id: i32, hash: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == user_id) {
            user.password_hash = Some(hash.to_string());
        }
        Ok(())
    }

    async fn replace_backup_codes(
        &self,
        user_id: i32,
        code_hashes: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.backup_codes.retain(|c| c.user_id != user_id);
        for hash in code_hashes {
            inner.backup_codes.push(BackupCode::new(user_id, hash.clone()));
        }
        Ok(())
    }

    async fn consume_backup_code(
        &self,
        user_id: i32,
        code_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        // Scan every candidate before flipping so the time taken does not
        // depend on which stored code matched.
        let mut matched: Option<usize> = None;
        for (idx, code) in inner.backup_codes.iter().enumerate() {
            let hit = code.user_id == user_id && !code.used && ct_eq(&code.code_hash, code_hash);
            if hit && matched.is_none() {
                matched = Some(idx);
            }
        }
        match matched {
            Some(idx) => {
                let code = &mut inner.backup_codes[idx];
                code.used = true;
                code.used_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_unused_backup_codes(&self, user_id: i32) -> Result<i64, StoreError> {
        Ok(self
            .lock()
            .backup_codes
            .iter()
            .filter(|c| c.user_id == user_id && !c.used)
            .count() as i64)
    }

    async fn has_backup_code_set(&self, user_id: i32) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .backup_codes
            .iter()
            .any(|c| c.user_id == user_id))
    }

    async fn append_security_event(&self, event: SecurityEvent) -> Result<(), StoreError> {
        self.lock().events.push(event);
        Ok(())
    }

    async fn security_events_for_user(
        &self,
        user_id: i32,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let mut events: Vec<SecurityEvent> = self
            .lock()
            .events
            .iter()
            .filter(|e| e.user_id == Some(user_id))
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn insert_recovery_grant(&self, grant: RecoveryGrant) -> Result<(), StoreError> {
        self.lock().grants.push(grant);
        Ok(())
    }

    async fn find_actionable_grant(
        &self,
        token: &str,
    ) -> Result<Option<RecoveryGrant>, StoreError> {
        Ok(self
            .lock()
            .grants
            .iter()
            .find(|g| ct_eq(&g.token, token) && g.is_actionable())
            .cloned())
    }

    async fn consume_recovery_grant(
        &self,
        token: &str,
    ) -> Result<Option<RecoveryGrant>, StoreError> {
        let mut inner = self.lock();
        for grant in inner.grants.iter_mut() {
            if ct_eq(&grant.token, token) && grant.is_actionable() {
                grant.used = true;
                grant.used_at = Some(Utc::now());
                return Ok(Some(grant.clone()));
            }
        }
        Ok(None)
    }

    async fn insert_email_challenge(&self, challenge: EmailChallenge) -> Result<(), StoreError> {
        self.lock().challenges.push(challenge);
        Ok(())
    }

    async fn latest_email_challenge(
        &self,
        user_id: i32,
        purpose: ChallengePurpose,
    ) -> Result<Option<EmailChallenge>, StoreError> {
        Ok(self
            .lock()
            .challenges
            .iter()
            .filter(|c| c.user_id == user_id && c.purpose == purpose)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn consume_email_challenge(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if let Some(challenge) = inner
            .challenges
            .iter_mut()
            .find(|c| c.id == id && c.used_at.is_none())
        {
            challenge.used_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    async fn security_answer_hashes(&self, user_id: i32) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .answer_hashes
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_trusted_device(
        &self,
        user_id: i32,
        device_token: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .trusted_devices
            .get(&user_id)
            .map(|set| set.contains(device_token))
            .unwrap_or(false))
    }

    async fn is_whitelisted_ip(&self, user_id: i32, ip: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .whitelisted_ips
            .get(&user_id)
            .map(|set| set.contains(ip))
            .unwrap_or(false))
    }

    async fn insert_task(&self, task: Task) -> Result<(), StoreError> {
        self.lock().tasks.push(task);
        Ok(())
    }

    async fn list_tasks(&self, user_id: i32) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn find_task(&self, id: Uuid, user_id: i32) -> Result<Option<Task>, StoreError> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == id && t.user_id == user_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_consume_backup_code_is_single_use() {
        let store = MemoryStore::new();
        let user = store
            .create_user("alice", "alice@example.com", Some("$argon2id$x"), Role::Employee)
            .await
            .unwrap();

        let hashes = vec!["a".repeat(64), "b".repeat(64)];
        store.replace_backup_codes(user.id, &hashes).await.unwrap();

        assert!(store.consume_backup_code(user.id, &hashes[0]).await.unwrap());
        assert!(!store.consume_backup_code(user.id, &hashes[0]).await.unwrap());
        assert_eq!(store.count_unused_backup_codes(user.id).await.unwrap(), 1);
    }

    #[actix_rt::test]
    async fn test_replace_is_full_replacement() {
        let store = MemoryStore::new();
        let user = store
            .create_user("bob", "bob@example.com", None, Role::Employee)
            .await
            .unwrap();

        store
            .replace_backup_codes(user.id, &vec!["a".repeat(64)])
            .await
            .unwrap();
        store.consume_backup_code(user.id, &"a".repeat(64)).await.unwrap();

        let fresh: Vec<String> = (0..8).map(|i| format!("{:064}", i)).collect();
        store.replace_backup_codes(user.id, &fresh).await.unwrap();

        // No residue of the old set, used or not.
        assert_eq!(store.count_unused_backup_codes(user.id).await.unwrap(), 8);
        assert!(!store.consume_backup_code(user.id, &"a".repeat(64)).await.unwrap());
    }

    #[actix_rt::test]
    async fn test_create_user_rejects_duplicate_email_case_insensitively() {
        let store = MemoryStore::new();
        store
            .create_user("carol", "Carol@Example.com", None, Role::Manager)
            .await
            .unwrap();
        let err = store
            .create_user("carol2", "carol@example.com", None, Role::Employee)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.find_user_by_email("CAROL@EXAMPLE.COM").await.unwrap();
        assert!(found.is_some());
    }

    #[actix_rt::test]
    async fn test_consume_recovery_grant_is_compare_and_set() {
        use crate::models::recovery_grant::{RecoveryGrant, RecoveryReason};

        let store = MemoryStore::new();
        let grant = RecoveryGrant::new(1, "f".repeat(64), RecoveryReason::CodesExhausted, None, None);
        store.insert_recovery_grant(grant).await.unwrap();

        let first = store.consume_recovery_grant(&"f".repeat(64)).await.unwrap();
        assert!(first.is_some());
        let second = store.consume_recovery_grant(&"f".repeat(64)).await.unwrap();
        assert!(second.is_none());
    }
}
