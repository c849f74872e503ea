//! Backup-code vault: generation, consumption and atomic replacement.
//!
//! Codes are the mandatory second login factor. Eight are issued at a time,
//! shaped `XXXX-XXXX` over an alphabet with the ambiguous characters removed,
//! hashed with SHA-256 before storage. Plaintext leaves this module exactly
//! once, in the `generate` return value.

use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::store::Store;

pub const SET_SIZE: usize = 8;

/// No 0/O, 1/I/L to keep the codes human-transcribable.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const GROUP_LEN: usize = 4;

pub struct BackupCodeVault<'a> {
    store: &'a dyn Store,
}

/// A freshly generated set: the plaintext for one-time display and the
/// digests that go to storage.
pub struct GeneratedSet {
    pub plain_codes: Vec<String>,
    pub code_hashes: Vec<String>,
}

/// SHA-256 hex digest of a candidate code, normalized to uppercase so user
/// transcription case does not matter.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().to_uppercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// Produces one plaintext code, e.g. `K7PQ-M3XW`.
fn random_code() -> String {
    let mut rng = OsRng;
    let group = |rng: &mut OsRng| -> String {
        (0..GROUP_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    };
    format!("{}-{}", group(&mut rng), group(&mut rng))
}

impl<'a> BackupCodeVault<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self { store }
    }

    /// Generates a full set of high-entropy codes. Does not persist; pair
    /// with [`replace_all`](Self::replace_all).
    pub fn generate(&self) -> GeneratedSet {
        let plain_codes: Vec<String> = (0..SET_SIZE).map(|_| random_code()).collect();
        let code_hashes = plain_codes.iter().map(|c| hash_code(c)).collect();
        GeneratedSet {
            plain_codes,
            code_hashes,
        }
    }

    /// Attempts to consume one unused code. Unknown and already-used codes
    /// report `false`; policy is the caller's concern. The storage layer
    /// flips the `used` flag with a compare-and-set so two concurrent logins
    /// cannot both spend the same code.
    pub async fn consume(&self, user_id: i32, candidate: &str) -> Result<bool, AppError> {
        let hash = hash_code(candidate);
        Ok(self.store.consume_backup_code(user_id, &hash).await?)
    }

    pub async fn count_unused(&self, user_id: i32) -> Result<i64, AppError> {
        Ok(self.store.count_unused_backup_codes(user_id).await?)
    }

    /// Whether the user has ever had a set, exhausted or not.
    pub async fn has_any_set(&self, user_id: i32) -> Result<bool, AppError> {
        Ok(self.store.has_backup_code_set(user_id).await?)
    }

    /// Atomic full replacement; never observable half-replaced.
    pub async fn replace_all(&self, user_id: i32, set: &GeneratedSet) -> Result<(), AppError> {
        self.store
            .replace_backup_codes(user_id, &set.code_hashes)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Role;
    use crate::store::MemoryStore;

    #[test]
    fn test_code_shape() {
        for _ in 0..50 {
            let code = random_code();
            assert_eq!(code.len(), 9);
            let (a, b) = code.split_once('-').unwrap();
            for ch in a.chars().chain(b.chars()) {
                assert!(CODE_ALPHABET.contains(&(ch as u8)), "bad char {}", ch);
            }
        }
    }

    #[test]
    fn test_hash_code_normalizes_case_and_whitespace() {
        assert_eq!(hash_code("k7pq-m3xw"), hash_code(" K7PQ-M3XW "));
        assert_ne!(hash_code("K7PQ-M3XW"), hash_code("K7PQ-M3XX"));
    }

    #[test]
    fn test_generate_produces_eight_distinct_codes() {
        let store = MemoryStore::new();
        let vault = BackupCodeVault::new(&store);
        let set = vault.generate();
        assert_eq!(set.plain_codes.len(), SET_SIZE);
        assert_eq!(set.code_hashes.len(), SET_SIZE);

        let mut unique = set.plain_codes.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), SET_SIZE);
    }

    #[actix_rt::test]
    async fn test_consume_is_idempotent_per_code() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dave", "dave@example.com", None, Role::Employee)
            .await
            .unwrap();
        let vault = BackupCodeVault::new(&store);

        let set = vault.generate();
        vault.replace_all(user.id, &set).await.unwrap();
        assert_eq!(vault.count_unused(user.id).await.unwrap(), 8);

        let code = &set.plain_codes[3];
        assert!(vault.consume(user.id, code).await.unwrap());
        assert!(!vault.consume(user.id, code).await.unwrap());
        assert_eq!(vault.count_unused(user.id).await.unwrap(), 7);

        assert!(!vault.consume(user.id, "AAAA-AAAA").await.unwrap());
    }

    #[actix_rt::test]
    async fn test_replace_all_leaves_exactly_new_set() {
        let store = MemoryStore::new();
        let user = store
            .create_user("erin", "erin@example.com", None, Role::Employee)
            .await
            .unwrap();
        let vault = BackupCodeVault::new(&store);

        let old = vault.generate();
        vault.replace_all(user.id, &old).await.unwrap();
        vault.consume(user.id, &old.plain_codes[0]).await.unwrap();

        let fresh = vault.generate();
        vault.replace_all(user.id, &fresh).await.unwrap();

        assert_eq!(vault.count_unused(user.id).await.unwrap(), SET_SIZE as i64);
        // Old codes are gone entirely, not merely marked used.
        assert!(!vault.consume(user.id, &old.plain_codes[1]).await.unwrap());
        assert!(vault.consume(user.id, &fresh.plain_codes[0]).await.unwrap());
    }

    #[actix_rt::test]
    async fn test_concurrent_consumers_of_same_code_exactly_one_wins() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let user = store
            .create_user("finn", "finn@example.com", None, Role::Employee)
            .await
            .unwrap();
        let set = BackupCodeVault::new(store.as_ref()).generate();
        BackupCodeVault::new(store.as_ref())
            .replace_all(user.id, &set)
            .await
            .unwrap();

        let code = set.plain_codes[0].clone();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let code = code.clone();
            handles.push(tokio::spawn(async move {
                BackupCodeVault::new(store.as_ref())
                    .consume(user.id, &code)
                    .await
                    .unwrap()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
