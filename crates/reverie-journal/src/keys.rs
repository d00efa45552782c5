//! Per-user key lifecycle: derivation, caching, rotation, recovery keys and
//! migration off the legacy shared key.
//!
//! Derived keys are never written to the database. They live in the caller's
//! [`Session`] and, for background work shortly after login, in the
//! process-wide [`KeyCache`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reverie_shared::constants::{DEFAULT_KDF_ITERATIONS, KEY_CACHE_TTL_SECS, MIN_KDF_ITERATIONS};
use reverie_shared::crypto::{self, SymmetricKey};
use reverie_shared::types::KeyVersion;
use reverie_shared::UserId;
use reverie_store::{Database, EncryptionProfile};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::CryptoContext;
use crate::config::JournalConfig;
use crate::error::{JournalError, Result};
use crate::sync::KeyProvider;

// ---------------------------------------------------------------------------
// Key material
// ---------------------------------------------------------------------------

/// A symmetric key for one user's journal fields. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserKey(SymmetricKey);

impl UserKey {
    pub fn from_bytes(bytes: SymmetricKey) -> Self {
        Self(bytes)
    }

    /// A random key, used for legacy-key fixtures and tests.
    pub fn generate() -> Self {
        Self(crypto::generate_symmetric_key())
    }

    pub(crate) fn as_bytes(&self) -> &SymmetricKey {
        &self.0
    }
}

impl fmt::Debug for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UserKey(..)")
    }
}

/// PBKDF2 parameters for newly derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    iterations: u32,
}

impl KdfParams {
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations < MIN_KDF_ITERATIONS {
            return Err(JournalError::InvalidConfig(format!(
                "KDF iterations must be at least {MIN_KDF_ITERATIONS}, got {iterations}"
            )));
        }
        Ok(Self { iterations })
    }

    /// Skips the iteration floor so test suites are not dominated by PBKDF2.
    /// Configuration loading never produces these.
    pub fn insecure_for_tests(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> UserKey {
    UserKey(crypto::derive_key_from_password(
        password.as_bytes(),
        salt,
        iterations,
    ))
}

// ---------------------------------------------------------------------------
// Session (primary cache)
// ---------------------------------------------------------------------------

/// Keys held for the lifetime of one login or request. Dropping the session
/// wipes every key in it, including on error paths.
#[derive(Debug, Default)]
pub struct Session {
    keys: HashMap<UserId, UserKey>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(&self, user: UserId) -> Option<&UserKey> {
        self.keys.get(&user)
    }

    pub(crate) fn insert(&mut self, user: UserId, key: UserKey) {
        self.keys.insert(user, key);
    }

    pub fn remove(&mut self, user: UserId) -> bool {
        self.keys.remove(&user).is_some()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

// ---------------------------------------------------------------------------
// Shared cache (secondary, for background work)
// ---------------------------------------------------------------------------

struct CachedKey {
    key: UserKey,
    cached_at: DateTime<Utc>,
}

impl CachedKey {
    fn is_fresh(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.cached_at < ttl
    }
}

/// Process-wide, short-lived key cache keyed by user id.
#[derive(Clone)]
pub struct KeyCache {
    ttl: chrono::Duration,
    entries: Arc<RwLock<HashMap<UserId, CachedKey>>>,
}

impl KeyCache {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| {
            warn!("key cache TTL out of range, using default");
            chrono::Duration::seconds(KEY_CACHE_TTL_SECS as i64)
        });
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, user: UserId, key: UserKey) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            user,
            CachedKey {
                key,
                cached_at: Utc::now(),
            },
        );
    }

    /// The cached key for `user`, if it has not expired.
    pub fn get(&self, user: UserId) -> Option<UserKey> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&user)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.key.clone())
    }

    pub fn forget(&self, user: UserId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&user).is_some()
    }

    /// Evict expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.is_fresh(ttl));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired cached keys");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(KEY_CACHE_TTL_SECS))
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationReport {
    pub reencrypted: usize,
    /// Entries that did not decrypt under the old key and were left as-is.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated: usize,
    /// Entries that did not decrypt under the legacy key and were left as-is.
    pub skipped: usize,
}

#[derive(Default)]
struct Tally {
    done: usize,
    skipped: usize,
}

// ---------------------------------------------------------------------------
// Key service
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct KeyService {
    cache: KeyCache,
    params: KdfParams,
    legacy_key: Option<UserKey>,
}

impl KeyService {
    pub fn new(cache: KeyCache, params: KdfParams, legacy_key: Option<UserKey>) -> Self {
        Self {
            cache,
            params,
            legacy_key,
        }
    }

    pub fn from_config(config: &JournalConfig) -> Self {
        Self::new(
            KeyCache::new(config.key_cache_ttl),
            config.kdf,
            config.legacy_key.map(UserKey::from_bytes),
        )
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    pub fn legacy_key(&self) -> Option<&UserKey> {
        self.legacy_key.as_ref()
    }

    /// Derive `user`'s key from `password` and their recorded salt.
    pub fn derive_key(&self, db: &Database, user: UserId, password: &str) -> Result<UserKey> {
        match db.get_encryption_profile(user)? {
            Some(EncryptionProfile {
                salt: Some(salt),
                iterations,
                ..
            }) => Ok(derive(password, &salt, iterations)),
            _ => Err(JournalError::EncryptionNotInitialized(user)),
        }
    }

    /// Record a fresh salt for `user` and return the key it yields.
    pub fn initialize(&self, db: &Database, user: UserId, password: &str) -> Result<UserKey> {
        let salt = crypto::generate_salt();
        let recovery_key_hash = db
            .get_encryption_profile(user)?
            .and_then(|p| p.recovery_key_hash);

        db.save_encryption_profile(&EncryptionProfile {
            user_id: user,
            salt: Some(salt),
            iterations: self.params.iterations(),
            version: KeyVersion::PerUser,
            recovery_key_hash,
            updated_at: Utc::now(),
        })?;

        info!(user = %user, "Initialized per-user encryption");
        Ok(derive(password, &salt, self.params.iterations()))
    }

    pub fn cache_key(&self, user: UserId, key: &UserKey, session: &mut Session) {
        session.insert(user, key.clone());
        self.cache.insert(user, key.clone());
        debug!(user = %user, "Cached user key");
    }

    /// Session first, then the shared cache.
    pub fn cached_key(&self, user: UserId, session: &Session) -> Option<UserKey> {
        session
            .key(user)
            .cloned()
            .or_else(|| self.cache.get(user))
    }

    /// Drop `user`'s key from both caches (logout).
    pub fn forget(&self, user: UserId, session: &mut Session) {
        session.remove(user);
        self.cache.forget(user);
        debug!(user = %user, "Forgot user key");
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// The crypto context for work done on behalf of `user`.
    pub fn context_for(&self, user: UserId, session: &Session) -> CryptoContext {
        CryptoContext::new(self.cached_key(user, session), self.legacy_key.clone())
    }

    /// Re-encrypt every entry of `user` from the key behind `old_password`
    /// to a key derived from `new_password` and a fresh salt.
    pub fn rotate_key(
        &self,
        db: &Database,
        user: UserId,
        old_password: &str,
        new_password: &str,
        session: &mut Session,
    ) -> Result<RotationReport> {
        let old_key = self.derive_key(db, user, old_password)?;
        let salt = crypto::generate_salt();
        let iterations = self.params.iterations();
        let new_key = derive(new_password, &salt, iterations);

        let tally = db.immediate_transaction(|db| -> Result<Tally> {
            let tally = reencrypt_entries(db, user, &old_key, &new_key)?;
            if tally.done == 0 && tally.skipped > 0 {
                return Err(JournalError::IncorrectPassword);
            }
            save_per_user_profile(db, user, salt, iterations)?;
            Ok(tally)
        })?;

        self.cache_key(user, &new_key, session);
        info!(
            user = %user,
            reencrypted = tally.done,
            skipped = tally.skipped,
            "Rotated user key"
        );

        Ok(RotationReport {
            reencrypted: tally.done,
            skipped: tally.skipped,
        })
    }

    /// Move a legacy-scheme user onto a per-user key. A no-op for users
    /// already on the per-user scheme.
    pub fn migrate_from_legacy_key(
        &self,
        db: &Database,
        user: UserId,
        password: &str,
        legacy_key: &UserKey,
        session: &mut Session,
    ) -> Result<MigrationReport> {
        let salt = crypto::generate_salt();
        let iterations = self.params.iterations();
        let key = derive(password, &salt, iterations);

        let tally = db.immediate_transaction(|db| -> Result<Option<Tally>> {
            if let Some(profile) = db.get_encryption_profile(user)? {
                if profile.version == KeyVersion::PerUser && profile.salt.is_some() {
                    return Ok(None);
                }
            }
            let tally = reencrypt_entries(db, user, legacy_key, &key)?;
            save_per_user_profile(db, user, salt, iterations)?;
            Ok(Some(tally))
        })?;

        let Some(tally) = tally else {
            debug!(user = %user, "Already on per-user key, nothing to migrate");
            return Ok(MigrationReport::default());
        };

        self.cache_key(user, &key, session);
        info!(
            user = %user,
            migrated = tally.done,
            skipped = tally.skipped,
            "Migrated user off the legacy key"
        );

        Ok(MigrationReport {
            migrated: tally.done,
            skipped: tally.skipped,
        })
    }

    /// Generate a recovery key, store its hash and return the plaintext.
    /// The plaintext cannot be retrieved again.
    pub fn generate_recovery_key(&self, db: &Database, user: UserId) -> Result<String> {
        let mut profile = db
            .get_encryption_profile(user)?
            .ok_or(JournalError::EncryptionNotInitialized(user))?;

        let recovery_key = crypto::generate_recovery_key();
        profile.recovery_key_hash = Some(crypto::hash_recovery_key(&recovery_key));
        profile.updated_at = Utc::now();
        db.save_encryption_profile(&profile)?;

        info!(user = %user, "Generated recovery key");
        Ok(recovery_key)
    }

    pub fn verify_recovery_key(&self, db: &Database, user: UserId, candidate: &str) -> Result<bool> {
        Ok(db
            .get_encryption_profile(user)?
            .and_then(|p| p.recovery_key_hash)
            .map(|hash| crypto::verify_recovery_key(candidate, &hash))
            .unwrap_or(false))
    }
}

impl KeyProvider for KeyService {
    fn background_key(&self, user: UserId) -> Option<UserKey> {
        self.cache.get(user)
    }

    fn legacy_key(&self) -> Option<UserKey> {
        self.legacy_key.clone()
    }
}

fn save_per_user_profile(
    db: &Database,
    user: UserId,
    salt: crypto::Salt,
    iterations: u32,
) -> Result<()> {
    let recovery_key_hash = db
        .get_encryption_profile(user)?
        .and_then(|p| p.recovery_key_hash);
    db.save_encryption_profile(&EncryptionProfile {
        user_id: user,
        salt: Some(salt),
        iterations,
        version: KeyVersion::PerUser,
        recovery_key_hash,
        updated_at: Utc::now(),
    })?;
    Ok(())
}

/// Re-seal title and content of every entry owned by `user`. Entries where
/// either field fails under `from` are left untouched and counted as skipped.
fn reencrypt_entries(db: &Database, user: UserId, from: &UserKey, to: &UserKey) -> Result<Tally> {
    let mut tally = Tally::default();

    for entry in db.list_entries_for_user(user)? {
        let title = reseal(&entry.title, from, to)?;
        let content = reseal(&entry.content, from, to)?;

        match (title, content) {
            (Some(title), Some(content)) => {
                db.update_entry_fields(entry.id, &title, &content, entry.updated_at)?;
                tally.done += 1;
            }
            _ => {
                warn!(
                    user = %user,
                    entry = %entry.id,
                    "Entry does not decrypt under the previous key, leaving it untouched"
                );
                tally.skipped += 1;
            }
        }
    }

    Ok(tally)
}

fn reseal(field: &str, from: &UserKey, to: &UserKey) -> Result<Option<String>> {
    if field.is_empty() {
        return Ok(Some(String::new()));
    }
    match crypto::decrypt_text(from.as_bytes(), field) {
        Ok(mut plaintext) => {
            let sealed = crypto::encrypt_text(to.as_bytes(), &plaintext)?;
            plaintext.zeroize();
            Ok(Some(sealed))
        }
        Err(_) => Ok(None),
    }
}
