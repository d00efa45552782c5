//! Journal service configuration loaded from environment variables.
//!
//! Every setting has a default so the services start with no configuration
//! at all. Invalid values are logged and ignored.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use reverie_shared::constants::KEY_CACHE_TTL_SECS;
use reverie_shared::crypto::{self, SymmetricKey};
use reverie_store::Database;

use crate::keys::KdfParams;

#[derive(Clone)]
pub struct JournalConfig {
    /// SQLite database file.
    /// Env: `REVERIE_DB_PATH`
    /// Default: platform data directory, `reverie/reverie.db`.
    pub database_path: PathBuf,

    /// Shared secret from before per-user keys, used to read old entries
    /// and migrate them (64 hex chars).
    /// Env: `REVERIE_LEGACY_KEY`
    /// Default: none.
    pub legacy_key: Option<SymmetricKey>,

    /// PBKDF2 parameters for newly derived keys.
    /// Env: `REVERIE_KDF_ITERATIONS` (at least 600 000)
    /// Default: 600 000 iterations.
    pub kdf: KdfParams,

    /// Lifetime of keys in the shared background cache.
    /// Env: `REVERIE_KEY_CACHE_TTL_SECS`
    /// Default: 3600.
    pub key_cache_ttl: Duration,

    /// Capacity of the notification queue.
    /// Env: `REVERIE_NOTIFY_QUEUE`
    /// Default: 256.
    pub notify_queue_capacity: usize,

    /// Upper bound on a single notification delivery.
    /// Env: `REVERIE_NOTIFY_TIMEOUT_MS`
    /// Default: 2000.
    pub notify_timeout: Duration,
}

impl Default for JournalConfig {
    fn default() -> Self {
        let database_path = Database::default_path().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "No platform data directory, using ./reverie.db");
            PathBuf::from("reverie.db")
        });

        Self {
            database_path,
            legacy_key: None,
            kdf: KdfParams::default(),
            key_cache_ttl: Duration::from_secs(KEY_CACHE_TTL_SECS),
            notify_queue_capacity: 256,
            notify_timeout: Duration::from_millis(2000),
        }
    }
}

impl fmt::Debug for JournalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalConfig")
            .field("database_path", &self.database_path)
            .field("legacy_key", &self.legacy_key.map(|_| "<redacted>"))
            .field("kdf", &self.kdf)
            .field("key_cache_ttl", &self.key_cache_ttl)
            .field("notify_queue_capacity", &self.notify_queue_capacity)
            .field("notify_timeout", &self.notify_timeout)
            .finish()
    }
}

impl JournalConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = var("REVERIE_DB_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(hex_key) = var("REVERIE_LEGACY_KEY") {
            match crypto::parse_key_hex(&hex_key) {
                Ok(key) => config.legacy_key = Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid REVERIE_LEGACY_KEY, ignoring");
                }
            }
        }

        if let Some(val) = var("REVERIE_KDF_ITERATIONS") {
            match val.parse::<u32>().map_err(|e| e.to_string()).and_then(|n| {
                KdfParams::new(n).map_err(|e| e.to_string())
            }) {
                Ok(params) => config.kdf = params,
                Err(e) => {
                    tracing::warn!(value = %val, error = %e, "Invalid REVERIE_KDF_ITERATIONS, using default");
                }
            }
        }

        if let Some(val) = var("REVERIE_KEY_CACHE_TTL_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.key_cache_ttl = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid REVERIE_KEY_CACHE_TTL_SECS, using default");
                }
            }
        }

        if let Some(val) = var("REVERIE_NOTIFY_QUEUE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.notify_queue_capacity = n,
                _ => {
                    tracing::warn!(value = %val, "Invalid REVERIE_NOTIFY_QUEUE, using default");
                }
            }
        }

        if let Some(val) = var("REVERIE_NOTIFY_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.notify_timeout = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %val, "Invalid REVERIE_NOTIFY_TIMEOUT_MS, using default");
                }
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> JournalConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        JournalConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.kdf.iterations(), 600_000);
        assert_eq!(config.key_cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.notify_queue_capacity, 256);
        assert_eq!(config.notify_timeout, Duration::from_millis(2000));
        assert!(config.legacy_key.is_none());
    }

    #[test]
    fn test_values_are_read() {
        let config = load(&[
            ("REVERIE_DB_PATH", "/tmp/j.db"),
            ("REVERIE_LEGACY_KEY", &"ab".repeat(32)),
            ("REVERIE_KDF_ITERATIONS", "700000"),
            ("REVERIE_KEY_CACHE_TTL_SECS", "60"),
            ("REVERIE_NOTIFY_QUEUE", "8"),
            ("REVERIE_NOTIFY_TIMEOUT_MS", "50"),
        ]);
        assert_eq!(config.database_path, PathBuf::from("/tmp/j.db"));
        assert_eq!(config.legacy_key, Some([0xab; 32]));
        assert_eq!(config.kdf.iterations(), 700_000);
        assert_eq!(config.key_cache_ttl, Duration::from_secs(60));
        assert_eq!(config.notify_queue_capacity, 8);
        assert_eq!(config.notify_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_weak_iterations_rejected() {
        let config = load(&[("REVERIE_KDF_ITERATIONS", "1000")]);
        assert_eq!(config.kdf.iterations(), 600_000);
    }

    #[test]
    fn test_bad_legacy_key_ignored() {
        assert!(load(&[("REVERIE_LEGACY_KEY", "abcd")]).legacy_key.is_none());
        assert!(load(&[("REVERIE_LEGACY_KEY", &"zz".repeat(32))])
            .legacy_key
            .is_none());
    }

    #[test]
    fn test_debug_redacts_legacy_key() {
        let config = load(&[("REVERIE_LEGACY_KEY", &"ab".repeat(32))]);
        let rendered = format!("{config:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("171, 171"));
    }
}
