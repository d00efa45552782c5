/// Application name
pub const APP_NAME: &str = "Reverie";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Per-user PBKDF2 salt size in bytes
pub const SALT_SIZE: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count for new profiles
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Lowest iteration count accepted from configuration
pub const MIN_KDF_ITERATIONS: u32 = 600_000;

/// How long a derived key stays in the shared cache after login (seconds)
pub const KEY_CACHE_TTL_SECS: u64 = 3600;

/// Random bytes in a recovery key before encoding
pub const RECOVERY_KEY_BYTES: usize = 32;

/// Maximum length of a reply body, in characters
pub const MAX_REPLY_LENGTH: usize = 2000;

/// Rendered in place of a field that cannot be decrypted
pub const ENCRYPTED_PLACEHOLDER: &str = "[Encrypted content - login required to view]";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_POV_FINGERPRINT: &str = "reverie-pov-fingerprint-v1";

/// Hex characters kept from a fingerprint digest
pub const FINGERPRINT_LEN: usize = 32;
