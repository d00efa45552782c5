//! Transparent encryption of stored journal fields.
//!
//! Reads never fail: a value that no available key opens is handed back
//! unchanged as [`FieldValue::Opaque`]. Writes fail with
//! [`JournalError::EncryptionKeyUnavailable`] rather than store plaintext.

use reverie_shared::constants::ENCRYPTED_PLACEHOLDER;
use reverie_shared::crypto;
use tracing::debug;

use crate::error::{JournalError, Result};
use crate::keys::UserKey;

/// Keys available to one request or background task.
///
/// Built explicitly and passed to every codec call; dropping it wipes the
/// keys it holds.
#[derive(Debug, Clone, Default)]
pub struct CryptoContext {
    user_key: Option<UserKey>,
    legacy_key: Option<UserKey>,
}

impl CryptoContext {
    pub fn new(user_key: Option<UserKey>, legacy_key: Option<UserKey>) -> Self {
        Self {
            user_key,
            legacy_key,
        }
    }

    /// A context with no keys; every non-empty read is opaque and every
    /// non-empty write fails.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_user_key(&self) -> bool {
        self.user_key.is_some()
    }

    pub fn can_seal(&self) -> bool {
        self.user_key.is_some() || self.legacy_key.is_some()
    }
}

/// Result of opening a stored field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Plain(String),
    /// The stored value, untouched, because no available key opened it.
    Opaque(String),
}

impl FieldValue {
    pub fn is_opaque(&self) -> bool {
        matches!(self, FieldValue::Opaque(_))
    }

    pub fn into_string(self) -> String {
        match self {
            FieldValue::Plain(s) | FieldValue::Opaque(s) => s,
        }
    }
}

pub struct EncryptedFieldCodec;

impl EncryptedFieldCodec {
    /// Decrypt `stored` with the per-user key, then the legacy key.
    pub fn open(ctx: &CryptoContext, stored: &str) -> FieldValue {
        if stored.is_empty() {
            return FieldValue::Plain(String::new());
        }

        for key in [&ctx.user_key, &ctx.legacy_key].into_iter().flatten() {
            if let Ok(plaintext) = crypto::decrypt_text(key.as_bytes(), stored) {
                return FieldValue::Plain(plaintext);
            }
        }

        debug!(
            has_user_key = ctx.user_key.is_some(),
            has_legacy_key = ctx.legacy_key.is_some(),
            "Field did not decrypt, returning it opaque"
        );
        FieldValue::Opaque(stored.to_string())
    }

    /// Plaintext when a key opens `stored`, otherwise `stored` unchanged.
    pub fn decode(ctx: &CryptoContext, stored: &str) -> String {
        Self::open(ctx, stored).into_string()
    }

    /// Text for display: unreadable values render as a fixed placeholder.
    pub fn display(ctx: &CryptoContext, stored: &str) -> String {
        match Self::open(ctx, stored) {
            FieldValue::Plain(s) => s,
            FieldValue::Opaque(_) => ENCRYPTED_PLACEHOLDER.to_string(),
        }
    }

    /// Encrypt `plaintext` for storage, preferring the per-user key.
    pub fn seal(ctx: &CryptoContext, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let key = ctx
            .user_key
            .as_ref()
            .or(ctx.legacy_key.as_ref())
            .ok_or(JournalError::EncryptionKeyUnavailable)?;

        Ok(crypto::encrypt_text(key.as_bytes(), plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(user: Option<&UserKey>, legacy: Option<&UserKey>) -> CryptoContext {
        CryptoContext::new(user.cloned(), legacy.cloned())
    }

    #[test]
    fn test_empty_passes_through() {
        let none = CryptoContext::empty();
        assert_eq!(EncryptedFieldCodec::seal(&none, "").unwrap(), "");
        assert_eq!(EncryptedFieldCodec::open(&none, ""), FieldValue::Plain(String::new()));
    }

    #[test]
    fn test_seal_then_open() {
        let key = UserKey::generate();
        let c = ctx(Some(&key), None);
        let stored = EncryptedFieldCodec::seal(&c, "dear diary").unwrap();

        assert_ne!(stored, "dear diary");
        assert_eq!(
            EncryptedFieldCodec::open(&c, &stored),
            FieldValue::Plain("dear diary".into())
        );
    }

    #[test]
    fn test_seal_without_key_fails() {
        assert!(matches!(
            EncryptedFieldCodec::seal(&CryptoContext::empty(), "secret"),
            Err(JournalError::EncryptionKeyUnavailable)
        ));
    }

    #[test]
    fn test_seal_prefers_user_key() {
        let user = UserKey::generate();
        let legacy = UserKey::generate();
        let stored = EncryptedFieldCodec::seal(&ctx(Some(&user), Some(&legacy)), "x").unwrap();

        assert_eq!(
            EncryptedFieldCodec::open(&ctx(Some(&user), None), &stored),
            FieldValue::Plain("x".into())
        );
        assert!(EncryptedFieldCodec::open(&ctx(None, Some(&legacy)), &stored).is_opaque());
    }

    #[test]
    fn test_seal_falls_back_to_legacy() {
        let legacy = UserKey::generate();
        let stored = EncryptedFieldCodec::seal(&ctx(None, Some(&legacy)), "old scheme").unwrap();
        assert_eq!(
            EncryptedFieldCodec::decode(&ctx(None, Some(&legacy)), &stored),
            "old scheme"
        );
    }

    #[test]
    fn test_open_falls_back_to_legacy_key() {
        let user = UserKey::generate();
        let legacy = UserKey::generate();
        let stored = EncryptedFieldCodec::seal(&ctx(None, Some(&legacy)), "before migration").unwrap();

        assert_eq!(
            EncryptedFieldCodec::decode(&ctx(Some(&user), Some(&legacy)), &stored),
            "before migration"
        );
    }

    #[test]
    fn test_wrong_key_returns_ciphertext_unchanged() {
        let alice = UserKey::generate();
        let bob = UserKey::generate();
        let stored = EncryptedFieldCodec::seal(&ctx(Some(&alice), None), "Title").unwrap();

        let opened = EncryptedFieldCodec::open(&ctx(Some(&bob), None), &stored);
        assert_eq!(opened, FieldValue::Opaque(stored.clone()));
        assert_eq!(EncryptedFieldCodec::decode(&ctx(Some(&bob), None), &stored), stored);
        assert_eq!(
            EncryptedFieldCodec::display(&ctx(Some(&bob), None), &stored),
            ENCRYPTED_PLACEHOLDER
        );
    }

    #[test]
    fn test_non_ciphertext_is_opaque() {
        let key = UserKey::generate();
        let c = ctx(Some(&key), None);
        assert_eq!(
            EncryptedFieldCodec::open(&c, "plain text from before encryption"),
            FieldValue::Opaque("plain text from before encryption".into())
        );
    }
}
