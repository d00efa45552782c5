use reverie_shared::{CryptoError, UserId};
use reverie_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the journal services.
#[derive(Error, Debug)]
pub enum JournalError {
    /// A write needed a key and neither a per-user nor a legacy key was
    /// available. Nothing was stored.
    #[error("No encryption key available")]
    EncryptionKeyUnavailable,

    /// Key derivation was requested before a salt was recorded.
    #[error("Encryption not initialized for user {0}")]
    EncryptionNotInitialized(UserId),

    /// The supplied password does not open the user's existing entries.
    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, JournalError>;

/// Turn a store-level "no row" into a [`JournalError::NotFound`] naming what
/// was looked up.
pub(crate) fn missing(what: impl std::fmt::Display) -> impl FnOnce(StoreError) -> JournalError {
    move |e| match e {
        StoreError::NotFound => JournalError::NotFound(what.to_string()),
        other => JournalError::Store(other),
    }
}
