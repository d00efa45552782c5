//! # reverie-journal
//!
//! Journal services on top of `reverie-store`: per-user key management,
//! field encryption, entry saving and the POV sharing engine that copies
//! marked excerpts of an entry into friends' journals.
//!
//! Everything here is synchronous apart from the notification worker, which
//! runs on tokio and never blocks a save.

pub mod codec;
pub mod config;
pub mod entries;
pub mod error;
pub mod keys;
pub mod notify;
pub mod recipients;
pub mod sync;
pub mod telemetry;

pub use codec::{CryptoContext, EncryptedFieldCodec, FieldValue};
pub use config::JournalConfig;
pub use entries::{EntryDraft, JournalService, LoginOutcome, OpenedEntry, SaveOutcome};
pub use error::{JournalError, Result};
pub use keys::{KdfParams, KeyCache, KeyService, MigrationReport, RotationReport, Session, UserKey};
pub use notify::{Notification, NotificationDispatcher, NotificationSink};
pub use recipients::RecipientValidator;
pub use sync::{KeyProvider, PovSyncEngine, SyncSummary};
