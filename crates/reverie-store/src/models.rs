//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to an API layer.

use chrono::{DateTime, NaiveDate, Utc};
use reverie_shared::crypto::Salt;
use reverie_shared::types::{BlockId, EntryId, KeyVersion, ReplyId, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Unique, matched case-insensitively.
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Friendship
// ---------------------------------------------------------------------------

/// Symmetric friendship.  `user_low < user_high` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Friendship {
    pub user_low: UserId,
    pub user_high: UserId,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Encryption profile
// ---------------------------------------------------------------------------

/// Per-user key derivation parameters.  The derived key itself is never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionProfile {
    pub user_id: UserId,
    /// Random PBKDF2 salt; `None` until per-user encryption is initialized.
    pub salt: Option<Salt>,
    pub iterations: u32,
    pub version: KeyVersion,
    /// SHA-256 hex of the recovery key, if one was generated.
    pub recovery_key_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Journal entry
// ---------------------------------------------------------------------------

/// A diary entry.  `title` and `content` hold ciphertext as stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub entry_date: NaiveDate,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Shared (POV) block
// ---------------------------------------------------------------------------

/// An excerpt of an entry shared with friends.  The body is plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedBlock {
    pub id: BlockId,
    pub entry_id: EntryId,
    pub author_id: UserId,
    pub body: String,
    /// Fingerprint of the body the block was first shared with.
    pub fingerprint: String,
    /// Order of appearance within the source entry.
    pub position_index: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One recipient of a [`SharedBlock`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedBlockRecipient {
    pub block_id: BlockId,
    pub user_id: UserId,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// When the body was written into the recipient's journal; `None` while
    /// the injection is still pending.
    pub injected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A block as seen from one recipient's inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedBlock {
    pub block: SharedBlock,
    pub recipient: SharedBlockRecipient,
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// A reply on a shared block by its author or one of its recipients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockReply {
    pub id: ReplyId,
    pub block_id: BlockId,
    pub author_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
