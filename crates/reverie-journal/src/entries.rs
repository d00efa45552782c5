//! Entry saving and loading, with POV sharing wired in.
//!
//! A save is two-phase: the plaintext is captured in a [`PendingEntry`],
//! sealed and persisted, then the POV engine runs on the captured plaintext
//! inside the same transaction. Notifications go out after commit.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use reverie_shared::pov;
use reverie_shared::types::KeyVersion;
use reverie_shared::{BlockId, EntryId, UserId};
use reverie_store::{BlockReply, Database, JournalEntry, ReceivedBlock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::codec::{CryptoContext, EncryptedFieldCodec, FieldValue};
use crate::config::JournalConfig;
use crate::error::{missing, JournalError, Result};
use crate::keys::{KeyService, MigrationReport, Session};
use crate::notify::{self, NotificationDispatcher, TracingSink};
use crate::sync::{PovSyncEngine, SyncOutcome, SyncSummary};

/// What the caller wants stored.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    /// `None` creates a new entry.
    pub id: Option<EntryId>,
    pub user_id: UserId,
    pub entry_date: NaiveDate,
    pub title: String,
    pub content: String,
}

/// Plaintext of an entry, held for the length of one save.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PendingEntry {
    title: String,
    content: String,
}

impl PendingEntry {
    pub fn capture(draft: &EntryDraft) -> Self {
        Self {
            title: draft.title.clone(),
            content: draft.content.clone(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug)]
pub struct SaveOutcome {
    /// The entry as stored (sealed fields).
    pub entry: JournalEntry,
    pub pov: SyncSummary,
}

/// An entry with its fields opened for the current context.
#[derive(Debug, Clone)]
pub struct OpenedEntry {
    pub id: EntryId,
    pub user_id: UserId,
    pub entry_date: NaiveDate,
    pub title: FieldValue,
    pub content: FieldValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginOutcome {
    /// Set when this login moved the user off the legacy key.
    pub migration: Option<MigrationReport>,
    /// Shared blocks written into the user's journal during login.
    pub delivered: usize,
}

pub struct JournalService {
    db: Database,
    keys: KeyService,
    notifier: NotificationDispatcher,
}

impl JournalService {
    pub fn new(db: Database, keys: KeyService, notifier: NotificationDispatcher) -> Self {
        Self { db, keys, notifier }
    }

    /// Open the database named by `config` and start the notification
    /// worker. Must be called from within a tokio runtime.
    pub fn open(config: &JournalConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).map_err(reverie_store::StoreError::from)?;
        }
        let db = Database::open_at(&config.database_path)?;
        let receipts = Database::open_at(&config.database_path)?;

        let notifier = NotificationDispatcher::spawn_with_hook(
            Arc::new(TracingSink),
            config.notify_queue_capacity,
            config.notify_timeout,
            Some(notify::block_receipts(receipts)),
        );

        info!(path = %config.database_path.display(), "Journal service ready");
        Ok(Self::new(db, KeyService::from_config(config), notifier))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn keys(&self) -> &KeyService {
        &self.keys
    }

    pub fn engine(&self) -> PovSyncEngine<'_, KeyService> {
        PovSyncEngine::new(&self.db, &self.keys)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Make `user`'s key available: derive it (setting up per-user
    /// encryption or migrating off the legacy key on first use), cache it,
    /// then write any shared blocks still owed to them.
    pub fn login(&self, user: UserId, password: &str, session: &mut Session) -> Result<LoginOutcome> {
        let mut outcome = LoginOutcome::default();

        match self.db.get_encryption_profile(user)? {
            Some(profile) if profile.version == KeyVersion::PerUser && profile.salt.is_some() => {
                let key = self.keys.derive_key(&self.db, user, password)?;
                self.keys.cache_key(user, &key, session);
            }
            Some(_) => {
                let legacy = self
                    .keys
                    .legacy_key()
                    .cloned()
                    .ok_or(JournalError::EncryptionKeyUnavailable)?;
                let report = self
                    .keys
                    .migrate_from_legacy_key(&self.db, user, password, &legacy, session)?;
                outcome.migration = Some(report);
            }
            None => {
                let key = self.keys.initialize(&self.db, user, password)?;
                self.keys.cache_key(user, &key, session);
            }
        }

        let ctx = self.keys.context_for(user, session);
        outcome.delivered = self.engine().deliver_pending(user, &ctx)?;

        debug!(user = %user, delivered = outcome.delivered, "Logged in");
        Ok(outcome)
    }

    pub fn logout(&self, user: UserId, session: &mut Session) {
        self.keys.forget(user, session);
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Seal and store `draft`, then share its POV blocks. Nothing is written
    /// when the fields cannot be sealed.
    pub fn save_entry(&self, ctx: &CryptoContext, draft: EntryDraft) -> Result<SaveOutcome> {
        let pending = PendingEntry::capture(&draft);

        let title = EncryptedFieldCodec::seal(ctx, pending.title())?;
        let content = EncryptedFieldCodec::seal(ctx, pending.content())?;

        let (entry, outcome) = self.db.immediate_transaction(|db| -> Result<(JournalEntry, SyncOutcome)> {
            let now = Utc::now();
            let entry = match draft.id {
                Some(id) => {
                    let mut entry = db.get_entry(id).map_err(missing(format!("entry {id}")))?;
                    if entry.user_id != draft.user_id {
                        return Err(JournalError::PermissionDenied(format!(
                            "entry {id} belongs to another user"
                        )));
                    }
                    db.update_entry_fields(id, &title, &content, now)?;
                    entry.title = title;
                    entry.content = content;
                    entry.updated_at = now;
                    entry
                }
                None => {
                    let entry = JournalEntry {
                        id: EntryId::new(),
                        user_id: draft.user_id,
                        entry_date: draft.entry_date,
                        title,
                        content,
                        created_at: now,
                        updated_at: now,
                    };
                    db.insert_entry(&entry)?;
                    entry
                }
            };

            let outcome = self.engine().process_entry(&entry, pending.content())?;
            Ok((entry, outcome))
        })?;

        for error in &outcome.summary.errors {
            warn!(entry = %entry.id, %error, "POV recipient rejected");
        }
        self.notifier.queue_all(outcome.notifications);

        Ok(SaveOutcome {
            entry,
            pov: outcome.summary,
        })
    }

    pub fn load_entry(&self, ctx: &CryptoContext, id: EntryId) -> Result<OpenedEntry> {
        let entry = self
            .db
            .get_entry(id)
            .map_err(missing(format!("entry {id}")))?;

        Ok(OpenedEntry {
            id: entry.id,
            user_id: entry.user_id,
            entry_date: entry.entry_date,
            title: EncryptedFieldCodec::open(ctx, &entry.title),
            content: EncryptedFieldCodec::open(ctx, &entry.content),
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        })
    }

    /// The user's entry for `date`, opened.
    pub fn entry_for_date(
        &self,
        ctx: &CryptoContext,
        user: UserId,
        date: NaiveDate,
    ) -> Result<Option<OpenedEntry>> {
        match self.db.find_entry_for_date(user, date)? {
            Some(entry) => self.load_entry(ctx, entry.id).map(Some),
            None => Ok(None),
        }
    }

    /// Content without POV markup, for listings. Unreadable content shows the
    /// placeholder.
    pub fn preview(&self, ctx: &CryptoContext, id: EntryId) -> Result<String> {
        let entry = self
            .db
            .get_entry(id)
            .map_err(missing(format!("entry {id}")))?;
        Ok(match EncryptedFieldCodec::open(ctx, &entry.content) {
            FieldValue::Plain(content) => pov::strip_blocks(&content),
            FieldValue::Opaque(_) => EncryptedFieldCodec::display(ctx, &entry.content),
        })
    }

    pub fn delete_entry(&self, id: EntryId, owner: UserId) -> Result<bool> {
        self.db.immediate_transaction(|db| -> Result<bool> {
            let entry = match db.get_entry(id) {
                Ok(entry) => entry,
                Err(reverie_store::StoreError::NotFound) => return Ok(false),
                Err(e) => return Err(e.into()),
            };
            if entry.user_id != owner {
                return Err(JournalError::PermissionDenied(format!(
                    "entry {id} belongs to another user"
                )));
            }
            Ok(db.delete_entry(id)?)
        })
    }

    // ------------------------------------------------------------------
    // Shared blocks
    // ------------------------------------------------------------------

    pub fn shared_with(&self, user: UserId, unread_only: bool) -> Result<Vec<ReceivedBlock>> {
        self.engine().shared_with(user, unread_only)
    }

    pub fn unread_count(&self, user: UserId) -> Result<usize> {
        self.engine().unread_count(user)
    }

    pub fn mark_read(&self, block: BlockId, user: UserId) -> Result<bool> {
        self.engine().mark_read(block, user)
    }

    pub fn delete_for_recipient(
        &self,
        ctx: &CryptoContext,
        block: BlockId,
        user: UserId,
    ) -> Result<bool> {
        self.engine().delete_for_recipient(ctx, block, user)
    }

    pub fn reply(&self, block: BlockId, author: UserId, body: &str) -> Result<BlockReply> {
        let outcome = self.engine().create_reply(block, author, body)?;
        self.notifier.queue_all(outcome.notifications);
        Ok(outcome.reply)
    }

    pub fn replies(&self, block: BlockId, viewer: UserId) -> Result<Vec<BlockReply>> {
        self.engine().replies(block, viewer)
    }
}
