//! POV reconciliation.
//!
//! Each save of an entry is compared against the blocks tracked for it:
//! new blocks are shared and injected into every recipient's journal for the
//! same date, changed blocks are updated in place, and blocks that vanished
//! from the text stop being tracked. Injected text is never retracted or
//! edited by the author's side; only the recipient can remove their copy.

use std::collections::HashSet;

use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reverie_shared::constants::MAX_REPLY_LENGTH;
use reverie_shared::crypto::fingerprint;
use reverie_shared::pov::{self, PovBlock};
use reverie_shared::types::KeyVersion;
use reverie_shared::{BlockId, EntryId, ReplyId, UserId};
use reverie_store::{
    BlockReply, Database, JournalEntry, ReceivedBlock, SharedBlock, SharedBlockRecipient,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codec::{CryptoContext, EncryptedFieldCodec, FieldValue};
use crate::error::{missing, JournalError, Result};
use crate::keys::UserKey;
use crate::notify::Notification;
use crate::recipients::{RecipientValidator, Resolution};

lazy_static! {
    static ref EXCESS_BLANK_LINES: Regex = Regex::new(r"\n{3,}").expect("blank line pattern");
}

/// Keys the engine may use to write into a recipient's journal while the
/// recipient is not the one making the request.
pub trait KeyProvider {
    /// A key for `user` that outlives their request, if one is cached.
    fn background_key(&self, user: UserId) -> Option<UserKey>;
    fn legacy_key(&self) -> Option<UserKey>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Recipient copies that could not be written yet because no key for
    /// the recipient was reachable. Delivered by
    /// [`PovSyncEngine::deliver_pending`].
    pub deferred: usize,
    pub errors: Vec<String>,
}

/// What a reconciliation produced. Notifications are to be queued only after
/// the surrounding transaction committed.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub summary: SyncSummary,
    pub notifications: Vec<Notification>,
}

#[derive(Debug)]
pub struct ReplyOutcome {
    pub reply: BlockReply,
    pub notifications: Vec<Notification>,
}

enum Injection {
    Written,
    AlreadyPresent,
    Deferred,
}

struct Candidate<'p> {
    position: u32,
    block: &'p PovBlock,
    fingerprint: String,
    /// Friends named on this block and on any duplicate of it.
    resolution: Resolution,
    /// Index into the tracked blocks this parsed block corresponds to.
    tracked: Option<usize>,
}

pub struct PovSyncEngine<'a, K> {
    db: &'a Database,
    keys: &'a K,
}

impl<'a, K: KeyProvider> PovSyncEngine<'a, K> {
    pub fn new(db: &'a Database, keys: &'a K) -> Self {
        Self { db, keys }
    }

    /// Reconcile the blocks in `plaintext` (the entry's content before
    /// encryption) with those tracked for `entry`. Runs in one immediate
    /// transaction, joining the caller's if one is open.
    pub fn process_entry(&self, entry: &JournalEntry, plaintext: &str) -> Result<SyncOutcome> {
        self.db
            .immediate_transaction(|_| self.reconcile(entry, plaintext))
    }

    fn reconcile(&self, entry: &JournalEntry, plaintext: &str) -> Result<SyncOutcome> {
        let author = entry.user_id;
        let author_name = self
            .db
            .get_user(author)
            .map_err(missing(format!("user {author}")))?
            .username;

        let parsed = pov::parse_authored(plaintext);
        let tracked = self.db.list_blocks_for_entry(entry.id)?;
        let mut claimed = vec![false; tracked.len()];
        let mut outcome = SyncOutcome::default();
        let validator = RecipientValidator::new(self.db);

        let mut candidates: Vec<Candidate<'_>> = Vec::with_capacity(parsed.len());
        for block in &parsed {
            let resolution = validator.resolve(author, &block.recipients)?;
            outcome
                .summary
                .errors
                .extend(resolution.invalid.iter().map(ToString::to_string));

            let fp = fingerprint(&author, &block.body);
            if let Some(first) = candidates.iter_mut().find(|c| c.fingerprint == fp) {
                debug!(entry = %entry.id, "Duplicate POV block in entry, merging recipients");
                first.resolution.merge(resolution);
                continue;
            }

            candidates.push(Candidate {
                position: candidates.len() as u32,
                block,
                fingerprint: fp,
                resolution,
                tracked: None,
            });
        }

        // Fingerprints first, so that a block shared anew never collides with
        // a tracked fingerprint. The stored fingerprint is that of the first
        // version, so an edited block is then recognised by its current body.
        for candidate in candidates.iter_mut() {
            let matched = tracked.iter().position(|t| t.fingerprint == candidate.fingerprint);
            if let Some(idx) = matched {
                claimed[idx] = true;
                candidate.tracked = Some(idx);
            }
        }
        for candidate in candidates.iter_mut().filter(|c| c.tracked.is_none()) {
            let matched = (0..tracked.len())
                .find(|&i| !claimed[i] && tracked[i].body == candidate.block.body);
            if let Some(idx) = matched {
                claimed[idx] = true;
                candidate.tracked = Some(idx);
            }
        }

        // An edited block keeps its slot: an unmatched parsed block takes over
        // the unmatched tracked block at the same position, provided it goes
        // to exactly the same recipients.
        for candidate in candidates
            .iter_mut()
            .filter(|c| c.tracked.is_none() && !c.resolution.valid.is_empty())
        {
            let Some(idx) = (0..tracked.len())
                .find(|&i| !claimed[i] && tracked[i].position_index == candidate.position)
            else {
                continue;
            };
            let current: HashSet<UserId> = self
                .db
                .list_block_recipients(tracked[idx].id)?
                .into_iter()
                .map(|r| r.user_id)
                .collect();
            if current == candidate.resolution.user_ids() {
                claimed[idx] = true;
                candidate.tracked = Some(idx);
            }
        }

        let now = Utc::now();

        for candidate in &candidates {
            match candidate.tracked {
                Some(idx) => {
                    let existing = &tracked[idx];
                    if existing.body != candidate.block.body {
                        self.db.update_shared_block(
                            existing.id,
                            &candidate.block.body,
                            candidate.position,
                            now,
                        )?;
                        outcome.summary.updated += 1;
                        debug!(block = %existing.id, "Updated shared block");
                    } else if existing.position_index != candidate.position {
                        self.db.update_shared_block(
                            existing.id,
                            &existing.body,
                            candidate.position,
                            now,
                        )?;
                    }
                }
                None if candidate.resolution.valid.is_empty() => {}
                None => {
                    let block_id = self.share(entry, &author_name, candidate, &mut outcome.summary)?;
                    outcome
                        .notifications
                        .push(Notification::BlockShared { block_id });
                }
            }
        }

        for (idx, block) in tracked.iter().enumerate() {
            if !claimed[idx] {
                self.db.delete_shared_block(block.id)?;
                outcome.summary.deleted += 1;
                debug!(block = %block.id, "Shared block no longer in entry, deleted");
            }
        }

        info!(
            entry = %entry.id,
            created = outcome.summary.created,
            updated = outcome.summary.updated,
            deleted = outcome.summary.deleted,
            deferred = outcome.summary.deferred,
            errors = outcome.summary.errors.len(),
            "Processed POV blocks"
        );

        Ok(outcome)
    }

    fn share(
        &self,
        entry: &JournalEntry,
        author_name: &str,
        candidate: &Candidate<'_>,
        summary: &mut SyncSummary,
    ) -> Result<BlockId> {
        let now = Utc::now();
        let block = SharedBlock {
            id: BlockId::new(),
            entry_id: entry.id,
            author_id: entry.user_id,
            body: candidate.block.body.clone(),
            fingerprint: candidate.fingerprint.clone(),
            position_index: candidate.position,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_shared_block(&block)?;

        for (_, recipient) in &candidate.resolution.valid {
            self.db.insert_block_recipient(&SharedBlockRecipient {
                block_id: block.id,
                user_id: *recipient,
                is_read: false,
                read_at: None,
                notification_sent: false,
                notification_sent_at: None,
                injected_at: None,
                created_at: now,
            })?;

            let injection = match self.recipient_context(*recipient)? {
                Some(ctx) => self.inject(&ctx, &block, author_name, *recipient, entry.entry_date)?,
                None => Injection::Deferred,
            };
            match injection {
                Injection::Written | Injection::AlreadyPresent => {
                    self.db.mark_recipient_injected(block.id, *recipient, now)?;
                }
                Injection::Deferred => {
                    debug!(block = %block.id, recipient = %recipient, "No key for recipient, injection deferred");
                    summary.deferred += 1;
                }
            }
        }

        summary.created += 1;
        debug!(
            block = %block.id,
            recipients = candidate.resolution.valid.len(),
            "Shared new block"
        );
        Ok(block.id)
    }

    /// A context able to write `user`'s journal without their session.
    /// Users on the per-user scheme are only written with their own key.
    fn recipient_context(&self, user: UserId) -> Result<Option<CryptoContext>> {
        if let Some(key) = self.keys.background_key(user) {
            return Ok(Some(CryptoContext::new(Some(key), self.keys.legacy_key())));
        }
        let per_user = matches!(
            self.db.get_encryption_profile(user)?,
            Some(profile) if profile.version == KeyVersion::PerUser
        );
        if per_user {
            return Ok(None);
        }
        Ok(self
            .keys
            .legacy_key()
            .map(|legacy| CryptoContext::new(None, Some(legacy))))
    }

    /// Append `block` to `recipient`'s entry for `date` unless its marker is
    /// already there. The entry is created if missing.
    fn inject(
        &self,
        ctx: &CryptoContext,
        block: &SharedBlock,
        author_name: &str,
        recipient: UserId,
        date: NaiveDate,
    ) -> Result<Injection> {
        let fragment = injected_fragment(&block.fingerprint, author_name, &block.body);
        let now = Utc::now();

        match self.db.find_entry_for_date(recipient, date)? {
            Some(existing) => {
                let content = match EncryptedFieldCodec::open(ctx, &existing.content) {
                    FieldValue::Plain(content) => content,
                    FieldValue::Opaque(_) => return Ok(Injection::Deferred),
                };
                if content.contains(&marker(&block.fingerprint)) {
                    debug!(block = %block.id, recipient = %recipient, "Marker present, skipping injection");
                    return Ok(Injection::AlreadyPresent);
                }
                let Some(sealed) = seal_or_defer(ctx, &append_fragment(&content, &fragment))? else {
                    return Ok(Injection::Deferred);
                };
                self.db
                    .update_entry_fields(existing.id, &existing.title, &sealed, now)?;
            }
            None => {
                let Some(sealed) = seal_or_defer(ctx, &fragment)? else {
                    return Ok(Injection::Deferred);
                };
                self.db.insert_entry(&JournalEntry {
                    id: EntryId::new(),
                    user_id: recipient,
                    entry_date: date,
                    title: String::new(),
                    content: sealed,
                    created_at: now,
                    updated_at: now,
                })?;
            }
        }

        debug!(block = %block.id, recipient = %recipient, %date, "Injected shared block");
        Ok(Injection::Written)
    }

    /// Write every copy still owed to `recipient` using their own context.
    /// Run after login, once their key is available.
    pub fn deliver_pending(&self, recipient: UserId, ctx: &CryptoContext) -> Result<usize> {
        self.db.immediate_transaction(|db| -> Result<usize> {
            let mut delivered = 0;

            for ReceivedBlock { block, .. } in db.list_pending_injections(recipient)? {
                let author = db
                    .get_user(block.author_id)
                    .map_err(missing(format!("user {}", block.author_id)))?;
                let source = db
                    .get_entry(block.entry_id)
                    .map_err(missing(format!("entry {}", block.entry_id)))?;

                match self.inject(ctx, &block, &author.username, recipient, source.entry_date)? {
                    Injection::Written | Injection::AlreadyPresent => {
                        db.mark_recipient_injected(block.id, recipient, Utc::now())?;
                        delivered += 1;
                    }
                    Injection::Deferred => {
                        debug!(block = %block.id, recipient = %recipient, "Still unable to inject");
                    }
                }
            }

            if delivered > 0 {
                info!(recipient = %recipient, delivered, "Delivered pending shared blocks");
            }
            Ok(delivered)
        })
    }

    /// Mark `block` read for `user`. Returns whether anything changed.
    pub fn mark_read(&self, block: BlockId, user: UserId) -> Result<bool> {
        let changed = self.db.mark_recipient_read(block, user, Utc::now())?;
        if changed {
            debug!(block = %block, user = %user, "Marked shared block read");
        }
        Ok(changed)
    }

    /// Remove `user`'s copy of `block` from their journal and stop sharing
    /// it with them. The author's copy and other recipients are unaffected.
    pub fn delete_for_recipient(
        &self,
        ctx: &CryptoContext,
        block_id: BlockId,
        user: UserId,
    ) -> Result<bool> {
        self.db.immediate_transaction(|db| -> Result<bool> {
            let Some(row) = db.get_block_recipient(block_id, user)? else {
                return Ok(false);
            };

            if row.injected_at.is_some() {
                let block = db
                    .get_shared_block(block_id)
                    .map_err(missing(format!("block {block_id}")))?;
                let author = db
                    .get_user(block.author_id)
                    .map_err(missing(format!("user {}", block.author_id)))?;
                let source = db
                    .get_entry(block.entry_id)
                    .map_err(missing(format!("entry {}", block.entry_id)))?;

                if let Some(entry) = db.find_entry_for_date(user, source.entry_date)? {
                    let content = match EncryptedFieldCodec::open(ctx, &entry.content) {
                        FieldValue::Plain(content) => content,
                        FieldValue::Opaque(_) => return Err(JournalError::EncryptionKeyUnavailable),
                    };
                    if let Some(stripped) =
                        remove_fragment(&content, &block.fingerprint, &author.username, &block.body)
                    {
                        let sealed = EncryptedFieldCodec::seal(ctx, &stripped)?;
                        db.update_entry_fields(entry.id, &entry.title, &sealed, Utc::now())?;
                    }
                }
            }

            let removed = db.delete_block_recipient(block_id, user)?;
            info!(block = %block_id, user = %user, "Recipient removed shared block");
            Ok(removed)
        })
    }

    /// Post a reply on `block_id`. Only the block's author and recipients
    /// may reply; everyone else in the conversation is notified.
    pub fn create_reply(&self, block_id: BlockId, author: UserId, body: &str) -> Result<ReplyOutcome> {
        self.db.immediate_transaction(|db| -> Result<ReplyOutcome> {
            let block = db
                .get_shared_block(block_id)
                .map_err(missing(format!("block {block_id}")))?;
            let recipients = db.list_block_recipients(block_id)?;

            let participant =
                block.author_id == author || recipients.iter().any(|r| r.user_id == author);
            if !participant {
                return Err(JournalError::PermissionDenied(format!(
                    "user {author} cannot reply to block {block_id}"
                )));
            }

            let body = body.trim();
            if body.is_empty() {
                return Err(JournalError::InvalidInput("reply is empty".into()));
            }
            if body.chars().count() > MAX_REPLY_LENGTH {
                return Err(JournalError::InvalidInput(format!(
                    "reply exceeds {MAX_REPLY_LENGTH} characters"
                )));
            }

            let now = Utc::now();
            let reply = BlockReply {
                id: ReplyId::new(),
                block_id,
                author_id: author,
                body: body.to_string(),
                created_at: now,
                updated_at: now,
            };
            db.insert_reply(&reply)?;

            let notifications = std::iter::once(block.author_id)
                .chain(recipients.iter().map(|r| r.user_id))
                .filter(|participant| *participant != author)
                .map(|recipient| Notification::ReplyPosted {
                    reply_id: reply.id,
                    recipient,
                })
                .collect();

            debug!(block = %block_id, reply = %reply.id, "Reply posted");
            Ok(ReplyOutcome {
                reply,
                notifications,
            })
        })
    }

    /// Replies on a block, for its author or a recipient.
    pub fn replies(&self, block_id: BlockId, viewer: UserId) -> Result<Vec<BlockReply>> {
        if !self.can_view(block_id, viewer)? {
            return Err(JournalError::PermissionDenied(format!(
                "user {viewer} cannot view block {block_id}"
            )));
        }
        Ok(self.db.list_replies(block_id)?)
    }

    /// Blocks shared with `user`, newest first.
    pub fn shared_with(&self, user: UserId, unread_only: bool) -> Result<Vec<ReceivedBlock>> {
        Ok(self.db.list_received_blocks(user, unread_only)?)
    }

    pub fn unread_count(&self, user: UserId) -> Result<usize> {
        Ok(self.db.count_unread_blocks(user)?)
    }

    /// Whether `user` authored or received `block_id`.
    pub fn can_view(&self, block_id: BlockId, user: UserId) -> Result<bool> {
        let block = match self.db.get_shared_block(block_id) {
            Ok(block) => block,
            Err(reverie_store::StoreError::NotFound) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if block.author_id == user {
            return Ok(true);
        }
        Ok(self.db.get_block_recipient(block_id, user)?.is_some())
    }
}

// ---------------------------------------------------------------------------
// Injected text
// ---------------------------------------------------------------------------

fn marker(fingerprint: &str) -> String {
    format!("<!-- pov:{fingerprint} -->")
}

/// The text written into a recipient's entry.
pub fn injected_fragment(fingerprint: &str, author_name: &str, body: &str) -> String {
    format!("{}\n```pov @{author_name}\n{body}\n```", marker(fingerprint))
}

fn append_fragment(content: &str, fragment: &str) -> String {
    let existing = content.trim_end();
    if existing.is_empty() {
        fragment.to_string()
    } else {
        format!("{existing}\n\n{fragment}")
    }
}

fn seal_or_defer(ctx: &CryptoContext, plaintext: &str) -> Result<Option<String>> {
    match EncryptedFieldCodec::seal(ctx, plaintext) {
        Ok(sealed) => Ok(Some(sealed)),
        Err(JournalError::EncryptionKeyUnavailable) => Ok(None),
        Err(e) => Err(e),
    }
}

/// `content` without the injected copy of a block. Matches the exact copy
/// first, then any copy carrying the block's marker under the same author
/// (the author may have edited the block since). `None` when absent.
fn remove_fragment(content: &str, fingerprint: &str, author_name: &str, body: &str) -> Option<String> {
    let exact = injected_fragment(fingerprint, author_name, body);
    let without = if content.contains(&exact) {
        content.replacen(&exact, "", 1)
    } else {
        let pattern = Regex::new(&format!(
            r"(?s){}\s*```pov @{}[^\n]*\n.*?```",
            regex::escape(&marker(fingerprint)),
            regex::escape(author_name)
        ))
        .ok()?;
        let found = pattern.find(content)?;
        format!("{}{}", &content[..found.start()], &content[found.end()..])
    };

    Some(
        EXCESS_BLANK_LINES
            .replace_all(&without, "\n\n")
            .trim()
            .to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_format() {
        assert_eq!(
            injected_fragment("abc", "bob", "Had a great day!"),
            "<!-- pov:abc -->\n```pov @bob\nHad a great day!\n```"
        );
    }

    #[test]
    fn test_append_separates_with_blank_line() {
        assert_eq!(append_fragment("", "F"), "F");
        assert_eq!(append_fragment("mine\n\n", "F"), "mine\n\nF");
    }

    #[test]
    fn test_remove_exact_fragment() {
        let content = format!(
            "before\n\n{}\n\nafter",
            injected_fragment("abc", "bob", "hello")
        );
        assert_eq!(
            remove_fragment(&content, "abc", "bob", "hello").as_deref(),
            Some("before\n\nafter")
        );
    }

    #[test]
    fn test_remove_edited_fragment_by_marker() {
        let content = format!("mine\n\n{}", injected_fragment("abc", "bob", "old body"));
        assert_eq!(
            remove_fragment(&content, "abc", "bob", "new body").as_deref(),
            Some("mine")
        );
    }

    #[test]
    fn test_remove_leaves_other_copies() {
        let content = format!(
            "{}\n\n{}",
            injected_fragment("abc", "bob", "one"),
            injected_fragment("def", "carol", "two")
        );
        let left = remove_fragment(&content, "abc", "bob", "one").unwrap();
        assert_eq!(left, injected_fragment("def", "carol", "two"));
        assert!(remove_fragment(&left, "abc", "bob", "one").is_none());
    }
}
