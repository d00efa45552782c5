//! Shared (POV) blocks and their recipient rows.
//!
//! Dependent rows are removed explicitly by [`Database::delete_shared_block`]
//! rather than relying on `ON DELETE CASCADE`, so callers see the whole
//! cascade happen inside their own transaction.

use chrono::{DateTime, Utc};
use reverie_shared::types::{BlockId, EntryId, UserId};
use rusqlite::{params, OptionalExtension};

use crate::convert::{opt_timestamp_col, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{ReceivedBlock, SharedBlock, SharedBlockRecipient};

const BLOCK_COLUMNS: &str =
    "b.id, b.entry_id, b.author_id, b.body, b.fingerprint, b.position_index, b.created_at, b.updated_at";

const RECIPIENT_COLUMNS: &str = "r.block_id, r.user_id, r.is_read, r.read_at, r.notification_sent, \
     r.notification_sent_at, r.injected_at, r.created_at";

impl Database {
    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    pub fn insert_shared_block(&self, block: &SharedBlock) -> Result<()> {
        self.conn().execute(
            "INSERT INTO shared_blocks
                 (id, entry_id, author_id, body, fingerprint, position_index, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                block.id.to_string(),
                block.entry_id.to_string(),
                block.author_id.to_string(),
                block.body,
                block.fingerprint,
                block.position_index,
                block.created_at.to_rfc3339(),
                block.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_shared_block(&self, id: BlockId) -> Result<SharedBlock> {
        self.conn()
            .query_row(
                &format!("SELECT {BLOCK_COLUMNS} FROM shared_blocks b WHERE b.id = ?1"),
                params![id.to_string()],
                |row| row_to_block(row, 0),
            )
            .map_err(not_found)
    }

    /// Blocks tracked for an entry, in document order.
    pub fn list_blocks_for_entry(&self, entry_id: EntryId) -> Result<Vec<SharedBlock>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {BLOCK_COLUMNS} FROM shared_blocks b
             WHERE b.entry_id = ?1
             ORDER BY b.position_index ASC"
        ))?;

        let rows = stmt.query_map(params![entry_id.to_string()], |row| row_to_block(row, 0))?;

        let mut blocks = Vec::new();
        for row in rows {
            blocks.push(row?);
        }
        Ok(blocks)
    }

    /// Replace a block's body and position, keeping its fingerprint.
    pub fn update_shared_block(
        &self,
        id: BlockId,
        body: &str,
        position_index: u32,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE shared_blocks SET body = ?1, position_index = ?2, updated_at = ?3 WHERE id = ?4",
            params![body, position_index, updated_at.to_rfc3339(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a block together with its replies and recipient rows.
    pub fn delete_shared_block(&self, id: BlockId) -> Result<bool> {
        let id_str = id.to_string();
        self.conn()
            .execute("DELETE FROM block_replies WHERE block_id = ?1", params![id_str])?;
        self.conn().execute(
            "DELETE FROM shared_block_recipients WHERE block_id = ?1",
            params![id_str],
        )?;
        let affected = self
            .conn()
            .execute("DELETE FROM shared_blocks WHERE id = ?1", params![id_str])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Recipients
    // ------------------------------------------------------------------

    pub fn insert_block_recipient(&self, recipient: &SharedBlockRecipient) -> Result<()> {
        self.conn().execute(
            "INSERT INTO shared_block_recipients
                 (block_id, user_id, is_read, read_at, notification_sent,
                  notification_sent_at, injected_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                recipient.block_id.to_string(),
                recipient.user_id.to_string(),
                recipient.is_read,
                recipient.read_at.map(|t| t.to_rfc3339()),
                recipient.notification_sent,
                recipient.notification_sent_at.map(|t| t.to_rfc3339()),
                recipient.injected_at.map(|t| t.to_rfc3339()),
                recipient.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_block_recipient(
        &self,
        block_id: BlockId,
        user_id: UserId,
    ) -> Result<Option<SharedBlockRecipient>> {
        let recipient = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM shared_block_recipients r
                     WHERE r.block_id = ?1 AND r.user_id = ?2"
                ),
                params![block_id.to_string(), user_id.to_string()],
                |row| row_to_recipient(row, 0),
            )
            .optional()?;
        Ok(recipient)
    }

    pub fn list_block_recipients(&self, block_id: BlockId) -> Result<Vec<SharedBlockRecipient>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM shared_block_recipients r
             WHERE r.block_id = ?1
             ORDER BY r.created_at ASC"
        ))?;

        let rows = stmt.query_map(params![block_id.to_string()], |row| {
            row_to_recipient(row, 0)
        })?;

        let mut recipients = Vec::new();
        for row in rows {
            recipients.push(row?);
        }
        Ok(recipients)
    }

    /// Set the read flag.  Returns `false` when the row was already read or
    /// does not exist.
    pub fn mark_recipient_read(
        &self,
        block_id: BlockId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE shared_block_recipients SET is_read = 1, read_at = ?1
             WHERE block_id = ?2 AND user_id = ?3 AND is_read = 0",
            params![at.to_rfc3339(), block_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_recipient_injected(
        &self,
        block_id: BlockId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE shared_block_recipients SET injected_at = ?1
             WHERE block_id = ?2 AND user_id = ?3 AND injected_at IS NULL",
            params![at.to_rfc3339(), block_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Flag every not-yet-notified recipient of a block as notified.
    /// Returns the number of rows changed.
    pub fn mark_block_notified(&self, block_id: BlockId, at: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE shared_block_recipients SET notification_sent = 1, notification_sent_at = ?1
             WHERE block_id = ?2 AND notification_sent = 0",
            params![at.to_rfc3339(), block_id.to_string()],
        )?;
        Ok(affected)
    }

    pub fn delete_block_recipient(&self, block_id: BlockId, user_id: UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM shared_block_recipients WHERE block_id = ?1 AND user_id = ?2",
            params![block_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Recipient views
    // ------------------------------------------------------------------

    /// Blocks shared with `user_id`, newest first.
    pub fn list_received_blocks(
        &self,
        user_id: UserId,
        unread_only: bool,
    ) -> Result<Vec<ReceivedBlock>> {
        self.query_received(
            &format!(
                "SELECT {BLOCK_COLUMNS}, {RECIPIENT_COLUMNS}
                 FROM shared_block_recipients r
                 JOIN shared_blocks b ON b.id = r.block_id
                 WHERE r.user_id = ?1 AND (?2 = 0 OR r.is_read = 0)
                 ORDER BY b.created_at DESC"
            ),
            params![user_id.to_string(), unread_only],
        )
    }

    /// Blocks shared with `user_id` whose body has not reached their journal
    /// yet, oldest first.
    pub fn list_pending_injections(&self, user_id: UserId) -> Result<Vec<ReceivedBlock>> {
        self.query_received(
            &format!(
                "SELECT {BLOCK_COLUMNS}, {RECIPIENT_COLUMNS}
                 FROM shared_block_recipients r
                 JOIN shared_blocks b ON b.id = r.block_id
                 WHERE r.user_id = ?1 AND r.injected_at IS NULL
                 ORDER BY b.created_at ASC"
            ),
            params![user_id.to_string()],
        )
    }

    pub fn count_unread_blocks(&self, user_id: UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM shared_block_recipients WHERE user_id = ?1 AND is_read = 0",
            params![user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn query_received(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<ReceivedBlock>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(ReceivedBlock {
                block: row_to_block(row, 0)?,
                recipient: row_to_recipient(row, 8)?,
            })
        })?;

        let mut received = Vec::new();
        for row in rows {
            received.push(row?);
        }
        Ok(received)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map `BLOCK_COLUMNS` starting at column `base`.
fn row_to_block(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<SharedBlock> {
    let id_str: String = row.get(base)?;
    let entry_str: String = row.get(base + 1)?;
    let author_str: String = row.get(base + 2)?;
    let body: String = row.get(base + 3)?;
    let fingerprint: String = row.get(base + 4)?;
    let position_index: u32 = row.get(base + 5)?;
    let created_str: String = row.get(base + 6)?;
    let updated_str: String = row.get(base + 7)?;

    Ok(SharedBlock {
        id: BlockId(uuid_col(base, &id_str)?),
        entry_id: EntryId(uuid_col(base + 1, &entry_str)?),
        author_id: UserId(uuid_col(base + 2, &author_str)?),
        body,
        fingerprint,
        position_index,
        created_at: timestamp_col(base + 6, &created_str)?,
        updated_at: timestamp_col(base + 7, &updated_str)?,
    })
}

/// Map `RECIPIENT_COLUMNS` starting at column `base`.
fn row_to_recipient(
    row: &rusqlite::Row<'_>,
    base: usize,
) -> rusqlite::Result<SharedBlockRecipient> {
    let block_str: String = row.get(base)?;
    let user_str: String = row.get(base + 1)?;
    let is_read: bool = row.get(base + 2)?;
    let read_at: Option<String> = row.get(base + 3)?;
    let notification_sent: bool = row.get(base + 4)?;
    let notification_sent_at: Option<String> = row.get(base + 5)?;
    let injected_at: Option<String> = row.get(base + 6)?;
    let created_str: String = row.get(base + 7)?;

    Ok(SharedBlockRecipient {
        block_id: BlockId(uuid_col(base, &block_str)?),
        user_id: UserId(uuid_col(base + 1, &user_str)?),
        is_read,
        read_at: opt_timestamp_col(base + 3, read_at)?,
        notification_sent,
        notification_sent_at: opt_timestamp_col(base + 5, notification_sent_at)?,
        injected_at: opt_timestamp_col(base + 6, injected_at)?,
        created_at: timestamp_col(base + 7, &created_str)?,
    })
}
