use reverie_shared::types::{BlockId, ReplyId, UserId};
use rusqlite::params;

use crate::convert::{timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::BlockReply;

impl Database {
    pub fn insert_reply(&self, reply: &BlockReply) -> Result<()> {
        self.conn().execute(
            "INSERT INTO block_replies (id, block_id, author_id, body, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                reply.id.to_string(),
                reply.block_id.to_string(),
                reply.author_id.to_string(),
                reply.body,
                reply.created_at.to_rfc3339(),
                reply.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_reply(&self, id: ReplyId) -> Result<BlockReply> {
        self.conn()
            .query_row(
                "SELECT id, block_id, author_id, body, created_at, updated_at
                 FROM block_replies WHERE id = ?1",
                params![id.to_string()],
                row_to_reply,
            )
            .map_err(not_found)
    }

    /// Replies on a block, oldest first.
    pub fn list_replies(&self, block_id: BlockId) -> Result<Vec<BlockReply>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, block_id, author_id, body, created_at, updated_at
             FROM block_replies
             WHERE block_id = ?1
             ORDER BY created_at ASC",
        )?;

        let rows = stmt.query_map(params![block_id.to_string()], row_to_reply)?;

        let mut replies = Vec::new();
        for row in rows {
            replies.push(row?);
        }
        Ok(replies)
    }
}

fn row_to_reply(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockReply> {
    let id_str: String = row.get(0)?;
    let block_str: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let body: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    let updated_str: String = row.get(5)?;

    Ok(BlockReply {
        id: ReplyId(uuid_col(0, &id_str)?),
        block_id: BlockId(uuid_col(1, &block_str)?),
        author_id: UserId(uuid_col(2, &author_str)?),
        body,
        created_at: timestamp_col(4, &created_str)?,
        updated_at: timestamp_col(5, &updated_str)?,
    })
}
