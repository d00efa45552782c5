//! CRUD operations for [`JournalEntry`] records.
//!
//! Title and content are opaque ciphertext at this layer.

use chrono::{DateTime, NaiveDate, Utc};
use reverie_shared::types::{EntryId, UserId};
use rusqlite::{params, OptionalExtension};

use crate::convert::{date_col, date_param, timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::JournalEntry;

const ENTRY_COLUMNS: &str = "id, user_id, entry_date, title, content, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    pub fn insert_entry(&self, entry: &JournalEntry) -> Result<()> {
        self.conn().execute(
            "INSERT INTO entries (id, user_id, entry_date, title, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.user_id.to_string(),
                date_param(entry.entry_date),
                entry.title,
                entry.content,
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_entry(&self, id: EntryId) -> Result<JournalEntry> {
        self.conn()
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
                params![id.to_string()],
                row_to_entry,
            )
            .map_err(not_found)
    }

    /// The user's entry for `date`.  When several exist the oldest wins.
    pub fn find_entry_for_date(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<JournalEntry>> {
        let entry = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM entries
                     WHERE user_id = ?1 AND entry_date = ?2
                     ORDER BY created_at ASC
                     LIMIT 1"
                ),
                params![user_id.to_string(), date_param(date)],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// All entries owned by `user_id`, newest date first.
    pub fn list_entries_for_user(&self, user_id: UserId) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1
             ORDER BY entry_date DESC, created_at DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Overwrite the stored (encrypted) title and content of an entry.
    pub fn update_entry_fields(
        &self,
        id: EntryId,
        title: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE entries SET title = ?1, content = ?2, updated_at = ?3 WHERE id = ?4",
            params![title, content, updated_at.to_rfc3339(), id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an entry and its shared blocks.  Returns `true` if a row was
    /// deleted.
    pub fn delete_entry(&self, id: EntryId) -> Result<bool> {
        for block in self.list_blocks_for_entry(id)? {
            self.delete_shared_block(block.id)?;
        }
        let affected = self
            .conn()
            .execute("DELETE FROM entries WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalEntry> {
    let id_str: String = row.get(0)?;
    let user_str: String = row.get(1)?;
    let date_str: String = row.get(2)?;
    let title: String = row.get(3)?;
    let content: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(JournalEntry {
        id: EntryId(uuid_col(0, &id_str)?),
        user_id: UserId(uuid_col(1, &user_str)?),
        entry_date: date_col(2, &date_str)?,
        title,
        content,
        created_at: timestamp_col(5, &created_str)?,
        updated_at: timestamp_col(6, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use reverie_shared::types::{EntryId, UserId};

    use crate::models::{JournalEntry, User};
    use crate::Database;

    fn setup() -> (tempfile::TempDir, Database, UserId) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("e.db")).unwrap();
        let user = User {
            id: UserId::new(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            created_at: Utc::now(),
        };
        db.create_user(&user).unwrap();
        (dir, db, user.id)
    }

    fn entry(owner: UserId, date: NaiveDate, offset_secs: i64) -> JournalEntry {
        let at = Utc::now() + Duration::seconds(offset_secs);
        JournalEntry {
            id: EntryId::new(),
            user_id: owner,
            entry_date: date,
            title: "t".into(),
            content: "c".into(),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn oldest_entry_for_date_wins() {
        let (_dir, db, alice) = setup();
        let day = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let later = entry(alice, day, 10);
        let earlier = entry(alice, day, 0);
        db.insert_entry(&later).unwrap();
        db.insert_entry(&earlier).unwrap();

        let found = db.find_entry_for_date(alice, day).unwrap().unwrap();
        assert_eq!(found.id, earlier.id);
        assert!(db
            .find_entry_for_date(alice, day.succ_opt().unwrap())
            .unwrap()
            .is_none());
    }

    #[test]
    fn update_and_delete() {
        let (_dir, db, alice) = setup();
        let day = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let e = entry(alice, day, 0);
        db.insert_entry(&e).unwrap();

        assert!(db.update_entry_fields(e.id, "T2", "C2", Utc::now()).unwrap());
        let stored = db.get_entry(e.id).unwrap();
        assert_eq!((stored.title.as_str(), stored.content.as_str()), ("T2", "C2"));
        assert_eq!(stored.entry_date, day);

        assert_eq!(db.list_entries_for_user(alice).unwrap().len(), 1);
        assert!(db.delete_entry(e.id).unwrap());
        assert!(db.list_entries_for_user(alice).unwrap().is_empty());
    }
}
