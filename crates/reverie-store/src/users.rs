//! CRUD operations for [`User`] records.

use reverie_shared::types::UserId;
use rusqlite::{params, OptionalExtension};

use crate::convert::{timestamp_col, uuid_col};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::User;

impl Database {
    /// Insert a new user.
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, email, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Look a user up by username, ignoring case.
    pub fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, email, created_at
                 FROM users
                 WHERE username = ?1 COLLATE NOCASE",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let username: String = row.get(1)?;
    let email: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(User {
        id: UserId(uuid_col(0, &id_str)?),
        username,
        email,
        created_at: timestamp_col(3, &created_str)?,
    })
}
