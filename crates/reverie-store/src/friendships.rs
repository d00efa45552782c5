//! Friendship pairs.  Rows are stored once per pair with the lower id first,
//! so lookups order the pair before querying.

use chrono::Utc;
use reverie_shared::types::UserId;
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::Friendship;

fn canonical(a: UserId, b: UserId) -> (UserId, UserId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Database {
    /// Record a friendship between `a` and `b`.  Existing pairs are left
    /// untouched.
    pub fn create_friendship(&self, a: UserId, b: UserId) -> Result<Friendship> {
        let (user_low, user_high) = canonical(a, b);
        let now = Utc::now();

        self.conn().execute(
            "INSERT OR IGNORE INTO friendships (user_low, user_high, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_low.to_string(), user_high.to_string(), now.to_rfc3339()],
        )?;

        Ok(Friendship {
            user_low,
            user_high,
            created_at: now,
        })
    }

    /// Whether `a` and `b` are friends, regardless of argument order.
    pub fn are_friends(&self, a: UserId, b: UserId) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        let (user_low, user_high) = canonical(a, b);
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM friendships WHERE user_low = ?1 AND user_high = ?2)",
            params![user_low.to_string(), user_high.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Remove a friendship.  Returns `true` if a row was deleted.
    pub fn delete_friendship(&self, a: UserId, b: UserId) -> Result<bool> {
        let (user_low, user_high) = canonical(a, b);
        let affected = self.conn().execute(
            "DELETE FROM friendships WHERE user_low = ?1 AND user_high = ?2",
            params![user_low.to_string(), user_high.to_string()],
        )?;
        Ok(affected > 0)
    }
}
