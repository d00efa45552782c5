//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.
//!
//! Journal fields are encrypted at the application layer before they reach
//! this crate, so plain SQLite is sufficient here.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/reverie/reverie.db`
    /// - macOS:   `~/Library/Application Support/com.reverie.reverie/reverie.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\reverie\reverie\data\reverie.db`
    pub fn new() -> Result<Self> {
        let db_path = Self::default_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Platform default location of the database file.
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "reverie", "reverie").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("reverie.db"))
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken up front, so two writers touching the same
    /// rows serialize instead of losing an update. The transaction commits
    /// when `f` returns `Ok` and rolls back on `Err` or panic. When a
    /// transaction is already open on this connection, `f` joins it.
    pub fn immediate_transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Database) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }

        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(StoreError::from)?;
        let guard = RollbackGuard {
            conn: &self.conn,
            armed: true,
        };

        let value = f(self)?;
        guard.commit()?;
        Ok(value)
    }
}

/// Rolls back the open transaction unless [`RollbackGuard::commit`] ran.
struct RollbackGuard<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl RollbackGuard<'_> {
    fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %e, "rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("tx.db")).unwrap();

        let result: std::result::Result<(), StoreError> = db.immediate_transaction(|db| {
            db.conn().execute(
                "INSERT INTO users (id, username, email, created_at) VALUES ('x', 'x', 'x', 'x')",
                [],
            )?;
            Err(StoreError::NotFound)
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
        assert!(db.conn().is_autocommit());
    }

    #[test]
    fn nested_transaction_joins_outer() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("nested.db")).unwrap();

        let result: std::result::Result<(), StoreError> = db.immediate_transaction(|db| {
            db.immediate_transaction(|db| {
                db.conn().execute(
                    "INSERT INTO users (id, username, email, created_at) VALUES ('y', 'y', 'y', 'y')",
                    [],
                )?;
                Ok::<(), StoreError>(())
            })?;
            Err(StoreError::NotFound)
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
