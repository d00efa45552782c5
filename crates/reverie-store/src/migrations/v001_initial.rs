//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `friendships`,
//! `encryption_profiles`, and `entries`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    username   TEXT NOT NULL,
    email      TEXT NOT NULL,
    created_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username
    ON users(username COLLATE NOCASE);

-- ----------------------------------------------------------------
-- Friendships (one row per pair, lower id first)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS friendships (
    user_low   TEXT NOT NULL,                 -- FK -> users(id)
    user_high  TEXT NOT NULL,                 -- FK -> users(id)
    created_at TEXT NOT NULL,

    PRIMARY KEY (user_low, user_high),
    CHECK (user_low < user_high),
    FOREIGN KEY (user_low)  REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (user_high) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_friendships_high ON friendships(user_high);

-- ----------------------------------------------------------------
-- Encryption profiles (key material is never stored)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS encryption_profiles (
    user_id           TEXT PRIMARY KEY NOT NULL,  -- FK -> users(id)
    salt              BLOB,                       -- 32 random bytes
    iterations        INTEGER NOT NULL,
    version           INTEGER NOT NULL DEFAULT 0, -- 0 legacy, 1 per-user
    recovery_key_hash TEXT,                       -- SHA-256 hex
    updated_at        TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Journal entries (title/content are ciphertext)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS entries (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    entry_date TEXT NOT NULL,                 -- YYYY-MM-DD
    title      TEXT NOT NULL DEFAULT '',
    content    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_user_date
    ON entries(user_id, entry_date);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
