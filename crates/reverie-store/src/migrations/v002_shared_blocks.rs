use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS shared_blocks (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    entry_id       TEXT NOT NULL,              -- FK -> entries(id)
    author_id      TEXT NOT NULL,              -- FK -> users(id)
    body           TEXT NOT NULL,              -- plaintext, intentionally shared
    fingerprint    TEXT NOT NULL,
    position_index INTEGER NOT NULL DEFAULT 0,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,

    FOREIGN KEY (entry_id)  REFERENCES entries(id) ON DELETE CASCADE,
    FOREIGN KEY (author_id) REFERENCES users(id)   ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_shared_blocks_entry_fp
    ON shared_blocks(entry_id, fingerprint);
CREATE INDEX IF NOT EXISTS idx_shared_blocks_author
    ON shared_blocks(author_id, created_at);

CREATE TABLE IF NOT EXISTS shared_block_recipients (
    block_id             TEXT NOT NULL,        -- FK -> shared_blocks(id)
    user_id              TEXT NOT NULL,        -- FK -> users(id)
    is_read              INTEGER NOT NULL DEFAULT 0,
    read_at              TEXT,
    notification_sent    INTEGER NOT NULL DEFAULT 0,
    notification_sent_at TEXT,
    injected_at          TEXT,                 -- NULL while injection is pending
    created_at           TEXT NOT NULL,

    PRIMARY KEY (block_id, user_id),
    FOREIGN KEY (block_id) REFERENCES shared_blocks(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id)  REFERENCES users(id)         ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_block_recipients_user
    ON shared_block_recipients(user_id, is_read, created_at);

CREATE TABLE IF NOT EXISTS block_replies (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    block_id   TEXT NOT NULL,                  -- FK -> shared_blocks(id)
    author_id  TEXT NOT NULL,                  -- FK -> users(id)
    body       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (block_id)  REFERENCES shared_blocks(id) ON DELETE CASCADE,
    FOREIGN KEY (author_id) REFERENCES users(id)         ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_block_replies_block
    ON block_replies(block_id, created_at);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
