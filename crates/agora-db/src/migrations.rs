use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS threads (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS thread_participants (
            thread_id   TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (thread_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            thread_id   TEXT NOT NULL REFERENCES threads(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, created_at);

        CREATE TABLE IF NOT EXISTS read_receipts (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS reactions (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (message_id, user_id, emoji)
        );

        CREATE TABLE IF NOT EXISTS public_keys (
            user_id     TEXT PRIMARY KEY,
            public_key  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
