use crate::Database;
use crate::models::{MessageRow, PublicKeyRow};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Threads --

    /// Create a thread with exactly these participants. Returns false and
    /// leaves everything untouched if the thread already exists.
    pub fn create_thread(&self, id: &str, participant_ids: &[&str]) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if tx.execute("INSERT OR IGNORE INTO threads (id) VALUES (?1)", [id])? == 0 {
                return Ok(false);
            }
            for user_id in participant_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO thread_participants (thread_id, user_id) VALUES (?1, ?2)",
                    [id, *user_id],
                )?;
            }
            tx.commit()?;
            Ok(true)
        })
    }

    /// Participants of a thread, empty if the thread does not exist.
    pub fn thread_participants(&self, thread_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM thread_participants WHERE thread_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map([thread_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        thread_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, thread_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, thread_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// Newest `limit` messages of a thread, returned oldest first.
    pub fn get_messages(&self, thread_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut rows = query_messages(conn, thread_id, limit)?;
            rows.reverse();
            Ok(rows)
        })
    }

    /// Sender of a live (not soft-deleted) message in the given thread.
    pub fn message_sender(&self, thread_id: &str, message_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let sender = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1 AND thread_id = ?2 AND deleted_at IS NULL",
                    [message_id, thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(sender)
        })
    }

    /// Sender of any message in the thread, tombstones included.
    pub fn message_author(&self, thread_id: &str, message_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let sender = conn
                .query_row(
                    "SELECT sender_id FROM messages WHERE id = ?1 AND thread_id = ?2",
                    [message_id, thread_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(sender)
        })
    }

    /// Blank the content and keep a tombstone. Returns false if nothing matched.
    pub fn soft_delete_message(&self, message_id: &str, deleted_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET content = '', deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                [message_id, deleted_at],
            )?;
            Ok(changed == 1)
        })
    }

    /// Remove the message row; receipts and reactions cascade.
    pub fn hard_delete_message(&self, message_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(changed == 1)
        })
    }

    // -- Read receipts --

    /// Record that `user_id` read the message. The first read time is kept.
    pub fn mark_read(&self, message_id: &str, user_id: &str, read_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO read_receipts (message_id, user_id, read_at) VALUES (?1, ?2, ?3)",
                [message_id, user_id, read_at],
            )?;
            Ok(())
        })
    }

    // -- Reactions --

    /// Add a reaction. Returns true if it was not already present.
    pub fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                [message_id, user_id, emoji],
            )?;
            Ok(changed == 1)
        })
    }

    /// Remove a reaction. Returns true if one was removed.
    pub fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                [message_id, user_id, emoji],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Public keys --

    pub fn upsert_public_key(&self, user_id: &str, public_key: &str, updated_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO public_keys (user_id, public_key, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET public_key = excluded.public_key, updated_at = excluded.updated_at",
                [user_id, public_key, updated_at],
            )?;
            Ok(())
        })
    }

    pub fn get_public_key(&self, user_id: &str) -> Result<Option<PublicKeyRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, public_key, updated_at FROM public_keys WHERE user_id = ?1",
                    [user_id],
                    |row| {
                        Ok(PublicKeyRow {
                            user_id: row.get(0)?,
                            public_key: row.get(1)?,
                            updated_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_messages(conn: &Connection, thread_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, thread_id, sender_id, content, created_at, deleted_at
         FROM messages
         WHERE thread_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![thread_id, limit], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                thread_id: row.get(1)?,
                sender_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
                deleted_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}
