use crate::Database;
use crate::models::{ConversationRow, MessageRow};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

const CONVERSATION_COLUMNS: &str =
    "c.id, c.participant_lo, c.participant_hi, c.last_message_id, c.created_at";

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.receiver_id, m.body, \
     m.attachment_url, m.kind, m.status, m.created_at";

impl Database {
    // -- Conversations --

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_id(conn, id))
    }

    pub fn find_conversation_by_pair(&self, lo: &str, hi: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| query_conversation_by_pair(conn, lo, hi))
    }

    /// Insert a conversation for a canonical pair, or return the row that
    /// already holds that pair. A UNIQUE violation on the pair means another
    /// writer won the race; its row is read back and returned.
    pub fn insert_conversation_or_fetch(
        &self,
        id: &str,
        lo: &str,
        hi: &str,
        created_at: &str,
    ) -> Result<ConversationRow> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO conversations (id, participant_lo, participant_hi, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                (id, lo, hi, created_at),
            );

            match inserted {
                Ok(_) => debug!("Created conversation {} for {}:{}", id, lo, hi),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    debug!("Conversation for {}:{} already exists, fetching it", lo, hi);
                }
                Err(e) => return Err(e.into()),
            }

            query_conversation_by_pair(conn, lo, hi)?
                .ok_or_else(|| anyhow!("Conversation {}:{} missing after insert", lo, hi))
        })
    }

    /// All conversations `participant` belongs to, most recent activity first.
    pub fn get_conversations_for(&self, participant: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS}
                 FROM conversations c
                 LEFT JOIN messages m ON m.id = c.last_message_id
                 WHERE c.participant_lo = ?1 OR c.participant_hi = ?1
                 ORDER BY COALESCE(m.created_at, c.created_at) DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([participant], map_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Persist a message and point its conversation at it, in one IMMEDIATE
    /// transaction. `last_message_id` only moves forward in time: a message
    /// older than the one currently referenced leaves the pointer alone.
    pub fn append_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            tx.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, receiver_id, body, attachment_url, kind, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    row.id,
                    row.conversation_id,
                    row.sender_id,
                    row.receiver_id,
                    row.body,
                    row.attachment_url,
                    row.kind,
                    row.status,
                    row.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET last_message_id = ?1
                 WHERE id = ?2
                   AND (last_message_id IS NULL
                        OR (SELECT created_at FROM messages
                            WHERE id = conversations.last_message_id) <= ?3)",
                (&row.id, &row.conversation_id, &row.created_at),
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
            let row = conn.query_row(&sql, [id], map_message).optional()?;
            Ok(row)
        })
    }

    /// Messages of a conversation, oldest first. Insertion order breaks ties.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 WHERE m.conversation_id = ?1
                 ORDER BY m.created_at ASC, m.rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Move every message of `conversation_id` addressed to `receiver_id`
    /// whose status is one of `from` to `to`, in a single UPDATE.
    /// Returns the ids that changed, oldest first.
    pub fn transition_status(
        &self,
        conversation_id: &str,
        receiver_id: &str,
        from: &[&str],
        to: &str,
    ) -> Result<Vec<String>> {
        if from.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn_mut(|conn| {
            let placeholders: Vec<String> = (0..from.len()).map(|i| format!("?{}", i + 4)).collect();
            let sql = format!(
                "UPDATE messages SET status = ?3
                 WHERE conversation_id = ?1 AND receiver_id = ?2 AND status IN ({})
                 RETURNING id, created_at, rowid",
                placeholders.join(", ")
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![
                &conversation_id as &dyn rusqlite::types::ToSql,
                &receiver_id,
                &to,
            ];
            params.extend(from.iter().map(|s| s as &dyn rusqlite::types::ToSql));

            let mut stmt = conn.prepare(&sql)?;
            let mut changed = stmt
                .query_map(params.as_slice(), |row| {
                    Ok((
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(0)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            // RETURNING order is unspecified
            changed.sort();
            Ok(changed.into_iter().map(|(_, _, id)| id).collect())
        })
    }

    /// For every conversation of `participant`, its newest message (ties
    /// broken by insertion order). Conversations without messages are
    /// skipped.
    pub fn get_last_messages_for(&self, participant: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM conversations c
                 JOIN messages m ON m.rowid = (
                     SELECT rowid FROM messages
                     WHERE conversation_id = c.id
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1
                 )
                 WHERE c.participant_lo = ?1 OR c.participant_hi = ?1
                 ORDER BY m.created_at DESC, m.rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([participant], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_conversation_by_id(conn: &Connection, id: &str) -> Result<Option<ConversationRow>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1");
    let row = conn.query_row(&sql, [id], map_conversation).optional()?;
    Ok(row)
}

fn query_conversation_by_pair(
    conn: &Connection,
    lo: &str,
    hi: &str,
) -> Result<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations c
         WHERE c.participant_lo = ?1 AND c.participant_hi = ?2"
    );
    let row = conn.query_row(&sql, [lo, hi], map_conversation).optional()?;
    Ok(row)
}

fn map_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        participant_lo: row.get(1)?,
        participant_hi: row.get(2)?,
        last_message_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        body: row.get(4)?,
        attachment_url: row.get(5)?,
        kind: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
