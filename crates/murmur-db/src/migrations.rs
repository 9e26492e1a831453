use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (conversations + messages)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE conversations (
                id               TEXT PRIMARY KEY,
                participant_lo   TEXT NOT NULL,
                participant_hi   TEXT NOT NULL,
                last_message_id  TEXT,
                created_at       TEXT NOT NULL,
                UNIQUE(participant_lo, participant_hi),
                CHECK(participant_lo < participant_hi)
            );

            CREATE INDEX idx_conversations_hi
                ON conversations(participant_hi);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        TEXT NOT NULL,
                receiver_id      TEXT NOT NULL,
                body             TEXT NOT NULL,
                attachment_url   TEXT,
                kind             TEXT NOT NULL DEFAULT 'text'
                                 CHECK(kind IN ('text', 'image', 'video', 'file')),
                status           TEXT NOT NULL DEFAULT 'sent'
                                 CHECK(status IN ('sent', 'delivered', 'seen')),
                created_at       TEXT NOT NULL,
                CHECK(sender_id <> receiver_id)
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE INDEX idx_messages_receiver_status
                ON messages(conversation_id, receiver_id, status);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
