use rusqlite::Connection;

use crate::error::CoreError;

/// The subset of the Messages `chat.db` layout that the reader touches, as
/// written by current macOS releases.
pub const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS handle (
  ROWID INTEGER PRIMARY KEY AUTOINCREMENT UNIQUE,
  id TEXT NOT NULL,
  country TEXT,
  service TEXT NOT NULL DEFAULT 'iMessage',
  uncanonicalized_id TEXT
);

CREATE TABLE IF NOT EXISTS chat (
  ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
  guid TEXT UNIQUE NOT NULL,
  style INTEGER,
  state INTEGER,
  chat_identifier TEXT,
  service_name TEXT,
  display_name TEXT
);

CREATE TABLE IF NOT EXISTS message (
  ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
  guid TEXT UNIQUE NOT NULL,
  text TEXT,
  handle_id INTEGER DEFAULT 0,
  service TEXT,
  date INTEGER,
  date_read INTEGER,
  date_delivered INTEGER,
  is_from_me INTEGER DEFAULT 0,
  cache_has_attachments INTEGER DEFAULT 0,
  associated_message_guid TEXT DEFAULT NULL,
  associated_message_type INTEGER DEFAULT 0,
  thread_originator_guid TEXT DEFAULT NULL,
  attributedBody BLOB
);

CREATE TABLE IF NOT EXISTS chat_message_join (
  chat_id INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
  message_id INTEGER REFERENCES message (ROWID) ON DELETE CASCADE,
  message_date INTEGER DEFAULT 0,
  PRIMARY KEY (chat_id, message_id)
);

CREATE TABLE IF NOT EXISTS chat_handle_join (
  chat_id INTEGER REFERENCES chat (ROWID) ON DELETE CASCADE,
  handle_id INTEGER REFERENCES handle (ROWID) ON DELETE CASCADE,
  UNIQUE (chat_id, handle_id)
);

CREATE TABLE IF NOT EXISTS attachment (
  ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
  guid TEXT UNIQUE NOT NULL,
  created_date INTEGER DEFAULT 0,
  filename TEXT,
  uti TEXT,
  mime_type TEXT,
  transfer_name TEXT,
  total_bytes INTEGER DEFAULT 0
);

CREATE TABLE IF NOT EXISTS message_attachment_join (
  message_id INTEGER REFERENCES message (ROWID) ON DELETE CASCADE,
  attachment_id INTEGER REFERENCES attachment (ROWID) ON DELETE CASCADE,
  UNIQUE (message_id, attachment_id)
);

CREATE INDEX IF NOT EXISTS message_idx_date ON message(date);
CREATE INDEX IF NOT EXISTS message_idx_associated_message ON message(associated_message_guid);
CREATE INDEX IF NOT EXISTS chat_message_join_idx_message_id ON chat_message_join(message_id);
"#;

/// Columns that older stores lack and the reader probes for.
pub const OPTIONAL_MESSAGE_COLUMNS: &[&str] = &["attributedBody", "thread_originator_guid", "date_read"];

pub fn create_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(STORE_SCHEMA)?;
    Ok(())
}

/// A store as written by releases that predate rich text bodies and replies.
pub fn create_legacy_schema(conn: &Connection) -> Result<(), CoreError> {
    create_schema(conn)?;
    conn.execute_batch(
        "DROP TABLE message;
         CREATE TABLE message (
           ROWID INTEGER PRIMARY KEY AUTOINCREMENT,
           guid TEXT UNIQUE NOT NULL,
           text TEXT,
           handle_id INTEGER DEFAULT 0,
           service TEXT,
           date INTEGER,
           date_delivered INTEGER,
           is_from_me INTEGER DEFAULT 0,
           cache_has_attachments INTEGER DEFAULT 0,
           associated_message_guid TEXT DEFAULT NULL,
           associated_message_type INTEGER DEFAULT 0
         );
         CREATE INDEX message_idx_date ON message(date);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(conn: &Connection) -> Vec<String> {
        let mut stmt = conn.prepare("PRAGMA table_info(message);").expect("pragma");
        let rows = stmt.query_map([], |row| row.get::<_, String>(1)).expect("query");
        rows.filter_map(Result::ok).collect()
    }

    #[test]
    fn schema_creates_store_tables() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('message','chat','handle','attachment','chat_message_join','chat_handle_join','message_attachment_join');",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(count, 7);
        create_schema(&conn).expect("idempotent");
    }

    #[test]
    fn legacy_schema_lacks_optional_columns() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_legacy_schema(&conn).expect("schema");
        let present = columns(&conn);
        assert!(present.iter().any(|c| c == "associated_message_type"));
        for optional in OPTIONAL_MESSAGE_COLUMNS {
            assert!(!present.iter().any(|c| c == optional), "{optional} should be absent");
        }
    }
}
