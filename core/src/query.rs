use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::warn;

use crate::day::DayMatcher;
use crate::error::CoreError;
use crate::models::{Attachment, ConversationInfo, RawMessage};
use crate::timeline::classify_attachment;

/// SQLite caps bound parameters; IN-lists are split into batches of this size.
pub const IN_BATCH: usize = 500;

/// `chat.style` for multi-party conversations.
const GROUP_CHAT_STYLE: i64 = 43;

const NORMALIZED_TARGET: &str = "CASE \
     WHEN m.associated_message_guid LIKE 'p:%/%' \
       THEN substr(m.associated_message_guid, instr(m.associated_message_guid, '/') + 1) \
     WHEN m.associated_message_guid LIKE 'bp:%' \
       THEN substr(m.associated_message_guid, 4) \
     ELSE m.associated_message_guid END";

/// Optional `message` columns present in the opened store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageColumns {
    pub attributed_body: bool,
    pub thread_originator: bool,
    pub date_read: bool,
}

impl MessageColumns {
    pub fn probe(conn: &Connection) -> Result<MessageColumns, CoreError> {
        for table in ["message", "chat", "chat_message_join", "handle"] {
            if !table_exists(conn, table)? {
                return Err(CoreError::StoreUnavailable(format!("not a message store: missing table {table}")));
            }
        }
        Ok(MessageColumns {
            attributed_body: column_exists(conn, "message", "attributedBody")?,
            thread_originator: column_exists(conn, "message", "thread_originator_guid")?,
            date_read: pick_column(conn, "message", &["date_read"])?.is_some(),
        })
    }

    fn select_list(&self) -> String {
        let optional = |present: bool, column: &str| {
            if present {
                format!("m.{column}")
            } else {
                "NULL".to_string()
            }
        };
        format!(
            "SELECT m.ROWID, m.guid, cmj.chat_id, COALESCE(m.date, 0), COALESCE(m.is_from_me, 0), m.text, {}, h.id, \
                    m.associated_message_guid, m.associated_message_type, {}, {} \
             FROM message m \
             JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
             LEFT JOIN handle h ON h.ROWID = m.handle_id",
            optional(self.attributed_body, "attributedBody"),
            optional(self.thread_originator, "thread_originator_guid"),
            optional(self.date_read, "date_read"),
        )
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool, CoreError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type='table' AND name = ?1;",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, CoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub(crate) fn pick_column(conn: &Connection, table: &str, preferred: &[&str]) -> Result<Option<String>, CoreError> {
    for col in preferred {
        if column_exists(conn, table, col)? {
            return Ok(Some((*col).to_string()));
        }
    }
    Ok(None)
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}

/// Text column read without trusting its encoding; bad UTF-8 becomes U+FFFD.
fn lossy_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
    })
}

/// Keeps the rows that mapped; a row that still fails is logged, not hidden.
fn collect_rows<T>(rows: impl Iterator<Item = rusqlite::Result<T>>, source: &str) -> Vec<T> {
    rows.filter_map(|row| match row {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(source, error = %err, "skipping unreadable row");
            None
        }
    })
    .collect()
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
        id: row.get(0)?,
        guid: lossy_text(row, 1)?.unwrap_or_default(),
        conversation_id: row.get(2)?,
        timestamp: row.get(3)?,
        is_from_me: row.get::<_, i64>(4)? != 0,
        text: lossy_text(row, 5)?,
        attributed_body: row.get(6)?,
        handle: lossy_text(row, 7)?,
        associated_guid: lossy_text(row, 8)?,
        associated_type: row.get(9)?,
        reply_to_guid: lossy_text(row, 10)?,
        date_read: row.get::<_, Option<i64>>(11)?.filter(|d| *d != 0),
    })
}

fn query_messages(conn: &Connection, sql: &str, params_vec: Vec<Value>) -> Result<Vec<RawMessage>, CoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(params_vec), map_message)?;
    Ok(collect_rows(rows, "message"))
}

/// Every message, in any conversation, sent on the matcher's calendar day.
pub fn messages_for_day(
    conn: &Connection,
    columns: &MessageColumns,
    matcher: &DayMatcher,
) -> Result<Vec<RawMessage>, CoreError> {
    let predicate = matcher.predicate("m.date");
    let sql = format!(
        "{} WHERE {} ORDER BY m.date ASC, m.ROWID ASC;",
        columns.select_list(),
        predicate.sql
    );
    let rows = query_messages(conn, &sql, predicate.params)?;
    Ok(rows.into_iter().filter(|m| matcher.matches(m.timestamp)).collect())
}

pub fn messages_for_day_in_conversation(
    conn: &Connection,
    columns: &MessageColumns,
    conversation_id: i64,
    matcher: &DayMatcher,
) -> Result<Vec<RawMessage>, CoreError> {
    let predicate = matcher.predicate("m.date");
    let sql = format!(
        "{} WHERE cmj.chat_id = ? AND {} ORDER BY m.date ASC, m.ROWID ASC;",
        columns.select_list(),
        predicate.sql
    );
    let mut params_vec: Vec<Value> = vec![conversation_id.into()];
    params_vec.extend(predicate.params);
    let rows = query_messages(conn, &sql, params_vec)?;
    Ok(rows.into_iter().filter(|m| matcher.matches(m.timestamp)).collect())
}

/// Reaction carrier rows aimed at any of `guids`, whatever day they were sent.
pub fn reaction_rows_for_targets(
    conn: &Connection,
    columns: &MessageColumns,
    guids: &[String],
) -> Result<Vec<RawMessage>, CoreError> {
    let mut out = Vec::new();
    for batch in guids.chunks(IN_BATCH) {
        let sql = format!(
            "{} WHERE m.associated_message_type >= 2000 AND m.associated_message_type < 4000 \
             AND ({}) IN ({}) \
             ORDER BY m.date ASC, m.ROWID ASC;",
            columns.select_list(),
            NORMALIZED_TARGET,
            placeholders(batch.len())
        );
        let params_vec: Vec<Value> = batch.iter().cloned().map(Value::from).collect();
        out.extend(query_messages(conn, &sql, params_vec)?);
    }
    Ok(out)
}

fn map_attachment(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    let path = lossy_text(row, 2)?;
    let mime_type = lossy_text(row, 3)?;
    let transfer_name = lossy_text(row, 4)?;
    let filename = transfer_name
        .filter(|n| !n.is_empty())
        .or_else(|| {
            path.as_deref()
                .and_then(|p| p.rsplit('/').next())
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "attachment".to_string());
    let kind = classify_attachment(mime_type.as_deref(), path.as_deref().or(Some(filename.as_str())));
    Ok(Attachment {
        id: row.get(0)?,
        message_id: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
        path,
        mime_type,
        filename,
        kind,
    })
}

pub fn attachments_for_messages(conn: &Connection, message_ids: &[i64]) -> Result<Vec<Attachment>, CoreError> {
    let mut out = Vec::new();
    for batch in message_ids.chunks(IN_BATCH) {
        let sql = format!(
            "SELECT a.ROWID, maj.message_id, a.filename, a.mime_type, a.transfer_name \
             FROM attachment a \
             JOIN message_attachment_join maj ON maj.attachment_id = a.ROWID \
             WHERE maj.message_id IN ({}) \
             ORDER BY maj.message_id ASC, a.ROWID ASC;",
            placeholders(batch.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(batch.iter()), map_attachment)?;
        out.extend(collect_rows(rows, "attachment"));
    }
    Ok(out)
}

pub fn get_attachment(conn: &Connection, attachment_id: i64) -> Result<Option<Attachment>, CoreError> {
    let attachment = conn
        .query_row(
            "SELECT a.ROWID, \
                    (SELECT MIN(maj.message_id) FROM message_attachment_join maj WHERE maj.attachment_id = a.ROWID), \
                    a.filename, a.mime_type, a.transfer_name \
             FROM attachment a WHERE a.ROWID = ?1;",
            params![attachment_id],
            map_attachment,
        )
        .optional()?;
    Ok(attachment)
}

fn conversation_handles(conn: &Connection, conversation_id: i64) -> Result<Vec<String>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT h.id FROM chat_handle_join chj \
         JOIN handle h ON h.ROWID = chj.handle_id \
         WHERE chj.chat_id = ?1 \
         ORDER BY h.ROWID ASC;",
    )?;
    let rows = stmt.query_map(params![conversation_id], |row| lossy_text(row, 0))?;
    Ok(collect_rows(rows, "handle").into_iter().flatten().collect())
}

pub fn get_conversation(conn: &Connection, conversation_id: i64) -> Result<Option<ConversationInfo>, CoreError> {
    let info = conn
        .query_row(
            "SELECT ROWID, display_name, chat_identifier, COALESCE(style, 0) FROM chat WHERE ROWID = ?1;",
            params![conversation_id],
            |row| {
                Ok(ConversationInfo {
                    id: row.get(0)?,
                    display_name: lossy_text(row, 1)?.filter(|n| !n.trim().is_empty()),
                    identifier: lossy_text(row, 2)?,
                    is_group: row.get::<_, i64>(3)? == GROUP_CHAT_STYLE,
                    handles: Vec::new(),
                })
            },
        )
        .optional()?;
    match info {
        Some(mut info) => {
            info.handles = conversation_handles(conn, conversation_id)?;
            Ok(Some(info))
        }
        None => Ok(None),
    }
}

pub fn get_conversations(conn: &Connection, conversation_ids: &[i64]) -> Result<Vec<ConversationInfo>, CoreError> {
    let mut out = Vec::with_capacity(conversation_ids.len());
    for id in conversation_ids {
        if let Some(info) = get_conversation(conn, *id)? {
            out.push(info);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::day::CalendarZone;
    use crate::schema::{create_legacy_schema, create_schema};

    fn seeded(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO handle (ROWID, id) VALUES (1, '+15550001111');
             INSERT INTO chat (ROWID, guid, style, chat_identifier) VALUES (1, 'iMessage;-;+15550001111', 45, '+15550001111');
             INSERT INTO chat_handle_join VALUES (1, 1);
             INSERT INTO message (ROWID, guid, text, handle_id, date) VALUES (1, 'm1', 'hi', 1, 0);
             INSERT INTO message (ROWID, guid, text, handle_id, date, associated_message_guid, associated_message_type)
               VALUES (2, 'r1', 'Liked \"hi\"', 1, 5, 'p:0/m1', 2001);
             INSERT INTO message (ROWID, guid, text, handle_id, date, associated_message_guid, associated_message_type)
               VALUES (3, 'r2', NULL, 1, 6, 'bp:m1', 3001);
             INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, 1), (1, 2), (1, 3);
             INSERT INTO attachment (ROWID, guid, filename, mime_type, transfer_name)
               VALUES (1, 'a1', '~/Library/Messages/Attachments/IMG_1.HEIC', NULL, NULL);
             INSERT INTO message_attachment_join VALUES (1, 1);",
        )
        .expect("seed");
    }

    #[test]
    fn probes_optional_columns() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        let full = MessageColumns::probe(&conn).expect("probe");
        assert!(full.attributed_body && full.thread_originator && full.date_read);

        let legacy = Connection::open_in_memory().expect("memory db");
        create_legacy_schema(&legacy).expect("schema");
        assert_eq!(MessageColumns::probe(&legacy).expect("probe"), MessageColumns::default());

        let empty = Connection::open_in_memory().expect("memory db");
        assert!(matches!(MessageColumns::probe(&empty), Err(CoreError::StoreUnavailable(_))));
    }

    #[test]
    fn reactions_match_normalized_targets() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        seeded(&conn);
        let columns = MessageColumns::probe(&conn).expect("probe");
        let rows = reaction_rows_for_targets(&conn, &columns, &["m1".to_string()]).expect("reactions");
        let guids: Vec<_> = rows.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["r1", "r2"]);
    }

    #[test]
    fn attachment_names_fall_back_to_path() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        seeded(&conn);
        let attachments = attachments_for_messages(&conn, &[1]).expect("attachments");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "IMG_1.HEIC");
        assert_eq!(attachments[0].kind, crate::models::AttachmentKind::Image);
        assert!(get_attachment(&conn, 99).expect("lookup").is_none());
    }

    #[test]
    fn conversations_carry_handles() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        seeded(&conn);
        let info = get_conversation(&conn, 1).expect("query").expect("exists");
        assert!(!info.is_group);
        assert_eq!(info.handles, vec!["+15550001111".to_string()]);
        assert_eq!(get_conversations(&conn, &[1, 2]).expect("query").len(), 1);
    }

    #[test]
    fn legacy_store_reads_without_optional_columns() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_legacy_schema(&conn).expect("schema");
        seeded(&conn);
        let columns = MessageColumns::probe(&conn).expect("probe");
        let matcher = DayMatcher::new(1, 1, CalendarZone::utc()).expect("matcher");
        let rows = messages_for_day(&conn, &columns, &matcher).expect("messages");
        // date 0 is never on any day; the carriers at 5s and 6s past the epoch are.
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.attributed_body.is_none()));
    }

    #[test]
    fn invalid_utf8_text_is_kept_lossily() {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO handle (ROWID, id) VALUES (1, CAST(X'2B3135FF' AS TEXT));
             INSERT INTO chat (ROWID, guid, style, chat_identifier) VALUES (1, 'c1', 45, 'x');
             INSERT INTO message (ROWID, guid, text, handle_id, date)
               VALUES (1, 'm1', CAST(X'48656CFF6C6F' AS TEXT), 1, 5);
             INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, 1);",
        )
        .expect("insert");
        let columns = MessageColumns::probe(&conn).expect("probe");
        let matcher = DayMatcher::new(1, 1, CalendarZone::utc()).expect("matcher");
        let rows = messages_for_day(&conn, &columns, &matcher).expect("messages");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text.as_deref(), Some("Hel\u{FFFD}lo"));
        assert_eq!(rows[0].handle.as_deref(), Some("+15\u{FFFD}"));
    }
}
