use chrono::{NaiveDate, TimeZone, Utc};
use std::path::Path;

use rusqlite::{params, Connection};

use crate::archive::writer::encode_rich_text;
use crate::day::APPLE_EPOCH_OFFSET;
use crate::error::CoreError;
use crate::models::{RangeKind, RichText, TextRange};
use crate::schema::create_schema;

const DEMO_YEARS: &[i32] = &[2012, 2016, 2019, 2023];

/// Nanoseconds since 2001-01-01 for `hour`:`minute` UTC on the given date.
fn apple_nanos(date: NaiveDate, hour: u32, minute: u32) -> Option<i64> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some((Utc.from_utc_datetime(&naive).timestamp() - APPLE_EPOCH_OFFSET) * 1_000_000_000)
}

struct Inserter<'c> {
    conn: &'c Connection,
    next_id: i64,
    inserted: usize,
}

impl Inserter<'_> {
    #[allow(clippy::too_many_arguments)]
    fn message(
        &mut self,
        chat_id: i64,
        handle_id: i64,
        date: i64,
        is_from_me: bool,
        text: Option<&str>,
        body: Option<Vec<u8>>,
        associated: Option<(&str, i64)>,
    ) -> Result<String, CoreError> {
        self.next_id += 1;
        let guid = format!("DEMO-{:04}", self.next_id);
        self.conn.execute(
            "INSERT INTO message (ROWID, guid, text, handle_id, service, date, date_read, is_from_me, \
                                  associated_message_guid, associated_message_type, attributedBody) \
             VALUES (?1, ?2, ?3, ?4, 'iMessage', ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                self.next_id,
                guid,
                text,
                if is_from_me { 0 } else { handle_id },
                date,
                if is_from_me { 0 } else { date + 90_000_000_000 },
                is_from_me as i64,
                associated.map(|(target, _)| target.to_string()),
                associated.map(|(_, code)| code).unwrap_or(0),
                body,
            ],
        )?;
        self.conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id, message_date) VALUES (?1, ?2, ?3);",
            params![chat_id, self.next_id, date],
        )?;
        self.inserted += 1;
        Ok(guid)
    }

    fn attachment(&mut self, message_guid: &str, filename: &str, mime: Option<&str>) -> Result<(), CoreError> {
        let path = format!("~/Library/Messages/Attachments/demo/{}", filename.replace(' ', "%20"));
        self.conn.execute(
            "INSERT INTO attachment (guid, filename, mime_type, transfer_name) VALUES (?1, ?2, ?3, ?4);",
            params![format!("ATT-{message_guid}"), path, mime, filename],
        )?;
        self.conn.execute(
            "INSERT INTO message_attachment_join (message_id, attachment_id) \
             SELECT m.ROWID, last_insert_rowid() FROM message m WHERE m.guid = ?1;",
            params![message_guid],
        )?;
        self.conn.execute(
            "UPDATE message SET cache_has_attachments = 1 WHERE guid = ?1;",
            params![message_guid],
        )?;
        Ok(())
    }
}

/// Builds a small Messages store with history on `month`/`day` across several
/// years, plus a little traffic on the following day. Returns the number of
/// message rows written.
pub fn seed_demo(conn: &Connection, month: u32, day: u32) -> Result<usize, CoreError> {
    create_schema(conn)?;
    conn.execute_batch("BEGIN;")?;
    let result = (|| -> Result<usize, CoreError> {
        conn.execute_batch(
            "INSERT INTO handle (ROWID, id, service) VALUES (1, '+15550001111', 'iMessage');
             INSERT INTO handle (ROWID, id, service) VALUES (2, 'sam@example.com', 'iMessage');
             INSERT INTO handle (ROWID, id, service) VALUES (3, '+15550002222', 'SMS');
             INSERT INTO chat (ROWID, guid, style, chat_identifier, display_name)
               VALUES (1, 'iMessage;-;+15550001111', 45, '+15550001111', NULL);
             INSERT INTO chat (ROWID, guid, style, chat_identifier, display_name)
               VALUES (2, 'iMessage;+;chat100200300', 43, 'chat100200300', 'Trail Crew');
             INSERT INTO chat (ROWID, guid, style, chat_identifier, display_name)
               VALUES (3, 'iMessage;+;chat400500600', 43, 'chat400500600', NULL);
             INSERT INTO chat_handle_join VALUES (1, 1);
             INSERT INTO chat_handle_join VALUES (2, 1), (2, 2), (2, 3);
             INSERT INTO chat_handle_join VALUES (3, 2), (3, 3);",
        )?;

        let mut insert = Inserter {
            conn,
            next_id: 0,
            inserted: 0,
        };
        for (idx, year) in DEMO_YEARS.iter().enumerate() {
            // Feb 29 only exists in leap years.
            let Some(date) = NaiveDate::from_ymd_opt(*year, month, day) else {
                continue;
            };
            let at = |hour, minute| {
                apple_nanos(date, hour, minute)
                    .ok_or_else(|| CoreError::InvalidArgument(format!("bad demo time on {date}")))
            };

            let first = insert.message(1, 1, at(9, 15)?, false, Some(format!("Happy {year}! Coffee later?").as_str()), None, None)?;
            insert.message(1, 1, at(9, 20)?, true, Some("Absolutely, usual place"), None, None)?;
            insert.message(1, 1, at(9, 21)?, false, None, None, Some((format!("p:0/{first}").as_str(), 2001)))?;

            let mention = RichText {
                text: "@Sam did you book the campsite?".to_string(),
                ranges: vec![TextRange {
                    start: 0,
                    end: 4,
                    kind: RangeKind::Mention,
                    value: Some("sam@example.com".to_string()),
                }],
            };
            let asked = insert.message(2, 1, at(12, 0)?, false, None, Some(encode_rich_text(&mention)), None)?;
            let reply = insert.message(2, 2, at(12, 5)?, false, Some("Booked! Photos from last time:"), None, None)?;
            insert.attachment(&reply, "IMG 0042.HEIC", Some("image/heic"))?;
            insert.message(2, 3, at(12, 6)?, false, None, None, Some((format!("p:0/{asked}").as_str(), 2000)))?;
            insert.message(2, 3, at(12, 7)?, false, None, None, Some((format!("p:0/{asked}").as_str(), 3000)))?;
            insert.message(2, 0, at(12, 8)?, true, None, None, Some((format!("p:0/{reply}").as_str(), 2003)))?;

            if idx % 2 == 1 {
                let clip = insert.message(3, 2, at(18, 30)?, false, Some("\u{FFFC}"), None, None)?;
                insert.attachment(&clip, "voice memo.caf", None)?;
            }

            if let Some(next) = date.succ_opt() {
                let later = apple_nanos(next, 10, 0)
                    .ok_or_else(|| CoreError::InvalidArgument(format!("bad demo time on {next}")))?;
                insert.message(1, 1, later, true, Some("Thanks for yesterday"), None, None)?;
            }
        }
        Ok(insert.inserted)
    })();

    match result {
        Ok(count) => {
            conn.execute_batch("COMMIT;")?;
            Ok(count)
        }
        Err(err) => {
            let _ = conn.execute_batch("ROLLBACK;");
            Err(err)
        }
    }
}

/// Seeds a fresh database file at `path`. An existing file is left alone.
pub fn seed_demo_file(path: &Path, month: u32, day: u32) -> Result<usize, CoreError> {
    if path.exists() {
        return Err(CoreError::InvalidArgument(format!("{} already exists", path.display())));
    }
    let conn = Connection::open(path)?;
    seed_demo(&conn, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn seed_file_refuses_to_overwrite() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("demo.db");
        assert!(seed_demo_file(&path, 7, 4).expect("seed") > 0);
        assert!(matches!(seed_demo_file(&path, 7, 4), Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn seeds_every_year_for_ordinary_days() {
        let conn = Connection::open_in_memory().expect("memory db");
        let count = seed_demo(&conn, 3, 15).expect("seed");
        // 8 rows on the day per year, 1 the day after, and a voice memo every other year.
        assert_eq!(count, DEMO_YEARS.len() * 9 + DEMO_YEARS.len() / 2);
        let attachments: i64 = conn
            .query_row("SELECT COUNT(*) FROM message_attachment_join;", [], |row| row.get(0))
            .expect("count");
        assert_eq!(attachments, 6);
    }

    #[test]
    fn leap_day_seeds_leap_years_only() {
        let conn = Connection::open_in_memory().expect("memory db");
        let count = seed_demo(&conn, 2, 29).expect("seed");
        // 2012 and 2016 are leap years; 2016 is the odd index with a voice memo.
        assert_eq!(count, 2 * 9 + 1);
    }
}
