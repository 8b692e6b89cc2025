use chrono::{TimeZone, Utc};
use on_this_day_core::archive::writer::{encode_plain, encode_rich_text};
use on_this_day_core::day::APPLE_EPOCH_OFFSET;
use on_this_day_core::models::{AttachmentKind, RangeKind, ReactionKind, RichText, TextRange};
use on_this_day_core::schema::create_schema;
use on_this_day_core::{assemble, conversation_day, CalendarZone, ChatStore, ContactDirectory, CoreError, DayMatcher};
use rusqlite::{params, Connection};

fn nanos(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> i64 {
    let unix = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .expect("valid date")
        .timestamp();
    (unix - APPLE_EPOCH_OFFSET) * 1_000_000_000
}

struct Fixture {
    conn: Connection,
    next_id: i64,
}

impl Fixture {
    fn new() -> Self {
        let conn = Connection::open_in_memory().expect("memory db");
        create_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO handle (ROWID, id) VALUES (1, '+15550001111'), (2, 'kim@example.com');
             INSERT INTO chat (ROWID, guid, style, chat_identifier, display_name) VALUES (1, 'c1', 43, 'chat77', NULL);
             INSERT INTO chat_handle_join VALUES (1, 1), (1, 2);",
        )
        .expect("chat");
        Fixture { conn, next_id: 0 }
    }

    fn message(&mut self, date: i64, handle: i64, from_me: bool, text: Option<&str>, body: Option<Vec<u8>>) -> String {
        self.row(date, handle, from_me, text, body, None)
    }

    fn reaction(&mut self, date: i64, handle: i64, target: &str, code: i64) -> String {
        self.row(date, handle, handle == 0, None, None, Some((format!("p:0/{target}"), code)))
    }

    fn row(
        &mut self,
        date: i64,
        handle: i64,
        from_me: bool,
        text: Option<&str>,
        body: Option<Vec<u8>>,
        associated: Option<(String, i64)>,
    ) -> String {
        self.next_id += 1;
        let guid = format!("G{}", self.next_id);
        let (target, code) = match associated {
            Some((target, code)) => (Some(target), code),
            None => (None, 0),
        };
        self.conn
            .execute(
                "INSERT INTO message (ROWID, guid, text, handle_id, date, is_from_me, attributedBody, \
                                      associated_message_guid, associated_message_type, thread_originator_guid) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL);",
                params![self.next_id, guid, text, handle, date, from_me as i64, body, target, code],
            )
            .expect("message");
        self.conn
            .execute(
                "INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, ?1);",
                params![self.next_id],
            )
            .expect("join");
        guid
    }

    fn attach(&self, message_guid: &str, filename: &str, mime: Option<&str>) {
        self.conn
            .execute(
                "INSERT INTO attachment (guid, filename, mime_type, transfer_name) VALUES (?1, ?2, ?3, NULL);",
                params![format!("A-{message_guid}"), filename, mime],
            )
            .expect("attachment");
        self.conn
            .execute(
                "INSERT INTO message_attachment_join (message_id, attachment_id) \
                 SELECT ROWID, last_insert_rowid() FROM message WHERE guid = ?1;",
                params![message_guid],
            )
            .expect("join");
    }

    fn store(self, contacts: ContactDirectory) -> ChatStore {
        ChatStore::from_connection(self.conn, contacts).expect("store")
    }
}

fn march_15() -> DayMatcher {
    DayMatcher::new(3, 15, CalendarZone::utc()).expect("matcher")
}

#[test]
fn decoded_body_keeps_text_and_mention() {
    let mut fixture = Fixture::new();
    let rich = RichText {
        text: "Hello @Kim".to_string(),
        ranges: vec![TextRange {
            start: 6,
            end: 10,
            kind: RangeKind::Mention,
            value: Some("kim@example.com".to_string()),
        }],
    };
    fixture.message(nanos(2021, 3, 15, 8, 0), 1, false, None, Some(encode_rich_text(&rich)));
    let store = fixture.store(ContactDirectory::default());

    let groups = assemble(&store, 1, &march_15()).expect("assemble");
    assert_eq!(groups.len(), 1);
    let message = &groups[0].messages[0];
    assert_eq!(message.text, "Hello @Kim");
    assert_eq!(message.ranges.len(), 1);
    assert_eq!(message.ranges[0].kind, RangeKind::Mention);
    assert_eq!(&message.text[message.ranges[0].start..message.ranges[0].end], "@Kim");
}

#[test]
fn empty_messages_drop_unless_they_carry_attachments() {
    let mut fixture = Fixture::new();
    fixture.message(nanos(2020, 3, 15, 9, 0), 1, false, None, None);
    fixture.message(nanos(2020, 3, 15, 9, 1), 1, false, Some("   "), None);
    let photo = fixture.message(nanos(2020, 3, 15, 9, 2), 1, false, Some("\u{FFFC}"), None);
    fixture.attach(&photo, "~/Library/Messages/Attachments/ab/IMG_7.JPG", None);
    fixture.message(nanos(2020, 3, 15, 9, 3), 1, false, None, Some(encode_plain("from the body")));
    let store = fixture.store(ContactDirectory::default());

    let groups = assemble(&store, 1, &march_15()).expect("assemble");
    let messages = &groups[0].messages;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "");
    assert_eq!(messages[0].attachments.len(), 1);
    assert_eq!(messages[0].attachments[0].kind, AttachmentKind::Image);
    assert_eq!(messages[0].attachments[0].filename, "IMG_7.JPG");
    assert_eq!(messages[1].text, "from the body");
}

#[test]
fn year_groups_ascend_and_messages_keep_time_order() {
    let mut fixture = Fixture::new();
    fixture.message(nanos(2019, 3, 15, 12, 0), 1, false, Some("2019 noon"), None);
    fixture.message(nanos(2015, 3, 15, 18, 0), 1, false, Some("2015 evening"), None);
    fixture.message(nanos(2015, 3, 15, 7, 0), 0, true, Some("2015 morning"), None);
    let store = fixture.store(ContactDirectory::default());

    let groups = assemble(&store, 1, &march_15()).expect("assemble");
    let years: Vec<i32> = groups.iter().map(|g| g.year).collect();
    assert_eq!(years, vec![2015, 2019]);
    let texts: Vec<&str> = groups[0].messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["2015 morning", "2015 evening"]);
    assert_eq!(groups[0].messages[0].sender.as_deref(), Some("Me"));
}

#[test]
fn reactions_resolve_across_days() {
    let mut fixture = Fixture::new();
    let target = fixture.message(nanos(2022, 3, 15, 10, 0), 1, false, Some("big news"), None);
    fixture.reaction(nanos(2022, 3, 15, 10, 5), 2, &target, 2001);
    fixture.reaction(nanos(2022, 3, 15, 10, 6), 0, &target, 2000);
    fixture.reaction(nanos(2022, 3, 16, 8, 0), 0, &target, 3000);
    fixture.reaction(nanos(2022, 3, 16, 8, 1), 1, &target, 2003);
    let store = fixture.store(ContactDirectory::default());

    let groups = assemble(&store, 1, &march_15()).expect("assemble");
    let message = &groups[0].messages[0];
    let kinds: Vec<ReactionKind> = message.reactions.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ReactionKind::Liked, ReactionKind::Laughed]);
    assert_eq!(message.reactions[0].sender.as_deref(), Some("kim@example.com"));
}

#[test]
fn senders_resolve_through_contacts() {
    let mut fixture = Fixture::new();
    fixture.message(nanos(2018, 3, 15, 10, 0), 1, false, Some("hi"), None);
    let mut contacts = ContactDirectory::default();
    contacts.insert_phone("(555) 000-1111", "Ada Lovelace");
    let store = fixture.store(contacts);

    let day = conversation_day(&store, 1, &march_15()).expect("day");
    assert_eq!(day.display_name, "Ada Lovelace, kim@example.com");
    assert!(day.is_group);
    assert_eq!(day.year_groups[0].messages[0].sender.as_deref(), Some("Ada Lovelace"));
}

#[test]
fn missing_conversation_is_not_found() {
    let store = Fixture::new().store(ContactDirectory::default());
    assert!(matches!(assemble(&store, 404, &march_15()), Err(CoreError::NotFound(_))));
    assert!(matches!(conversation_day(&store, 404, &march_15()), Err(CoreError::NotFound(_))));
    // An existing conversation with nothing on the day is empty, not missing.
    assert!(assemble(&store, 1, &march_15()).expect("assemble").is_empty());
}
