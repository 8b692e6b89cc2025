//! Read access to a Messages store, behind a trait so the aggregation and
//! assembly code can run over fixtures.

use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use crate::contacts::ContactDirectory;
use crate::day::DayMatcher;
use crate::db::open_store;
use crate::error::CoreError;
use crate::models::{Attachment, ConversationInfo, RawMessage, Reaction};
use crate::query::{self, MessageColumns};
use crate::reactions::reaction_from_row;

pub const OWN_SENDER_LABEL: &str = "Me";

pub trait StoreReader {
    fn messages_for_day(&self, matcher: &DayMatcher) -> Result<Vec<RawMessage>, CoreError>;

    fn messages_for_day_in_conversation(
        &self,
        conversation_id: i64,
        matcher: &DayMatcher,
    ) -> Result<Vec<RawMessage>, CoreError>;

    /// Reaction events whose normalized target is one of `guids`.
    fn reactions_for_messages(&self, guids: &[String]) -> Result<Vec<Reaction>, CoreError>;

    fn attachments_for_messages(&self, message_ids: &[i64]) -> Result<Vec<Attachment>, CoreError>;

    fn conversation(&self, conversation_id: i64) -> Result<Option<ConversationInfo>, CoreError>;

    fn conversations(&self, conversation_ids: &[i64]) -> Result<Vec<ConversationInfo>, CoreError>;

    fn sender_label(&self, handle: &str) -> String;

    fn conversation_label(&self, info: &ConversationInfo) -> String;

    fn attachment(&self, attachment_id: i64) -> Result<Option<Attachment>, CoreError>;
}

pub struct ChatStore {
    conn: Connection,
    columns: MessageColumns,
    contacts: ContactDirectory,
}

impl ChatStore {
    pub fn open(path: impl AsRef<Path>, contacts: ContactDirectory) -> Result<ChatStore, CoreError> {
        let db = open_store(path)?;
        debug!(path = %db.path.display(), "opened message store");
        ChatStore::from_connection(db.conn, contacts)
    }

    pub fn from_connection(conn: Connection, contacts: ContactDirectory) -> Result<ChatStore, CoreError> {
        let columns = MessageColumns::probe(&conn)?;
        debug!(?columns, "message store columns");
        Ok(ChatStore {
            conn,
            columns,
            contacts,
        })
    }

    pub fn columns(&self) -> MessageColumns {
        self.columns
    }

    pub fn contacts(&self) -> &ContactDirectory {
        &self.contacts
    }
}

impl StoreReader for ChatStore {
    fn messages_for_day(&self, matcher: &DayMatcher) -> Result<Vec<RawMessage>, CoreError> {
        query::messages_for_day(&self.conn, &self.columns, matcher)
    }

    fn messages_for_day_in_conversation(
        &self,
        conversation_id: i64,
        matcher: &DayMatcher,
    ) -> Result<Vec<RawMessage>, CoreError> {
        query::messages_for_day_in_conversation(&self.conn, &self.columns, conversation_id, matcher)
    }

    fn reactions_for_messages(&self, guids: &[String]) -> Result<Vec<Reaction>, CoreError> {
        let rows = query::reaction_rows_for_targets(&self.conn, &self.columns, guids)?;
        Ok(rows.iter().filter_map(reaction_from_row).collect())
    }

    fn attachments_for_messages(&self, message_ids: &[i64]) -> Result<Vec<Attachment>, CoreError> {
        query::attachments_for_messages(&self.conn, message_ids)
    }

    fn conversation(&self, conversation_id: i64) -> Result<Option<ConversationInfo>, CoreError> {
        query::get_conversation(&self.conn, conversation_id)
    }

    fn conversations(&self, conversation_ids: &[i64]) -> Result<Vec<ConversationInfo>, CoreError> {
        query::get_conversations(&self.conn, conversation_ids)
    }

    fn sender_label(&self, handle: &str) -> String {
        self.contacts.resolve_name(handle)
    }

    fn conversation_label(&self, info: &ConversationInfo) -> String {
        let stored = info.display_name.as_deref().or(info.identifier.as_deref());
        self.contacts
            .resolve_conversation_name(stored, &info.handles, info.is_group)
    }

    fn attachment(&self, attachment_id: i64) -> Result<Option<Attachment>, CoreError> {
        query::get_attachment(&self.conn, attachment_id)
    }
}
