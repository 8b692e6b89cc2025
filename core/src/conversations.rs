use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::archive::{decode, salvage_text};
use crate::day::{to_iso, DayMatcher};
use crate::error::CoreError;
use crate::models::{ConversationInfo, ConversationSummary, RawMessage, RichText};
use crate::store::StoreReader;

#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    pub preview_chars: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        SummaryOptions { preview_chars: 100 }
    }
}

/// Body text of a message: the plain `text` column, else the decoded rich
/// body, else whatever can be salvaged from it, else empty. Decoded ranges are
/// kept whenever the decoded text agrees with the plain column. Placeholder and
/// control characters are stripped from every source.
pub fn resolve_text(raw: &RawMessage) -> RichText {
    let plain = raw
        .plain_text()
        .map(|text| {
            RichText {
                text: text.to_string(),
                ranges: Vec::new(),
            }
            .display()
        })
        .filter(|rich| !rich.text.is_empty());
    let decoded = raw.attributed_body.as_deref().and_then(|blob| match decode(blob) {
        Ok(rich) => Some(rich.display()),
        Err(err) if plain.is_some() => {
            debug!(guid = %raw.guid, error = %err, "attributed body did not decode, plain text used");
            None
        }
        Err(err) => {
            warn!(guid = %raw.guid, error = %err, "attributed body did not decode");
            None
        }
    });
    match (plain, decoded) {
        (Some(plain), Some(rich)) if rich.text == plain.text => rich,
        (Some(plain), _) => plain,
        (None, Some(rich)) => rich,
        (None, None) => {
            let salvaged = raw.attributed_body.as_deref().and_then(salvage_text);
            if salvaged.is_some() {
                debug!(guid = %raw.guid, "recovered text by salvage");
            }
            RichText {
                text: salvaged.unwrap_or_default(),
                ranges: Vec::new(),
            }
            .display()
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Conversations with at least one message on the matcher's day, most
/// recently active first.
pub fn list_conversations<S: StoreReader + ?Sized>(
    store: &S,
    matcher: &DayMatcher,
    options: &SummaryOptions,
) -> Result<Vec<ConversationSummary>, CoreError> {
    let mut groups: BTreeMap<i64, Vec<RawMessage>> = BTreeMap::new();
    for message in store.messages_for_day(matcher)? {
        if message.is_reaction_carrier() || !matcher.matches(message.timestamp) {
            continue;
        }
        groups.entry(message.conversation_id).or_default().push(message);
    }

    let ids: Vec<i64> = groups.keys().copied().collect();
    let mut infos: HashMap<i64, ConversationInfo> = store
        .conversations(&ids)?
        .into_iter()
        .map(|info| (info.id, info))
        .collect();

    let mut summaries = Vec::with_capacity(groups.len());
    for (conversation_id, messages) in groups {
        let Some(latest) = messages.iter().max_by_key(|m| (m.timestamp, m.id)) else {
            continue;
        };
        let mut years: Vec<i32> = messages.iter().filter_map(|m| matcher.year_of(m.timestamp)).collect();
        years.sort_unstable_by(|a, b| b.cmp(a));
        years.dedup();

        let info = infos.remove(&conversation_id).unwrap_or_else(|| ConversationInfo {
            id: conversation_id,
            ..ConversationInfo::default()
        });
        summaries.push(ConversationSummary {
            conversation_id,
            display_name: store.conversation_label(&info),
            handles: info.handles,
            is_group: info.is_group,
            years,
            message_count: messages.len() as i64,
            preview: truncate_chars(&resolve_text(latest).text, options.preview_chars),
            last_message_at: latest.timestamp,
            last_message_date: to_iso(latest.timestamp, matcher.zone()),
        });
    }

    summaries.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then(a.conversation_id.cmp(&b.conversation_id))
    });
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::writer::{encode_plain, encode_rich_text};
    use crate::day::CalendarZone;
    use crate::models::{Attachment, RangeKind, Reaction, TextRange};

    const YEAR: i64 = 365 * 86_400;

    struct FakeStore {
        messages: Vec<RawMessage>,
    }

    impl StoreReader for FakeStore {
        fn messages_for_day(&self, _matcher: &DayMatcher) -> Result<Vec<RawMessage>, CoreError> {
            Ok(self.messages.clone())
        }

        fn messages_for_day_in_conversation(
            &self,
            conversation_id: i64,
            _matcher: &DayMatcher,
        ) -> Result<Vec<RawMessage>, CoreError> {
            Ok(self
                .messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect())
        }

        fn reactions_for_messages(&self, _guids: &[String]) -> Result<Vec<Reaction>, CoreError> {
            Ok(Vec::new())
        }

        fn attachments_for_messages(&self, _ids: &[i64]) -> Result<Vec<Attachment>, CoreError> {
            Ok(Vec::new())
        }

        fn conversation(&self, conversation_id: i64) -> Result<Option<ConversationInfo>, CoreError> {
            Ok(Some(ConversationInfo {
                id: conversation_id,
                display_name: Some(format!("Chat {conversation_id}")),
                ..ConversationInfo::default()
            }))
        }

        fn conversations(&self, ids: &[i64]) -> Result<Vec<ConversationInfo>, CoreError> {
            ids.iter().filter_map(|id| self.conversation(*id).transpose()).collect()
        }

        fn sender_label(&self, handle: &str) -> String {
            handle.to_string()
        }

        fn conversation_label(&self, info: &ConversationInfo) -> String {
            info.display_name.clone().unwrap_or_default()
        }

        fn attachment(&self, _id: i64) -> Result<Option<Attachment>, CoreError> {
            Ok(None)
        }
    }

    // Seconds since 2001-01-01 for March 15, 00:00 UTC, of 2001 + `years_after`.
    // Only valid when that year is not itself a leap year.
    fn march_15(years_after: i64) -> i64 {
        let leap_days = (0..years_after).filter(|y| (2001 + y) % 4 == 0).count() as i64;
        years_after * YEAR + leap_days * 86_400 + 73 * 86_400
    }

    fn message(id: i64, conversation_id: i64, timestamp: i64, text: &str) -> RawMessage {
        RawMessage {
            id,
            guid: format!("g{id}"),
            conversation_id,
            timestamp,
            text: Some(text.to_string()),
            ..RawMessage::default()
        }
    }

    fn matcher() -> DayMatcher {
        DayMatcher::new(3, 15, CalendarZone::utc()).expect("matcher")
    }

    #[test]
    fn orders_by_latest_message_and_collects_years() {
        let store = FakeStore {
            messages: vec![
                message(1, 7, march_15(14), "old"),
                message(2, 7, march_15(18), "newer"),
                message(3, 9, march_15(14) + 60, "only"),
            ],
        };
        let summaries = list_conversations(&store, &matcher(), &SummaryOptions::default()).expect("list");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].conversation_id, 7);
        assert_eq!(summaries[0].years, vec![2019, 2015]);
        assert_eq!(summaries[0].message_count, 2);
        assert_eq!(summaries[0].preview, "newer");
        assert_eq!(summaries[1].conversation_id, 9);
        assert_eq!(summaries[1].display_name, "Chat 9");
    }

    #[test]
    fn reaction_carriers_do_not_count() {
        let mut carrier = message(2, 7, march_15(20), "Loved \"old\"");
        carrier.associated_guid = Some("p:0/g1".to_string());
        carrier.associated_type = Some(2000);
        let store = FakeStore {
            messages: vec![message(1, 7, march_15(14), "old"), carrier.clone()],
        };
        let summaries = list_conversations(&store, &matcher(), &SummaryOptions::default()).expect("list");
        assert_eq!(summaries[0].message_count, 1);
        assert_eq!(summaries[0].years, vec![2015]);
        assert_eq!(summaries[0].preview, "old");

        let only_carriers = FakeStore {
            messages: vec![carrier],
        };
        assert!(list_conversations(&only_carriers, &matcher(), &SummaryOptions::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn preview_is_truncated_by_characters() {
        let store = FakeStore {
            messages: vec![message(1, 1, march_15(10), "héllo wörld")],
        };
        let options = SummaryOptions { preview_chars: 5 };
        let summaries = list_conversations(&store, &matcher(), &options).expect("list");
        assert_eq!(summaries[0].preview, "héllo");
    }

    #[test]
    fn text_resolution_falls_back_through_body() {
        let mut raw = message(1, 1, 1, "");
        raw.text = None;
        raw.attributed_body = Some(encode_plain("from body"));
        assert_eq!(resolve_text(&raw).text, "from body");

        let mut broken = encode_plain("salvaged");
        broken.truncate(broken.len() - 1);
        raw.attributed_body = Some(broken);
        assert_eq!(resolve_text(&raw).text, "salvaged");

        raw.attributed_body = Some(vec![0xFF, 0x00]);
        assert_eq!(resolve_text(&raw).text, "");

        raw.text = Some("plain wins".to_string());
        assert_eq!(resolve_text(&raw).text, "plain wins");
    }

    #[test]
    fn plain_text_wins_and_borrows_matching_ranges() {
        let mut raw = message(1, 1, 1, "hi @Kim");
        raw.attributed_body = Some(encode_rich_text(&RichText {
            text: "hi @Kim".to_string(),
            ranges: vec![TextRange {
                start: 3,
                end: 7,
                kind: RangeKind::Mention,
                value: Some("kim@example.com".to_string()),
            }],
        }));
        let resolved = resolve_text(&raw);
        assert_eq!(resolved.text, "hi @Kim");
        assert_eq!(resolved.ranges.len(), 1);

        raw.attributed_body = Some(encode_plain("an older edit"));
        let resolved = resolve_text(&raw);
        assert_eq!(resolved.text, "hi @Kim");
        assert!(resolved.ranges.is_empty());

        raw.attributed_body = Some(b"streamtyped but broken".to_vec());
        assert_eq!(resolve_text(&raw).text, "hi @Kim");
    }
}
