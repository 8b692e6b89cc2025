use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::conversations::resolve_text;
use crate::day::{to_iso, DayMatcher};
use crate::error::CoreError;
use crate::models::{
    Attachment, AttachmentKind, AttachmentLocation, ConversationDay, ResolvedMessage, YearGroup,
};
use crate::reactions::resolve;
use crate::store::{StoreReader, OWN_SENDER_LABEL};

const IMAGE_EXTENSIONS: &[&str] = &["heic", "heif", "jpg", "jpeg", "png", "gif", "tif", "tiff", "bmp", "webp"];
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "m4v", "avi", "3gp", "webm"];
const AUDIO_EXTENSIONS: &[&str] = &["caf", "m4a", "mp3", "amr", "wav", "aac", "aiff", "opus"];

/// Kind from the MIME type when it names image/video/audio, otherwise from
/// the file extension.
pub fn classify_attachment(mime_type: Option<&str>, name: Option<&str>) -> AttachmentKind {
    if let Some(mime) = mime_type.map(str::to_ascii_lowercase) {
        if mime.starts_with("image/") {
            return AttachmentKind::Image;
        } else if mime.starts_with("video/") {
            return AttachmentKind::Video;
        } else if mime.starts_with("audio/") {
            return AttachmentKind::Audio;
        }
    }
    let extension = name
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        AttachmentKind::Image
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        AttachmentKind::Video
    } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        AttachmentKind::Audio
    } else {
        AttachmentKind::Other
    }
}

fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => format!("{}{}", home.display(), rest),
        _ => path.to_string(),
    }
}

/// On-disk location of an attachment, with `~` expanded and percent escapes decoded.
pub fn attachment_location<S: StoreReader + ?Sized>(
    store: &S,
    attachment_id: i64,
) -> Result<AttachmentLocation, CoreError> {
    let attachment = store
        .attachment(attachment_id)?
        .ok_or_else(|| CoreError::NotFound(format!("attachment {attachment_id}")))?;
    let path = attachment
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| CoreError::NotFound(format!("attachment {attachment_id} has no file")))?;
    Ok(AttachmentLocation {
        path: expand_home(&percent_decode(&path)),
        mime_type: attachment.mime_type,
    })
}

/// Messages of one conversation on the matcher's day, grouped by year
/// (oldest first) with their attachments and standing reactions.
pub fn assemble<S: StoreReader + ?Sized>(
    store: &S,
    conversation_id: i64,
    matcher: &DayMatcher,
) -> Result<Vec<YearGroup>, CoreError> {
    if store.conversation(conversation_id)?.is_none() {
        return Err(CoreError::NotFound(format!("conversation {conversation_id}")));
    }
    year_groups(store, conversation_id, matcher)
}

pub fn conversation_day<S: StoreReader + ?Sized>(
    store: &S,
    conversation_id: i64,
    matcher: &DayMatcher,
) -> Result<ConversationDay, CoreError> {
    let info = store
        .conversation(conversation_id)?
        .ok_or_else(|| CoreError::NotFound(format!("conversation {conversation_id}")))?;
    let year_groups = year_groups(store, conversation_id, matcher)?;
    Ok(ConversationDay {
        conversation_id,
        display_name: store.conversation_label(&info),
        handles: info.handles,
        is_group: info.is_group,
        year_groups,
    })
}

fn year_groups<S: StoreReader + ?Sized>(
    store: &S,
    conversation_id: i64,
    matcher: &DayMatcher,
) -> Result<Vec<YearGroup>, CoreError> {
    let rows: Vec<_> = store
        .messages_for_day_in_conversation(conversation_id, matcher)?
        .into_iter()
        .filter(|m| !m.is_reaction_carrier() && matcher.matches(m.timestamp))
        .collect();

    let guids: Vec<String> = rows.iter().map(|m| m.guid.clone()).collect();
    let mut reactions = resolve(store.reactions_for_messages(&guids)?);

    let ids: Vec<i64> = rows.iter().map(|m| m.id).collect();
    let mut attachments: HashMap<i64, Vec<Attachment>> = HashMap::new();
    for attachment in store.attachments_for_messages(&ids)? {
        attachments.entry(attachment.message_id).or_default().push(attachment);
    }

    let mut by_year: BTreeMap<i32, Vec<ResolvedMessage>> = BTreeMap::new();
    for raw in rows {
        let Some(year) = matcher.year_of(raw.timestamp) else {
            continue;
        };
        let rich = resolve_text(&raw);
        let message_attachments = attachments.remove(&raw.id).unwrap_or_default();
        if rich.text.trim().is_empty() && message_attachments.is_empty() {
            debug!(id = raw.id, "dropping message with no text or attachments");
            continue;
        }
        let sender = if raw.is_from_me {
            Some(OWN_SENDER_LABEL.to_string())
        } else {
            raw.handle.as_deref().map(|h| store.sender_label(h))
        };
        by_year.entry(year).or_default().push(ResolvedMessage {
            id: raw.id,
            date: to_iso(raw.timestamp, matcher.zone()),
            date_read: raw.date_read.and_then(|d| to_iso(d, matcher.zone())),
            timestamp: raw.timestamp,
            year,
            is_from_me: raw.is_from_me,
            text: rich.text,
            ranges: rich.ranges,
            sender,
            reactions: reactions.remove(&raw.guid).unwrap_or_default(),
            guid: raw.guid,
            handle: raw.handle,
            reply_to_guid: raw.reply_to_guid,
            attachments: message_attachments,
        });
    }

    Ok(by_year
        .into_iter()
        .map(|(year, mut messages)| {
            messages.sort_by_key(|m| (m.timestamp, m.id));
            YearGroup { year, messages }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_prefix_wins_then_extension() {
        assert_eq!(classify_attachment(Some("image/heic"), Some("x.bin")), AttachmentKind::Image);
        assert_eq!(classify_attachment(Some("video/quicktime"), None), AttachmentKind::Video);
        assert_eq!(classify_attachment(None, Some("Voice.CAF")), AttachmentKind::Audio);
        assert_eq!(classify_attachment(Some("application/octet-stream"), Some("clip.m4v")), AttachmentKind::Video);
        assert_eq!(classify_attachment(Some("application/pdf"), Some("doc.pdf")), AttachmentKind::Other);
        assert_eq!(classify_attachment(None, None), AttachmentKind::Other);
    }

    #[test]
    fn percent_escapes_decode() {
        assert_eq!(percent_decode("My%20Photo.jpg"), "My Photo.jpg");
        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("IMG%201.JPG%41"), "IMG 1.JPGA");
        assert_eq!(percent_decode("bad%FF.jpg"), "bad\u{FFFD}.jpg");
    }

    #[test]
    fn home_prefix_expands() {
        let expanded = expand_home("~/Library/Messages/a.png");
        assert!(expanded.ends_with("/Library/Messages/a.png"));
        assert!(!expanded.starts_with('~') || dirs::home_dir().is_none());
        assert_eq!(expand_home("/abs/path"), "/abs/path");
    }
}
