use std::collections::HashMap;

use tracing::debug;

use crate::models::{Polarity, RawMessage, Reaction, ReactionKind};

const ADD_BASE: i64 = 2000;
const REMOVE_BASE: i64 = 3000;

impl ReactionKind {
    /// Maps an `associated_message_type` to its reaction kind. Emoji and
    /// sticker tapbacks (2006+/3006+) have no kind and return `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        let offset = match code {
            ADD_BASE..=2005 => code - ADD_BASE,
            REMOVE_BASE..=3005 => code - REMOVE_BASE,
            _ => return None,
        };
        Some(match offset {
            0 => ReactionKind::Loved,
            1 => ReactionKind::Liked,
            2 => ReactionKind::Disliked,
            3 => ReactionKind::Laughed,
            4 => ReactionKind::Emphasized,
            _ => ReactionKind::Questioned,
        })
    }

    pub fn emoji(self) -> &'static str {
        match self {
            ReactionKind::Loved => "❤️",
            ReactionKind::Liked => "👍",
            ReactionKind::Disliked => "👎",
            ReactionKind::Laughed => "😂",
            ReactionKind::Emphasized => "‼️",
            ReactionKind::Questioned => "❓",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            ReactionKind::Loved => "loved",
            ReactionKind::Liked => "liked",
            ReactionKind::Disliked => "disliked",
            ReactionKind::Laughed => "laughed at",
            ReactionKind::Emphasized => "emphasized",
            ReactionKind::Questioned => "questioned",
        }
    }
}

impl Polarity {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            ADD_BASE..=2005 => Some(Polarity::Add),
            REMOVE_BASE..=3005 => Some(Polarity::Remove),
            _ => None,
        }
    }
}

/// Strips the part prefix (`p:0/`) or bubble prefix (`bp:`) from an
/// associated guid so it can be compared with `message.guid`.
pub fn normalize_target(guid: &str) -> &str {
    if guid.starts_with("p:") {
        if let Some(idx) = guid.rfind('/') {
            return &guid[idx + 1..];
        }
    }
    guid.strip_prefix("bp:").unwrap_or(guid)
}

/// Builds a reaction event from a carrier row, or `None` for rows that do not
/// carry one of the six classic tapbacks.
pub fn reaction_from_row(row: &RawMessage) -> Option<Reaction> {
    let code = row.associated_type?;
    let target = row.associated_guid.as_deref()?;
    let (Some(kind), Some(polarity)) = (ReactionKind::from_code(code), Polarity::from_code(code)) else {
        debug!(code, guid = %row.guid, "skipping unsupported reaction code");
        return None;
    };
    Some(Reaction {
        target: normalize_target(target).to_string(),
        kind,
        polarity,
        sender: if row.is_from_me { None } else { row.handle.clone() },
        timestamp: row.timestamp,
    })
}

struct Group {
    first_seen: i64,
    latest: Reaction,
}

/// Folds add/remove events into the reactions currently standing on each
/// target. For every (target, sender, kind) the latest event wins, with later
/// input position breaking timestamp ties; only standing adds are returned.
pub fn resolve(events: impl IntoIterator<Item = Reaction>) -> HashMap<String, Vec<Reaction>> {
    let mut groups: HashMap<(String, Option<String>, ReactionKind), Group> = HashMap::new();
    for event in events {
        let key = (event.target.clone(), event.sender.clone(), event.kind);
        match groups.get_mut(&key) {
            Some(group) => {
                group.first_seen = group.first_seen.min(event.timestamp);
                if event.timestamp >= group.latest.timestamp {
                    group.latest = event;
                }
            }
            None => {
                groups.insert(
                    key,
                    Group {
                        first_seen: event.timestamp,
                        latest: event,
                    },
                );
            }
        }
    }

    let mut standing: HashMap<String, Vec<(i64, Reaction)>> = HashMap::new();
    for group in groups.into_values() {
        if group.latest.polarity == Polarity::Add {
            standing
                .entry(group.latest.target.clone())
                .or_default()
                .push((group.first_seen, group.latest));
        }
    }

    standing
        .into_iter()
        .map(|(target, mut list)| {
            list.sort_by(|(a_first, a), (b_first, b)| {
                (a_first, &a.sender, a.kind).cmp(&(b_first, &b.sender, b.kind))
            });
            (target, list.into_iter().map(|(_, reaction)| reaction).collect())
        })
        .collect()
}
