//! Produces `typedstream` archives in the shape Messages writes them, for the
//! demo store and fixtures.

use std::collections::HashMap;

use super::stream::{LABEL_BIAS, TAG_END, TAG_INT16, TAG_INT32, TAG_NEW, TAG_NIL};
use super::{KEY_BREADCRUMB, KEY_LINK, KEY_MENTION};
use crate::models::{RangeKind, RichText};

const KEY_MESSAGE_PART: &str = "__kIMMessagePartAttributeName";

const STRING_CHAIN: &[(&str, i64)] = &[("NSString", 1), ("NSObject", 0)];
const ATTRIBUTED_CHAIN: &[(&str, i64)] = &[("NSAttributedString", 0), ("NSObject", 0)];
const DICTIONARY_CHAIN: &[(&str, i64)] = &[("NSDictionary", 0), ("NSObject", 0)];
const NUMBER_CHAIN: &[(&str, i64)] = &[("NSNumber", 0), ("NSValue", 0), ("NSObject", 0)];
const URL_CHAIN: &[(&str, i64)] = &[("NSURL", 0), ("NSObject", 0)];

pub struct ArchiveWriter {
    out: Vec<u8>,
    strings: HashMap<Vec<u8>, usize>,
    classes: HashMap<String, usize>,
    table_len: usize,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        let mut writer = ArchiveWriter {
            out: Vec::new(),
            strings: HashMap::new(),
            classes: HashMap::new(),
            table_len: 0,
        };
        writer.out.push(4);
        writer.out.push(11);
        writer.out.extend_from_slice(b"streamtyped");
        writer.int(1000);
        writer
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    pub fn int(&mut self, value: i64) {
        if (-LABEL_BIAS..=127).contains(&value) {
            self.out.push(value as i8 as u8);
        } else if let Ok(short) = i16::try_from(value) {
            self.out.push(TAG_INT16);
            self.out.extend_from_slice(&short.to_le_bytes());
        } else {
            self.out.push(TAG_INT32);
            self.out.extend_from_slice(&(value as i32).to_le_bytes());
        }
    }

    fn reference(&mut self, idx: usize) {
        self.int(idx as i64 - LABEL_BIAS);
    }

    fn shared_string(&mut self, bytes: &[u8]) {
        if let Some(idx) = self.strings.get(bytes).copied() {
            self.reference(idx);
            return;
        }
        self.out.push(TAG_NEW);
        self.int(bytes.len() as i64);
        self.out.extend_from_slice(bytes);
        let idx = self.strings.len();
        self.strings.insert(bytes.to_vec(), idx);
    }

    fn class(&mut self, chain: &[(&str, i64)]) {
        let Some(((name, version), rest)) = chain.split_first() else {
            self.out.push(TAG_NIL);
            return;
        };
        if let Some(idx) = self.classes.get(*name).copied() {
            self.reference(idx);
            return;
        }
        self.out.push(TAG_NEW);
        let slot = self.table_len;
        self.table_len += 1;
        self.classes.insert(name.to_string(), slot);
        self.shared_string(name.as_bytes());
        self.int(*version);
        self.class(rest);
    }

    pub fn group(&mut self, encoding: &str) {
        self.shared_string(encoding.as_bytes());
    }

    pub fn begin_object(&mut self, chain: &[(&str, i64)]) {
        self.out.push(TAG_NEW);
        self.table_len += 1;
        self.class(chain);
    }

    pub fn end_object(&mut self) {
        self.out.push(TAG_END);
    }

    pub fn nil(&mut self) {
        self.out.push(TAG_NIL);
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        self.int(bytes.len() as i64);
        self.out.extend_from_slice(bytes);
    }

    /// Writes a string object; the caller has already opened its `@` group.
    pub fn string_object(&mut self, text: &str) {
        self.begin_object(STRING_CHAIN);
        self.group("+");
        self.bytes(text.as_bytes());
        self.end_object();
    }

    fn number_object(&mut self, value: i64) {
        self.begin_object(NUMBER_CHAIN);
        self.group("i");
        self.int(value);
        self.end_object();
    }

    fn url_object(&mut self, url: &str) {
        self.begin_object(URL_CHAIN);
        self.group("@");
        self.nil();
        self.group("@");
        self.string_object(url);
        self.end_object();
    }

    fn attribute_dictionary(&mut self, attributes: &[(RangeKind, Option<String>)]) {
        self.begin_object(DICTIONARY_CHAIN);
        self.group("i");
        self.int(attributes.len() as i64 + 1);
        self.group("@");
        self.string_object(KEY_MESSAGE_PART);
        self.group("@");
        self.number_object(0);
        for (kind, value) in attributes {
            let key = match kind {
                RangeKind::Mention => KEY_MENTION,
                RangeKind::Link => KEY_LINK,
                RangeKind::Breadcrumb => KEY_BREADCRUMB,
            };
            self.group("@");
            self.string_object(key);
            self.group("@");
            match (kind, value) {
                (_, None) => self.nil(),
                (RangeKind::Link, Some(url)) => self.url_object(url),
                (_, Some(text)) => self.string_object(text),
            }
        }
        self.end_object();
    }
}

/// Archives bare text as a single string object.
pub fn encode_plain(text: &str) -> Vec<u8> {
    let mut writer = ArchiveWriter::new();
    writer.group("@");
    writer.string_object(text);
    writer.finish()
}

/// Archives text with its ranges as an attributed string. Ranges whose
/// offsets do not fall on character boundaries are dropped.
pub fn encode_rich_text(rich: &RichText) -> Vec<u8> {
    let text = rich.text.as_str();
    let ranges: Vec<_> = rich
        .ranges
        .iter()
        .filter(|r| r.start < r.end && r.end <= text.len())
        .filter(|r| text.is_char_boundary(r.start) && text.is_char_boundary(r.end))
        .collect();

    let mut cuts = vec![0, text.len()];
    for range in &ranges {
        cuts.push(range.start);
        cuts.push(range.end);
    }
    cuts.sort_unstable();
    cuts.dedup();

    let mut writer = ArchiveWriter::new();
    writer.group("@");
    writer.begin_object(ATTRIBUTED_CHAIN);
    writer.group("@");
    writer.string_object(text);

    let mut seen: Vec<Vec<(RangeKind, Option<String>)>> = Vec::new();
    for pair in cuts.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        let mut attributes: Vec<_> = ranges
            .iter()
            .filter(|r| r.start <= start && r.end >= end)
            .map(|r| (r.kind, r.value.clone()))
            .collect();
        attributes.sort();
        attributes.dedup();
        let (index, first) = match seen.iter().position(|s| *s == attributes) {
            Some(pos) => (pos + 1, false),
            None => {
                seen.push(attributes.clone());
                (seen.len(), true)
            }
        };
        writer.group("iI");
        writer.int(index as i64);
        writer.int(text[start..end].encode_utf16().count() as i64);
        if first {
            writer.group("@");
            writer.attribute_dictionary(&attributes);
        }
    }
    writer.end_object();
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_archive_starts_with_header() {
        let blob = encode_plain("hi");
        assert_eq!(&blob[..2], &[0x04, 0x0B]);
        assert_eq!(&blob[2..13], b"streamtyped");
        assert_eq!(&blob[13..16], &[0x81, 0xE8, 0x03]);
        assert_eq!(blob.last(), Some(&TAG_END));
    }

    #[test]
    fn ints_pick_the_narrowest_form() {
        let mut writer = ArchiveWriter::new();
        let header_len = writer.out.len();
        writer.int(-110);
        writer.int(-111);
        writer.int(70000);
        assert_eq!(
            &writer.finish()[header_len..],
            &[0x92, 0x81, 0x91, 0xFF, 0x82, 0x70, 0x11, 0x01, 0x00]
        );
    }

    #[test]
    fn repeated_strings_become_references() {
        let mut writer = ArchiveWriter::new();
        let header_len = writer.out.len();
        writer.group("@");
        writer.group("@");
        assert_eq!(&writer.finish()[header_len..], &[0x84, 0x01, b'@', 0x92]);
    }
}
