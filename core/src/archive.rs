//! Decoder for the `typedstream` object archives stored in `message.attributedBody`.
//!
//! An archive is a header followed by typed value groups. Every group starts
//! with a type-encoding string (`@` for an object, `i` for an integer, `+` for
//! a byte string, ...) and is followed by one value per type code. Strings,
//! classes and objects are written once and then referenced by label, so the
//! decoder keeps two tables: shared strings and the class/object table.
//!
//! Objects are self-delimiting (their value groups end with an end-of-object
//! marker), so classes the decoder does not interpret are still consumed in
//! full and never abort decoding.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::models::{RangeKind, RichText, TextRange};

#[path = "archive/stream.rs"]
mod stream;
#[path = "archive/writer.rs"]
pub mod writer;

use stream::{ByteOrder, Reader, Token, TAG_END};

const MAX_DEPTH: usize = 64;
/// Values materialized per input byte, on top of `VALUE_SLACK`. Zero-width
/// codes (`v`, empty structs, nested arrays of them) never consume input, so
/// the count has to be bounded separately.
const VALUES_PER_BYTE: usize = 4;
const VALUE_SLACK: usize = 64;

const SIGNATURE_LE: &[u8] = b"streamtyped";
const SIGNATURE_BE: &[u8] = b"typedstream";

const KEY_MENTION: &str = "__kIMMentionConfirmedMention";
const KEY_LINK: &str = "__kIMLinkAttributeName";
const KEY_BREADCRUMB: &str = "__kIMBreadcrumbTextMarkerAttributeName";

const INTERPRETED_CLASSES: &[&str] = &[
    "NSObject",
    "NSString",
    "NSMutableString",
    "NSAttributedString",
    "NSMutableAttributedString",
    "NSDictionary",
    "NSMutableDictionary",
    "NSURL",
    "NSNumber",
    "NSValue",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at byte {offset}")]
pub struct DecodeError {
    pub offset: usize,
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeErrorKind {
    #[error("unexpected end of input")]
    UnexpectedEnd,
    #[error("unrecognized archive header")]
    BadHeader,
    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported archive format")]
    UnsupportedFormat,
    #[error("unexpected tag 0x{0:02x}")]
    UnexpectedTag(u8),
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("dangling reference {0}")]
    BadReference(i64),
    #[error("malformed type encoding {0:?}")]
    BadTypeEncoding(String),
    #[error("nesting deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("more values than the input can hold")]
    TooManyValues,
    #[error("archive holds no string")]
    MissingText,
}

#[derive(Debug, Clone, PartialEq)]
enum TypeCode {
    Object,
    Class,
    SharedString,
    Char,
    /// `s`/`S`; arrays of these hold UTF-16 text.
    Unichar,
    Int,
    Float,
    Double,
    ByteString,
    Array(usize, Box<TypeCode>),
    Struct(Vec<TypeCode>),
    Void,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Nil,
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Utf16(Vec<u16>),
    Object(Option<usize>),
    Class(Option<usize>),
    List(Vec<Value>),
}

#[derive(Debug)]
enum Slot {
    Pending,
    Class {
        name: String,
        version: i64,
        superclass: Option<usize>,
    },
    Object {
        class: usize,
        values: Vec<Value>,
    },
}

struct Decoder<'a> {
    reader: Reader<'a>,
    strings: Vec<Vec<u8>>,
    table: Vec<Slot>,
    depth: usize,
    values_left: usize,
}

/// Decodes an archive blob into its text and attribute ranges.
pub fn decode(blob: &[u8]) -> Result<RichText, DecodeError> {
    let mut decoder = Decoder::new(blob);
    decoder.header()?;
    let mut roots = Vec::new();
    while !decoder.reader.is_empty() {
        roots.extend(decoder.group()?);
    }
    decoder.log_unhandled_classes();
    decoder.rich_text(&roots).ok_or(DecodeError {
        offset: blob.len(),
        kind: DecodeErrorKind::MissingText,
    })
}

/// Longest salvaged string accepted from a length prefix.
const SALVAGE_MAX_LEN: usize = 100_000;
/// The text-run scan skips the header and the first class names.
const SCAN_START: usize = 50;

/// Best-effort recovery for blobs the decoder rejects. The text following the
/// first string object marker is preferred; without one, the longest run of
/// readable UTF-8 in the blob is taken.
pub fn salvage_text(blob: &[u8]) -> Option<String> {
    let after_marker = [b"NSString".as_slice(), b"NSMutableString".as_slice()]
        .iter()
        .find_map(|marker| find_subsequence(blob, marker).map(|idx| idx + marker.len()))
        .and_then(|marker_end| text_after_marker(blob, marker_end));
    after_marker
        .or_else(|| longest_text_run(blob))
        .map(|text| clean_salvaged(&text))
        .filter(|text| !text.is_empty())
}

fn text_after_marker(blob: &[u8], marker_end: usize) -> Option<String> {
    let window_end = (marker_end + 20).min(blob.len().saturating_sub(2));
    let plus = (marker_end..window_end).find(|&pos| blob[pos] == 0x01 && blob[pos + 1] == b'+')?;
    let (len, skip) = salvage_length(&blob[plus + 2..])?;
    let start = plus + 2 + skip;
    let bytes = blob.get(start..start.checked_add(len)?)?;
    std::str::from_utf8(bytes).ok().map(str::to_string)
}

/// Length prefix in any of the forms seen in stored bodies: a literal byte,
/// `0x81` + little-endian u16, `0x82` + little-endian u32, or `0x84` + a
/// big-endian u32. Returns the length and the prefix size.
fn salvage_length(bytes: &[u8]) -> Option<(usize, usize)> {
    let (len, skip) = match *bytes.first()? {
        byte @ 0x01..=0x7F => (byte as usize, 1),
        0x81 => (u16::from_le_bytes(bytes.get(1..3)?.try_into().ok()?) as usize, 3),
        0x82 => (u32::from_le_bytes(bytes.get(1..5)?.try_into().ok()?) as usize, 5),
        0x84 => (u32::from_be_bytes(bytes.get(1..5)?.try_into().ok()?) as usize, 5),
        _ => return None,
    };
    (len > 0 && len <= SALVAGE_MAX_LEN).then_some((len, skip))
}

/// Width of the readable character starting at `bytes[0]`, if there is one.
fn readable_char_len(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    let width = match first {
        b'\t' | b'\n' | b'\r' | 0x20..=0x7E => return Some(1),
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return None,
    };
    let ch = std::str::from_utf8(bytes.get(..width)?).ok()?.chars().next()?;
    (!ch.is_control()).then_some(width)
}

fn longest_text_run(blob: &[u8]) -> Option<String> {
    let mut best: Option<&str> = None;
    let mut pos = SCAN_START;
    while pos < blob.len() {
        let start = pos;
        while let Some(width) = readable_char_len(&blob[pos..]) {
            pos += width;
        }
        if pos == start {
            pos += 1;
            continue;
        }
        let Ok(run) = std::str::from_utf8(&blob[start..pos]) else {
            continue;
        };
        let run = run.trim();
        if looks_like_text(run) && best.map_or(true, |b| run.chars().count() > b.chars().count()) {
            best = Some(run);
        }
    }
    best.map(str::to_string)
}

/// Rejects runs that are archive plumbing (class names, attribute keys)
/// rather than message text.
fn looks_like_text(run: &str) -> bool {
    if run.is_empty() {
        return false;
    }
    let plumbing = !run.contains(char::is_whitespace)
        && (run.starts_with("NS") || run.starts_with("__kIM") || run == "streamtyped" || run == "typedstream");
    if plumbing {
        return false;
    }
    let total = run.chars().count();
    let printable = run.chars().filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t')).count();
    printable * 2 > total
}

fn clean_salvaged(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{FFFC}' | '\u{0}' | '\u{1}'))
        .collect::<String>()
        .trim()
        .to_string()
}

impl RichText {
    /// Drops attachment placeholders and control characters left in decoded
    /// text, trims surrounding whitespace and shifts ranges to match.
    pub fn display(&self) -> RichText {
        let mut cleaned = String::with_capacity(self.text.len());
        let mut offsets = vec![0usize; self.text.len() + 1];
        for (idx, ch) in self.text.char_indices() {
            offsets[idx] = cleaned.len();
            if !matches!(ch, '\u{FFFC}' | '\u{0}' | '\u{1}') {
                cleaned.push(ch);
            }
        }
        offsets[self.text.len()] = cleaned.len();

        let lead = cleaned.len() - cleaned.trim_start().len();
        let text = cleaned.trim().to_string();
        let remap = |offset: usize| offsets[offset.min(self.text.len())].saturating_sub(lead).min(text.len());

        let ranges = self
            .ranges
            .iter()
            .filter_map(|range| {
                let start = remap(range.start);
                let end = remap(range.end);
                (start < end).then(|| TextRange {
                    start,
                    end,
                    kind: range.kind,
                    value: range.value.clone(),
                })
            })
            .collect();
        RichText { text, ranges }
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

impl<'a> Decoder<'a> {
    fn new(blob: &'a [u8]) -> Self {
        Decoder {
            reader: Reader::new(blob),
            strings: Vec::new(),
            table: Vec::new(),
            depth: 0,
            values_left: blob.len().saturating_mul(VALUES_PER_BYTE).saturating_add(VALUE_SLACK),
        }
    }

    fn header(&mut self) -> Result<(), DecodeError> {
        if self.reader.remaining().starts_with(b"bplist") {
            return Err(self.reader.error(DecodeErrorKind::UnsupportedFormat));
        }
        let version = self.reader.byte()?;
        let sig_start = self.reader.position();
        let sig_len = self.reader.length()?;
        let signature = self.reader.take(sig_len)?;
        let order = if signature == SIGNATURE_LE {
            ByteOrder::Little
        } else if signature == SIGNATURE_BE {
            ByteOrder::Big
        } else {
            return Err(DecodeError {
                offset: sig_start,
                kind: DecodeErrorKind::BadHeader,
            });
        };
        if !(3..=4).contains(&version) {
            return Err(DecodeError {
                offset: 0,
                kind: DecodeErrorKind::UnsupportedVersion(version),
            });
        }
        self.reader.set_order(order);
        let system_version = self.reader.int()?;
        debug!(version, ?order, system_version, "archive header");
        Ok(())
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.reader.error(DecodeErrorKind::TooDeep));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn shared_string(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let start = self.reader.position();
        match self.reader.token()? {
            Token::New => {
                let len = self.reader.length()?;
                let bytes = self.reader.take(len)?.to_vec();
                self.strings.push(bytes.clone());
                Ok(Some(bytes))
            }
            Token::Nil => Ok(None),
            Token::Label(idx) => self.strings.get(idx).cloned().map(Some).ok_or(DecodeError {
                offset: start,
                kind: DecodeErrorKind::BadReference(idx as i64),
            }),
            Token::End => Err(DecodeError {
                offset: start,
                kind: DecodeErrorKind::UnexpectedTag(TAG_END),
            }),
        }
    }

    fn class(&mut self) -> Result<Option<usize>, DecodeError> {
        let start = self.reader.position();
        match self.reader.token()? {
            Token::New => {
                self.enter()?;
                let slot = self.table.len();
                self.table.push(Slot::Pending);
                let name = self.shared_string()?.ok_or(DecodeError {
                    offset: start,
                    kind: DecodeErrorKind::MissingText,
                })?;
                let version = self.reader.int()?;
                let superclass = self.class()?;
                self.table[slot] = Slot::Class {
                    name: String::from_utf8_lossy(&name).into_owned(),
                    version,
                    superclass,
                };
                self.leave();
                Ok(Some(slot))
            }
            Token::Nil => Ok(None),
            Token::Label(idx) => match self.table.get(idx) {
                Some(Slot::Class { .. }) | Some(Slot::Pending) => Ok(Some(idx)),
                _ => Err(DecodeError {
                    offset: start,
                    kind: DecodeErrorKind::BadReference(idx as i64),
                }),
            },
            Token::End => Err(DecodeError {
                offset: start,
                kind: DecodeErrorKind::UnexpectedTag(TAG_END),
            }),
        }
    }

    fn object(&mut self) -> Result<Option<usize>, DecodeError> {
        let start = self.reader.position();
        match self.reader.token()? {
            Token::New => {
                self.enter()?;
                let slot = self.table.len();
                self.table.push(Slot::Pending);
                let class = self.class()?.ok_or(DecodeError {
                    offset: start,
                    kind: DecodeErrorKind::BadReference(-1),
                })?;
                let mut values = Vec::new();
                while self.reader.peek()? != TAG_END {
                    values.extend(self.group()?);
                }
                self.reader.byte()?;
                self.table[slot] = Slot::Object { class, values };
                self.leave();
                Ok(Some(slot))
            }
            Token::Nil => Ok(None),
            Token::Label(idx) if idx < self.table.len() => Ok(Some(idx)),
            Token::Label(idx) => Err(DecodeError {
                offset: start,
                kind: DecodeErrorKind::BadReference(idx as i64),
            }),
            Token::End => Err(DecodeError {
                offset: start,
                kind: DecodeErrorKind::UnexpectedTag(TAG_END),
            }),
        }
    }

    fn group(&mut self) -> Result<Vec<Value>, DecodeError> {
        let start = self.reader.position();
        let encoding = self.shared_string()?.ok_or(DecodeError {
            offset: start,
            kind: DecodeErrorKind::BadTypeEncoding(String::new()),
        })?;
        let types = parse_type_encoding(&encoding).ok_or_else(|| DecodeError {
            offset: start,
            kind: DecodeErrorKind::BadTypeEncoding(String::from_utf8_lossy(&encoding).into_owned()),
        })?;
        types.iter().map(|code| self.value(code)).collect()
    }

    fn value(&mut self, code: &TypeCode) -> Result<Value, DecodeError> {
        match self.values_left.checked_sub(1) {
            Some(left) => self.values_left = left,
            None => return Err(self.reader.error(DecodeErrorKind::TooManyValues)),
        }
        match code {
            TypeCode::Object => Ok(Value::Object(self.object()?)),
            TypeCode::Class => Ok(Value::Class(self.class()?)),
            TypeCode::SharedString => Ok(self.shared_string()?.map(Value::Bytes).unwrap_or(Value::Nil)),
            TypeCode::Char | TypeCode::Unichar | TypeCode::Int => Ok(Value::Int(self.reader.int()?)),
            TypeCode::Float => Ok(Value::Float(self.reader.float(4)?)),
            TypeCode::Double => Ok(Value::Float(self.reader.float(8)?)),
            TypeCode::ByteString => {
                let len = self.reader.length()?;
                Ok(Value::Bytes(self.reader.take(len)?.to_vec()))
            }
            TypeCode::Array(len, _) if *len > self.reader.remaining().len() => {
                Err(self.reader.error(DecodeErrorKind::InvalidLength(*len as i64)))
            }
            TypeCode::Array(len, elem) if **elem == TypeCode::Char => {
                Ok(Value::Bytes(self.reader.take(*len)?.to_vec()))
            }
            TypeCode::Array(len, elem) if **elem == TypeCode::Unichar => {
                let units = (0..*len)
                    .map(|_| self.reader.int().map(|unit| unit as u16))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Utf16(units))
            }
            TypeCode::Array(len, elem) => {
                self.enter()?;
                let items = (0..*len).map(|_| self.value(elem)).collect::<Result<Vec<_>, _>>()?;
                self.leave();
                Ok(Value::List(items))
            }
            TypeCode::Struct(fields) => {
                self.enter()?;
                let items = fields.iter().map(|f| self.value(f)).collect::<Result<Vec<_>, _>>()?;
                self.leave();
                Ok(Value::List(items))
            }
            TypeCode::Void => Ok(Value::Nil),
        }
    }

    fn log_unhandled_classes(&self) {
        for slot in &self.table {
            if let Slot::Class { name, version, .. } = slot {
                if !INTERPRETED_CLASSES.contains(&name.as_str()) {
                    debug!(class = %name, version, "archive class left uninterpreted");
                }
            }
        }
    }

    fn class_chain_has(&self, class: usize, wanted: &str) -> bool {
        let mut current = Some(class);
        let mut hops = 0;
        while let Some(idx) = current {
            match self.table.get(idx) {
                Some(Slot::Class { name, superclass, .. }) => {
                    if name == wanted {
                        return true;
                    }
                    current = *superclass;
                }
                _ => return false,
            }
            hops += 1;
            if hops > MAX_DEPTH {
                return false;
            }
        }
        false
    }

    fn object_of(&self, idx: usize) -> Option<(usize, &[Value])> {
        match self.table.get(idx) {
            Some(Slot::Object { class, values }) => Some((*class, values.as_slice())),
            _ => None,
        }
    }

    fn is_a(&self, idx: usize, wanted: &str) -> bool {
        self.object_of(idx)
            .map(|(class, _)| self.class_chain_has(class, wanted))
            .unwrap_or(false)
    }

    fn string_of(&self, idx: usize, hops: usize) -> Option<String> {
        if hops > 8 {
            return None;
        }
        let (class, values) = self.object_of(idx)?;
        if self.class_chain_has(class, "NSString") {
            return values.iter().find_map(|v| match v {
                Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                Value::Utf16(units) => Some(String::from_utf16_lossy(units)),
                _ => None,
            });
        }
        if self.class_chain_has(class, "NSNumber") {
            return values.iter().find_map(|v| match v {
                Value::Int(n) => Some(n.to_string()),
                Value::Float(f) => Some(f.to_string()),
                _ => None,
            });
        }
        values.iter().find_map(|v| match v {
            Value::Object(Some(inner)) => self.string_of(*inner, hops + 1),
            _ => None,
        })
    }

    fn dictionary_entries(&self, idx: usize) -> Vec<(String, Option<usize>)> {
        let Some((_, values)) = self.object_of(idx) else {
            return Vec::new();
        };
        let objects: Vec<Option<usize>> = values
            .iter()
            .filter_map(|v| match v {
                Value::Object(obj) => Some(*obj),
                _ => None,
            })
            .collect();
        objects
            .chunks(2)
            .filter_map(|pair| match pair {
                [Some(key), value] => self.string_of(*key, 0).map(|k| (k, *value)),
                _ => None,
            })
            .collect()
    }

    fn find_first(&self, roots: &[Value], wanted: &str) -> Option<usize> {
        let from_roots = roots.iter().find_map(|v| match v {
            Value::Object(Some(idx)) if self.is_a(*idx, wanted) => Some(*idx),
            _ => None,
        });
        from_roots.or_else(|| (0..self.table.len()).find(|idx| self.is_a(*idx, wanted)))
    }

    fn rich_text(&self, roots: &[Value]) -> Option<RichText> {
        if let Some(idx) = self.find_first(roots, "NSAttributedString") {
            return Some(self.attributed(idx));
        }
        let idx = self.find_first(roots, "NSString")?;
        Some(RichText {
            text: self.string_of(idx, 0)?,
            ranges: Vec::new(),
        })
    }

    fn attributed(&self, idx: usize) -> RichText {
        let values = self.object_of(idx).map(|(_, v)| v).unwrap_or(&[]);
        let mut iter = values.iter().peekable();
        let text = loop {
            match iter.next() {
                Some(Value::Object(Some(inner))) => break self.string_of(*inner, 0).unwrap_or_default(),
                Some(_) => continue,
                None => break String::new(),
            }
        };

        let mut runs: Vec<(i64, usize)> = Vec::new();
        let mut dictionaries: HashMap<i64, usize> = HashMap::new();
        while let Some(value) = iter.next() {
            let (Value::Int(attr), Some(Value::Int(len))) = (value, iter.next()) else {
                debug!("attributed string run table ended early");
                break;
            };
            if let Some(Value::Object(obj)) = iter.peek() {
                if let Some(dict) = obj {
                    dictionaries.entry(*attr).or_insert(*dict);
                }
                iter.next();
            }
            runs.push((*attr, (*len).max(0) as usize));
        }

        let mut ranges = Vec::new();
        let mut position = 0usize;
        for (attr, len) in runs {
            let start = utf16_to_byte(&text, position);
            position = position.saturating_add(len);
            let end = utf16_to_byte(&text, position);
            let Some(dict) = dictionaries.get(&attr) else {
                continue;
            };
            for (key, value) in self.dictionary_entries(*dict) {
                let kind = match key.as_str() {
                    KEY_MENTION => RangeKind::Mention,
                    KEY_LINK => RangeKind::Link,
                    KEY_BREADCRUMB => RangeKind::Breadcrumb,
                    _ => continue,
                };
                if start >= end {
                    continue;
                }
                let value = value.and_then(|v| self.string_of(v, 0));
                push_range(&mut ranges, TextRange { start, end, kind, value });
            }
        }
        ranges.sort_by(|a, b| (a.start, a.kind).cmp(&(b.start, b.kind)));
        RichText { text, ranges }
    }
}

fn push_range(ranges: &mut Vec<TextRange>, range: TextRange) {
    if let Some(existing) = ranges
        .iter_mut()
        .find(|r| r.kind == range.kind && r.value == range.value && r.end == range.start)
    {
        existing.end = range.end;
        return;
    }
    ranges.push(range);
}

/// Converts a UTF-16 code unit offset into a byte offset, clamped to the text.
fn utf16_to_byte(text: &str, units: usize) -> usize {
    let mut seen = 0usize;
    for (byte_idx, ch) in text.char_indices() {
        if seen >= units {
            return byte_idx;
        }
        seen += ch.len_utf16();
    }
    text.len()
}

fn parse_type_encoding(encoding: &[u8]) -> Option<Vec<TypeCode>> {
    let mut pos = 0;
    let mut types = Vec::new();
    while pos < encoding.len() {
        types.push(parse_one(encoding, &mut pos, 0)?);
    }
    if types.is_empty() {
        return None;
    }
    Some(types)
}

fn parse_one(encoding: &[u8], pos: &mut usize, depth: usize) -> Option<TypeCode> {
    if depth > MAX_DEPTH {
        return None;
    }
    while matches!(encoding.get(*pos), Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V')) {
        *pos += 1;
    }
    let code = *encoding.get(*pos)?;
    *pos += 1;
    let parsed = match code {
        b'@' => TypeCode::Object,
        b'#' => TypeCode::Class,
        b':' | b'*' | b'%' => TypeCode::SharedString,
        b'c' | b'C' => TypeCode::Char,
        b's' | b'S' => TypeCode::Unichar,
        b'i' | b'I' | b'l' | b'L' | b'q' | b'Q' | b'B' => TypeCode::Int,
        b'f' => TypeCode::Float,
        b'd' => TypeCode::Double,
        b'+' => TypeCode::ByteString,
        b'v' => TypeCode::Void,
        b'[' => {
            let digits_start = *pos;
            while encoding.get(*pos).is_some_and(u8::is_ascii_digit) {
                *pos += 1;
            }
            let len: usize = std::str::from_utf8(&encoding[digits_start..*pos]).ok()?.parse().ok()?;
            let elem = parse_one(encoding, pos, depth + 1)?;
            if encoding.get(*pos) != Some(&b']') {
                return None;
            }
            *pos += 1;
            TypeCode::Array(len, Box::new(elem))
        }
        b'{' => {
            while !matches!(encoding.get(*pos), Some(b'=') | Some(b'}')) {
                encoding.get(*pos)?;
                *pos += 1;
            }
            let mut fields = Vec::new();
            if encoding.get(*pos) == Some(&b'=') {
                *pos += 1;
                while encoding.get(*pos) != Some(&b'}') {
                    fields.push(parse_one(encoding, pos, depth + 1)?);
                }
            }
            *pos += 1;
            TypeCode::Struct(fields)
        }
        _ => return None,
    };
    Some(parsed)
}
