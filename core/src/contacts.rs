use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::CoreError;

const ADDRESS_BOOK_FILE: &str = "AddressBook-v22.abcddb";
const GROUP_NAME_LIMIT: usize = 4;

/// Phone numbers and e-mail addresses mapped to contact names.
#[derive(Debug, Clone, Default)]
pub struct ContactDirectory {
    names: HashMap<String, String>,
}

fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

fn full_name(first: Option<String>, last: Option<String>) -> Option<String> {
    let name = format!("{} {}", first.unwrap_or_default(), last.unwrap_or_default());
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Address-book databases under `dir`: one per sync source plus the local one.
fn address_book_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(entries) = fs::read_dir(dir.join("Sources")) {
        for entry in entries.filter_map(Result::ok) {
            let candidate = entry.path().join(ADDRESS_BOOK_FILE);
            if candidate.is_file() {
                paths.push(candidate);
            }
        }
    }
    paths.sort();
    let main = dir.join(ADDRESS_BOOK_FILE);
    if main.is_file() {
        paths.push(main);
    }
    paths
}

impl ContactDirectory {
    /// Loads every readable address book under `dir`. Missing or unreadable
    /// databases are skipped; the directory is best effort.
    pub fn load(dir: &Path) -> ContactDirectory {
        let mut directory = ContactDirectory::default();
        for path in address_book_paths(dir) {
            let opened = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            );
            match opened.map_err(CoreError::from).and_then(|conn| directory.load_from(&conn)) {
                Ok(count) => debug!(path = %path.display(), count, "loaded address book"),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping address book"),
            }
        }
        directory
    }

    /// Reads phone and e-mail rows from one address-book database.
    pub fn load_from(&mut self, conn: &Connection) -> Result<usize, CoreError> {
        let before = self.names.len();
        let mut stmt = conn.prepare(
            "SELECT r.ZFIRSTNAME, r.ZLASTNAME, p.ZFULLNUMBER \
             FROM ZABCDRECORD r \
             JOIN ZABCDPHONENUMBER p ON p.ZOWNER = r.Z_PK \
             WHERE p.ZFULLNUMBER IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?))
        })?;
        for (first, last, number) in rows.filter_map(Result::ok) {
            if let Some(name) = full_name(first, last) {
                self.insert_phone(&number, &name);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT r.ZFIRSTNAME, r.ZLASTNAME, e.ZADDRESS \
             FROM ZABCDRECORD r \
             JOIN ZABCDEMAILADDRESS e ON e.ZOWNER = r.Z_PK \
             WHERE e.ZADDRESS IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?, row.get::<_, String>(2)?))
        })?;
        for (first, last, address) in rows.filter_map(Result::ok) {
            if let Some(name) = full_name(first, last) {
                self.insert_email(&address, &name);
            }
        }
        Ok(self.names.len() - before)
    }

    pub fn insert_phone(&mut self, phone: &str, name: &str) {
        let key = normalize_phone(phone);
        if !key.is_empty() {
            self.names.insert(key, name.to_string());
        }
    }

    pub fn insert_email(&mut self, address: &str, name: &str) {
        self.names.insert(address.trim().to_lowercase(), name.to_string());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Contact name for a handle, or `None` when the handle is unknown.
    pub fn lookup(&self, handle: &str) -> Option<&str> {
        if handle.is_empty() {
            return None;
        }
        let key = if handle.contains('@') {
            handle.to_lowercase()
        } else {
            normalize_phone(handle)
        };
        self.names.get(&key).map(String::as_str)
    }

    /// Contact name for a handle, falling back to the handle itself.
    pub fn resolve_name(&self, handle: &str) -> String {
        self.lookup(handle).unwrap_or(handle).to_string()
    }

    /// Label for a conversation: its own name when it has a real one,
    /// otherwise names built from its participants.
    pub fn resolve_conversation_name(&self, display_name: Option<&str>, handles: &[String], is_group: bool) -> String {
        let display_name = display_name.map(str::trim).filter(|n| !n.is_empty());
        if let Some(name) = display_name.filter(|n| !looks_like_identifier(n)) {
            return name.to_string();
        }
        if handles.is_empty() {
            return match display_name {
                Some(name) => self.resolve_name(name),
                None => "Unknown".to_string(),
            };
        }
        let names: Vec<String> = handles.iter().map(|h| self.resolve_name(h)).collect();
        if !is_group {
            return names[0].clone();
        }
        let mut label = names
            .iter()
            .take(GROUP_NAME_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if names.len() > GROUP_NAME_LIMIT {
            label.push_str("...");
        }
        label
    }
}

/// Phone numbers and `chat123...` identifiers are not names worth showing.
pub fn looks_like_identifier(name: &str) -> bool {
    let stripped = name.trim();
    if stripped.is_empty() || stripped.starts_with('+') {
        return true;
    }
    let compact: String = stripped
        .chars()
        .filter(|c| !matches!(c, '-' | '(' | ')' | ' '))
        .collect();
    if !compact.is_empty() && compact.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    match stripped.strip_prefix("chat") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}
