use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::warn;

const MAX_LOG_BYTES: u64 = 1_500_000;
const LOG_FILE: &str = "diagnostics.log";
const REDACTED: &str = "[redacted]";

#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub ts: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub message: String,
}

impl LogEvent {
    pub fn new(kind: &str, operation: Option<&str>, message: &str) -> Self {
        LogEvent {
            ts: Utc::now().to_rfc3339(),
            kind: kind.to_string(),
            operation: operation.map(str::to_string),
            message: sanitize(message),
        }
    }
}

fn is_private_token(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| matches!(c, '"' | '\'' | '(' | ')' | ',' | ':'));
    if ["/Users/", "/home/", "/private/", "~/", "C:\\Users\\"]
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
    {
        return true;
    }
    if trimmed.chars().filter(char::is_ascii_digit).count() >= 10 {
        return true;
    }
    match trimmed.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

/// Strips what could identify the user or their contacts: home paths, long
/// digit runs (phone numbers) and e-mail addresses.
pub fn sanitize(input: &str) -> String {
    input
        .split_whitespace()
        .map(|token| if is_private_token(token) { REDACTED } else { token })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Append-only JSON-lines file, kept under `MAX_LOG_BYTES`.
pub struct DiagnosticsLog {
    path: PathBuf,
}

impl DiagnosticsLog {
    pub fn open(log_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        Ok(DiagnosticsLog {
            path: log_dir.join(LOG_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &LogEvent) -> io::Result<()> {
        self.trim()?;
        let line = serde_json::to_string(event).map_err(io::Error::from)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }

    fn trim(&self) -> io::Result<()> {
        let len = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        };
        if len <= MAX_LOG_BYTES {
            return Ok(());
        }
        let data = fs::read(&self.path)?;
        let tail = data.len().saturating_sub((MAX_LOG_BYTES / 2) as usize);
        // Resume at a line boundary so every kept line is still valid JSON.
        let keep_from = data[tail..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(data.len(), |newline| tail + newline + 1);
        fs::write(&self.path, &data[keep_from..])
    }
}

pub fn log_event(log_dir: &Path, kind: &str, message: &str) -> io::Result<()> {
    DiagnosticsLog::open(log_dir)?.append(&LogEvent::new(kind, None, message))
}

/// Records a failed store operation. Failing to write the log is itself only
/// reported through `tracing`.
pub fn record_error(log_dir: Option<&Path>, operation: &str, err: &dyn Display) {
    let Some(log_dir) = log_dir else {
        return;
    };
    let event = LogEvent::new("query_error", Some(operation), &err.to_string());
    if let Err(io_err) = DiagnosticsLog::open(log_dir).and_then(|log| log.append(&event)) {
        warn!(error = %io_err, operation, "could not write diagnostics log");
    }
}
