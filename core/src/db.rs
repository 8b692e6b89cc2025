use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::CoreError;

pub struct StoreDb {
    pub path: PathBuf,
    pub conn: Connection,
}

/// Opens the message store read-only. The path is taken literally, never as
/// an SQLite URI. Every failure to reach a usable database (missing file, no
/// permission, not SQLite) is `StoreUnavailable`.
pub fn open_store(path: impl AsRef<Path>) -> Result<StoreDb, CoreError> {
    let path = path.as_ref().to_path_buf();
    if !path.is_file() {
        return Err(CoreError::StoreUnavailable(format!("{} does not exist", path.display())));
    }
    let unavailable = |err: rusqlite::Error| CoreError::StoreUnavailable(format!("{}: {err}", path.display()));
    let conn = Connection::open_with_flags(
        &path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(unavailable)?;
    conn.busy_timeout(Duration::from_secs(5)).map_err(unavailable)?;
    // Opening is lazy; touch the schema so permission and format errors surface here.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master;", [], |row| row.get::<_, i64>(0))
        .map_err(unavailable)?;
    Ok(StoreDb { path, conn })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_and_corrupt_files_are_unavailable() {
        let dir = tempdir().expect("temp");
        let missing = dir.path().join("chat.db");
        assert!(matches!(open_store(&missing), Err(CoreError::StoreUnavailable(_))));

        std::fs::write(&missing, vec![0x42u8; 4096]).expect("write");
        assert!(matches!(open_store(&missing), Err(CoreError::StoreUnavailable(_))));
    }

    #[test]
    fn opened_store_rejects_writes() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("chat.db");
        Connection::open(&path)
            .and_then(|conn| conn.execute_batch("CREATE TABLE message (ROWID INTEGER PRIMARY KEY);"))
            .expect("create");
        let store = open_store(&path).expect("open");
        assert!(store.conn.execute("INSERT INTO message DEFAULT VALUES", []).is_err());
    }

    #[test]
    fn query_characters_in_the_path_are_literal() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("chat?mode=rwc#1.db");
        Connection::open(&path)
            .and_then(|conn| conn.execute_batch("CREATE TABLE message (ROWID INTEGER PRIMARY KEY);"))
            .expect("create");
        let store = open_store(&path).expect("open");
        assert_eq!(store.path, path);
        assert!(store.conn.execute("INSERT INTO message DEFAULT VALUES", []).is_err());
    }
}
