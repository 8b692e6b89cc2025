use thiserror::Error;

use crate::archive::DecodeError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("message store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("archive decode failed: {0}")]
    Decode(#[from] DecodeError),
}
