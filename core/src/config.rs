use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::day::CalendarZone;
use crate::error::CoreError;

pub const ENV_STORE: &str = "ON_THIS_DAY_STORE";
pub const ENV_TIMEZONE: &str = "ON_THIS_DAY_TZ";
pub const ENV_LOG_DIR: &str = "ON_THIS_DAY_LOG_DIR";

const DEFAULT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_path: PathBuf,
    pub address_book_dir: Option<PathBuf>,
    pub timezone: String,
    pub preview_chars: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_default();
        Config {
            store_path: home.join("Library").join("Messages").join("chat.db"),
            address_book_dir: Some(home.join("Library").join("Application Support").join("AddressBook")),
            timezone: "local".to_string(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            log_dir: dirs::data_local_dir().map(|dir| dir.join("on-this-day")),
        }
    }
}

impl Config {
    /// Defaults, overlaid by the JSON file at `path` when given, then by the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Config, CoreError> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, CoreError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| CoreError::Config(format!("cannot read {}: {err}", path.display())))?;
        serde_json::from_str(&raw).map_err(|err| CoreError::Config(format!("invalid {}: {err}", path.display())))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(store) = lookup(ENV_STORE).filter(|v| !v.is_empty()) {
            self.store_path = PathBuf::from(store);
        }
        if let Some(tz) = lookup(ENV_TIMEZONE).filter(|v| !v.is_empty()) {
            self.timezone = tz;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            self.log_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.preview_chars == 0 {
            return Err(CoreError::Config("preview_chars must be positive".to_string()));
        }
        self.zone().map(|_| ())
    }

    pub fn zone(&self) -> Result<CalendarZone, CoreError> {
        CalendarZone::parse(&self.timezone)
    }
}
