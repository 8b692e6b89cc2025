pub mod archive;
pub mod config;
pub mod contacts;
pub mod conversations;
pub mod day;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod query;
pub mod reactions;
pub mod schema;
pub mod seed;
pub mod store;
pub mod timeline;

pub use archive::{decode, salvage_text, DecodeError, DecodeErrorKind};
pub use config::Config;
pub use contacts::ContactDirectory;
pub use conversations::{list_conversations, SummaryOptions};
pub use day::{CalendarZone, DayMatcher};
pub use db::{open_store, StoreDb};
pub use error::CoreError;
pub use store::{ChatStore, StoreReader};
pub use timeline::{assemble, attachment_location, conversation_day};
