use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use on_this_day_core::models::TextRange;
use on_this_day_core::seed::seed_demo_file;
use on_this_day_core::{
    attachment_location, conversation_day, decode, diagnostics, list_conversations, salvage_text, CalendarZone,
    ChatStore, Config, ContactDirectory, CoreError, DayMatcher, SummaryOptions,
};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "on_this_day")]
#[command(about = "Browse chat history for this calendar day across the years", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Message store to read (overrides config and ON_THIS_DAY_STORE)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Calendar zone: `local` or an offset such as `+02:00`
    #[arg(long, global = true)]
    tz: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Conversations with activity on the day in any year
    Conversations(DayArgs),
    /// Messages of one conversation on the day, grouped by year
    Messages {
        id: i64,
        #[command(flatten)]
        day: DayArgs,
    },
    /// Resolve an attachment id to its file on disk
    Attachment { id: i64 },
    /// Decode an attributed-body blob from a file, or `-` for stdin (raw or hex)
    Decode { input: String },
    /// Write a demo store to `path`
    Seed {
        path: PathBuf,
        #[command(flatten)]
        day: DayArgs,
    },
}

#[derive(Args, Debug, Clone, Copy, Default)]
struct DayArgs {
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
    month: Option<u32>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=31))]
    day: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DecodeOutput {
    text: String,
    ranges: Vec<TextRange>,
    salvaged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SeedOutput {
    path: String,
    rows: usize,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    match run(&cli, &config) {
        Ok(value) => match print_json(&value) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err}");
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            diagnostics::record_error(config.log_dir.as_deref(), command_name(&cli.command), &err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, CoreError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }
    if let Some(tz) = &cli.tz {
        config.timezone = tz.clone();
    }
    config.validate()?;
    Ok(config)
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Conversations(_) => "conversations",
        Command::Messages { .. } => "messages",
        Command::Attachment { .. } => "attachment",
        Command::Decode { .. } => "decode",
        Command::Seed { .. } => "seed",
    }
}

fn run(cli: &Cli, config: &Config) -> Result<serde_json::Value, CoreError> {
    match &cli.command {
        Command::Conversations(day) => {
            let store = open_chat_store(config)?;
            let matcher = day_matcher(day, config.zone()?)?;
            let options = SummaryOptions {
                preview_chars: config.preview_chars,
            };
            let summaries = list_conversations(&store, &matcher, &options)?;
            info!(
                month = matcher.month(),
                day = matcher.day(),
                conversations = summaries.len(),
                "listed conversations"
            );
            to_json(&summaries)
        }
        Command::Messages { id, day } => {
            let store = open_chat_store(config)?;
            let matcher = day_matcher(day, config.zone()?)?;
            to_json(&conversation_day(&store, *id, &matcher)?)
        }
        Command::Attachment { id } => {
            let store = open_chat_store(config)?;
            to_json(&attachment_location(&store, *id)?)
        }
        Command::Decode { input } => {
            let blob = read_blob(input)?;
            to_json(&decode_blob(&blob))
        }
        Command::Seed { path, day } => {
            let matcher = day_matcher(day, config.zone()?)?;
            let rows = seed_demo_file(path, matcher.month(), matcher.day())?;
            info!(rows, "seeded demo store");
            to_json(&SeedOutput {
                path: path.display().to_string(),
                rows,
            })
        }
    }
}

fn open_chat_store(config: &Config) -> Result<ChatStore, CoreError> {
    let contacts = match &config.address_book_dir {
        Some(dir) => ContactDirectory::load(dir),
        None => ContactDirectory::default(),
    };
    debug!(contacts = contacts.len(), "contact directory loaded");
    ChatStore::open(&config.store_path, contacts)
}

fn day_matcher(args: &DayArgs, zone: CalendarZone) -> Result<DayMatcher, CoreError> {
    match (args.month, args.day) {
        (Some(month), Some(day)) => DayMatcher::new(month, day, zone),
        (None, None) => DayMatcher::today(zone),
        _ => Err(CoreError::InvalidArgument("--month and --day go together".to_string())),
    }
}

fn read_blob(input: &str) -> Result<Vec<u8>, CoreError> {
    let raw = if input == "-" {
        let mut buf = Vec::new();
        io::stdin()
            .read_to_end(&mut buf)
            .map_err(|err| CoreError::InvalidArgument(format!("cannot read stdin: {err}")))?;
        buf
    } else {
        fs::read(Path::new(input)).map_err(|err| CoreError::InvalidArgument(format!("cannot read {input}: {err}")))?
    };
    Ok(parse_blob_input(raw))
}

/// Hex text (whitespace allowed) is decoded; anything else is taken as raw bytes.
fn parse_blob_input(raw: Vec<u8>) -> Vec<u8> {
    let compact: Vec<u8> = raw.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect();
    if compact.is_empty() || compact.len() % 2 != 0 || !compact.iter().all(u8::is_ascii_hexdigit) {
        return raw;
    }
    hex::decode(&compact).unwrap_or(raw)
}

fn decode_blob(blob: &[u8]) -> DecodeOutput {
    match decode(blob) {
        Ok(rich) => DecodeOutput {
            text: rich.text,
            ranges: rich.ranges,
            salvaged: false,
            error: None,
        },
        Err(err) => DecodeOutput {
            text: salvage_text(blob).unwrap_or_default(),
            ranges: Vec::new(),
            salvaged: true,
            error: Some(err.to_string()),
        },
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, CoreError> {
    serde_json::to_value(value).map_err(|err| CoreError::InvalidArgument(err.to_string()))
}

fn print_json(value: &serde_json::Value) -> io::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value).map_err(io::Error::from)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use on_this_day_core::archive::writer::encode_plain;

    #[test]
    fn hex_input_is_decoded_and_raw_input_kept() {
        assert_eq!(parse_blob_input(b"04 0b\n".to_vec()), vec![0x04, 0x0B]);
        let raw = vec![0x04, 0x0B, b's'];
        assert_eq!(parse_blob_input(raw.clone()), raw);
        assert_eq!(parse_blob_input(b"abc".to_vec()), b"abc".to_vec());
    }

    #[test]
    fn decode_blob_falls_back_to_salvage() {
        let ok = decode_blob(&encode_plain("Hello"));
        assert_eq!(ok.text, "Hello");
        assert!(!ok.salvaged);

        let broken = decode_blob(b"junk");
        assert!(broken.salvaged);
        assert!(broken.error.is_some());
    }

    #[test]
    fn month_and_day_must_come_together() {
        let args = DayArgs {
            month: Some(3),
            day: None,
        };
        assert!(matches!(
            day_matcher(&args, CalendarZone::utc()),
            Err(CoreError::InvalidArgument(_))
        ));
        let both = DayArgs {
            month: Some(2),
            day: Some(29),
        };
        assert_eq!(day_matcher(&both, CalendarZone::utc()).expect("matcher").day(), 29);
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["on_this_day", "messages", "7", "--month", "3", "--day", "15", "--tz", "+02:00"])
            .expect("parse");
        assert_eq!(cli.tz.as_deref(), Some("+02:00"));
        match cli.command {
            Command::Messages { id, day } => {
                assert_eq!(id, 7);
                assert_eq!(day.month, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["on_this_day", "conversations", "--month", "13", "--day", "1"]).is_err());
    }
}
