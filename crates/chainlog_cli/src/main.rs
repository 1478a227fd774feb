//! chainlog CLI
//!
//! View, audit and append to a chainlog database.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chainlog_core::Timestamp;
use chainlog_log::{LogData, LogEntry, Value, canonical_data};
use chainlog_runtime::{Engine, EngineConfig};
use chainlog_storage::{AuditVerifier, PersistentStore, RedbStore, Scan, StoreResult};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, bail};
use console::style;
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Rendered data wider than this is cut short in text output
const DATA_WIDTH: usize = 80;

#[derive(Parser)]
#[command(name = "chainlog")]
#[command(about = "chainlog - tamper-evident, hash-chained audit log", long_about = None)]
struct Cli {
    /// Database file (overrides `db_name` from the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// TOML engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit one JSON object per line instead of a table
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the hash chain and report the first divergence
    Verify {
        /// Only check the newest N entries
        #[arg(long)]
        tail: Option<u64>,
    },
    /// List entries in index order
    Scan {
        /// First index to read
        #[arg(long, default_value_t = 0)]
        from: u64,
        /// Stop after this many matching entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Show the newest entries, oldest first
    Tail {
        /// How many entries to show
        #[arg(short = 'n', long, default_value_t = 30)]
        limit: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print the number of stored entries
    Count,
    /// Append one entry and wait until it is durable
    Append {
        /// Severity level
        #[arg(short, long, default_value = "INFO")]
        level: String,
        /// Category
        #[arg(short, long)]
        category: String,
        /// Message
        #[arg(short, long)]
        message: String,
        /// Data field as key=value (repeatable)
        #[arg(short, long = "data", value_parser = parse_pair)]
        data: Vec<(String, Value)>,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
struct FilterArgs {
    /// Exact level (case-insensitive)
    #[arg(short, long)]
    level: Option<String>,
    /// Category substring
    #[arg(short, long)]
    category: Option<String>,
    /// Earliest timestamp, inclusive (RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    since: Option<Timestamp>,
    /// Latest timestamp, inclusive (RFC 3339)
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<Timestamp>,
}

/// Entry predicate for scan and tail
#[derive(Debug, Clone, Default)]
struct Filter {
    level: Option<String>,
    category: Option<String>,
    since: Option<Timestamp>,
    until: Option<Timestamp>,
}

impl Filter {
    fn new(args: FilterArgs) -> Self {
        Self {
            level: args.level.map(|l| l.to_ascii_uppercase()),
            category: args.category,
            since: args.since,
            until: args.until,
        }
    }

    fn matches(&self, entry: &LogEntry) -> bool {
        self.level.as_ref().is_none_or(|l| entry.level == *l)
            && self
                .category
                .as_ref()
                .is_none_or(|c| entry.category.contains(c.as_str()))
            && self.since.is_none_or(|t| entry.timestamp >= t)
            && self.until.is_none_or(|t| entry.timestamp <= t)
    }
}

/// JSON line shape; `data` is embedded as its canonical JSON text.
#[derive(Serialize)]
struct EntryView<'a> {
    index: u64,
    timestamp: String,
    level: &'a str,
    category: &'a str,
    message: &'a str,
    data: Box<RawValue>,
    prev_hash: String,
    entry_hash: String,
}

fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chainlog=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .wrap_err_with(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(db) = cli.db {
        config = config.with_db_name(db);
    }

    match cli.command {
        Commands::Verify { tail } => {
            let store = open_existing(&config.db_name)?;
            let verifier = AuditVerifier::new(store);
            let report = match tail {
                Some(n) => verifier.verify_tail(n)?,
                None => verifier.verify()?,
            };
            if cli.json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!("{report}");
            }
            Ok(if report.ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Scan {
            from,
            limit,
            filter,
        } => {
            let store = open_existing(&config.db_name)?;
            let filter = Filter::new(filter);
            let mut shown = 0usize;
            for entry in Scan::new(store, from) {
                if limit.is_some_and(|l| shown >= l) {
                    break;
                }
                let entry = entry?;
                if filter.matches(&entry) {
                    print_entry(&entry, cli.json)?;
                    shown += 1;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tail { limit, filter } => {
            let store = open_existing(&config.db_name)?;
            let entries = newest(Scan::new(store, 0), limit, &Filter::new(filter))?;
            if entries.is_empty() && !cli.json {
                println!("no matching entries");
            }
            for entry in &entries {
                print_entry(entry, cli.json)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Count => {
            let store = open_existing(&config.db_name)?;
            println!("{}", store.count()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Append {
            level,
            category,
            message,
            data,
        } => {
            let data = data
                .into_iter()
                .fold(LogData::new(), |acc, (key, value)| acc.with(key, value));
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let engine = Engine::open(config).await?;
                engine.log(&level, &category, message, data).await?;
                engine.shutdown().await?;
                tracing::info!(count = engine.count().await?, "entry appended");
                Ok::<_, color_eyre::Report>(())
            })?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Open a database that must already exist; viewing never creates or writes.
fn open_existing(path: &Path) -> Result<Arc<dyn PersistentStore>> {
    if !path.exists() {
        bail!("database not found: {}", path.display());
    }
    let store = RedbStore::open_existing(path)
        .wrap_err_with(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Last `n` matching entries in index order
fn newest(
    entries: impl Iterator<Item = StoreResult<LogEntry>>,
    n: usize,
    filter: &Filter,
) -> Result<Vec<LogEntry>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut window = VecDeque::with_capacity(n.min(1024));
    for entry in entries {
        let entry = entry?;
        if !filter.matches(&entry) {
            continue;
        }
        if window.len() == n {
            window.pop_front();
        }
        window.push_back(entry);
    }
    Ok(window.into())
}

fn print_entry(entry: &LogEntry, json: bool) -> Result<()> {
    if json {
        println!("{}", render_json(entry)?);
    } else {
        println!("{}", render_row(entry));
    }
    Ok(())
}

fn render_json(entry: &LogEntry) -> Result<String> {
    let view = EntryView {
        index: entry.index,
        timestamp: entry.timestamp.canonical(),
        level: &entry.level,
        category: &entry.category,
        message: &entry.message,
        data: RawValue::from_string(canonical_data(&entry.data))?,
        prev_hash: entry.prev_hash.to_hex(),
        entry_hash: entry.entry_hash.to_hex(),
    };
    Ok(serde_json::to_string(&view)?)
}

fn render_row(entry: &LogEntry) -> String {
    let level = format!("{:<8}", entry.level);
    let level = match entry.level.as_str() {
        "INFO" => style(level).green(),
        "WARNING" | "WARN" => style(level).yellow(),
        "ERROR" => style(level).red(),
        "CRITICAL" | "FATAL" => style(level).red().bold(),
        _ => style(level).cyan(),
    };
    let data = if entry.data.is_empty() {
        String::new()
    } else {
        truncate(&canonical_data(&entry.data), DATA_WIDTH)
    };
    format!(
        "{:>6} | {} | {} | {:<12} | {} {}",
        entry.index,
        entry.timestamp.canonical(),
        level,
        entry.category,
        entry.message,
        data
    )
    .trim_end()
    .to_string()
}

/// Cut `text` to at most `width` characters, marking the cut with `...`
fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    raw.parse::<Timestamp>().map_err(|e| e.to_string())
}

/// Parse `key=value`; the value is typed as int, float, bool or null before
/// falling back to text.
fn parse_pair(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), parse_value(value)))
}

fn parse_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return Value::Float(f);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::Text(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlog_log::{ChainState, Provisional};
    use chainlog_storage::MemoryStore;

    /// One second per index from a fixed origin
    fn at(second: i64) -> Timestamp {
        Timestamp::from_unix_micros(1_700_000_000_000_000 + second * 1_000_000).unwrap()
    }

    fn store_with(records: &[(&str, &str)]) -> Arc<dyn PersistentStore> {
        let store = MemoryStore::new();
        let mut chain = ChainState::genesis();
        let entries: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(i, (level, category))| {
                let data = LogData::new().with("i", i as i64);
                let p = Provisional::new(*level, *category, format!("event {i}"), data).unwrap();
                chain.commit(p, at(i as i64))
            })
            .collect();
        store.append_batch(&entries).unwrap();
        Arc::new(store)
    }

    #[test]
    fn test_parse_value_types() {
        assert_eq!(parse_value("75"), Value::Int(75));
        assert_eq!(parse_value("-3"), Value::Int(-3));
        assert_eq!(parse_value("0.5"), Value::Float(0.5));
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("null"), Value::Null);
        assert_eq!(parse_value("alice"), Value::Text("alice".to_string()));
        assert_eq!(parse_value("NaN"), Value::Text("NaN".to_string()));
        assert_eq!(parse_value(""), Value::Text(String::new()));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(
            parse_pair("ip=10.0.0.1").unwrap(),
            ("ip".to_string(), Value::Text("10.0.0.1".to_string()))
        );
        assert_eq!(
            parse_pair("query=a=b").unwrap(),
            ("query".to_string(), Value::Text("a=b".to_string()))
        );
        assert!(parse_pair("novalue").is_err());
        assert!(parse_pair("=1").is_err());
    }

    #[test]
    fn test_filter_level_exact_category_substring() {
        let store = store_with(&[("INFO", "AUTH"), ("WARNING", "SYS"), ("INFO", "AUTH_ADMIN")]);
        let entries: Vec<_> = Scan::new(store, 0).collect::<StoreResult<_>>().unwrap();

        let filter = Filter::new(FilterArgs {
            level: Some("info".to_string()),
            category: Some("AUTH".to_string()),
            ..Default::default()
        });
        let matched: Vec<u64> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.index)
            .collect();
        assert_eq!(matched, vec![0, 2]);

        let filter = Filter::new(FilterArgs {
            level: Some("WARN".to_string()),
            category: None,
            ..Default::default()
        });
        assert!(!entries.iter().any(|e| filter.matches(e)));
    }

    #[test]
    fn test_filter_time_range_is_inclusive() {
        let store = store_with(&[("INFO", "A"); 5]);
        let entries: Vec<_> = Scan::new(store, 0).collect::<StoreResult<_>>().unwrap();

        let since = parse_timestamp(&at(1).canonical()).unwrap();
        let until = parse_timestamp("2023-11-14T22:13:23Z").unwrap();
        assert_eq!(until, at(3));
        let filter = Filter::new(FilterArgs {
            since: Some(since),
            until: Some(until),
            ..Default::default()
        });
        let matched: Vec<u64> = entries
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.index)
            .collect();
        assert_eq!(matched, vec![1, 2, 3]);

        let filter = Filter::new(FilterArgs {
            since: Some(at(4)),
            ..Default::default()
        });
        let entries = newest(entries.into_iter().map(Ok), 30, &filter).unwrap();
        assert_eq!(entries.iter().map(|e| e.index).collect::<Vec<_>>(), vec![4]);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("last tuesday").is_err());
    }

    #[test]
    fn test_newest_keeps_last_n_in_order() {
        let store = store_with(&[("INFO", "A"); 10]);
        let entries = newest(Scan::new(store, 0), 3, &Filter::default()).unwrap();
        let indices: Vec<u64> = entries.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![7, 8, 9]);
    }

    #[test]
    fn test_newest_with_filter_and_zero() {
        let store = store_with(&[("INFO", "A"), ("ERROR", "B"), ("INFO", "C"), ("ERROR", "D")]);
        let filter = Filter::new(FilterArgs {
            level: Some("ERROR".to_string()),
            category: None,
            ..Default::default()
        });
        let entries = newest(Scan::new(store.clone(), 0), 30, &filter).unwrap();
        assert_eq!(entries.iter().map(|e| e.index).collect::<Vec<_>>(), vec![1, 3]);
        assert!(newest(Scan::new(store, 0), 0, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_marks_cut() {
        assert_eq!(truncate("short", 80), "short");
        let long = "x".repeat(100);
        let cut = truncate(&long, 80);
        assert_eq!(cut.chars().count(), 80);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate("ééééé", 4), "é...");
    }

    #[test]
    fn test_render_json_embeds_canonical_data() {
        let store = store_with(&[("INFO", "AUTH")]);
        let entry = store.read_range(0, 1).unwrap().remove(0);
        let line = render_json(&entry).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["index"], 0);
        assert_eq!(parsed["data"]["i"], 0);
        assert_eq!(parsed["entry_hash"], entry.entry_hash.to_hex());
    }

    #[test]
    fn test_open_existing_refuses_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.redb");
        assert!(open_existing(&path).is_err());
        assert!(!path.exists());
    }
}
