//! refdata CLI — universe sync, quote collection, and listing feed downloads.
//!
//! Commands:
//! - `sync-universe` — reconcile merged listing snapshots against the
//!   persisted universe and publish the merged frame
//! - `collect` — batch-collect quote data for the universe, publish a
//!   snapshot, optionally append to the quote table
//! - `fetch-listings` — download the configured listing feeds and publish
//!   versioned snapshots with stable symlinks
//!
//! Lifecycle: configuration errors are fatal before any network or database
//! work; the alert digest is sent exactly once on every exit path; the
//! process exits non-zero on any propagated failure.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use refdata_core::{
    classify_and_render, collect_all, ensure_table, existing_keys, listing_rows, load_universe,
    max_identifier, merge_listings, parse_exchange_feed, parse_nasdaq_feed, partition,
    publish_snapshot, read_snapshot, rows_to_dataframe, symbol_id_map, symbol_id_map_for, Alerter,
    CollectedRow, Config, Database, FeedKind, HttpQuoteClient, SqlValue, SqliteDatabase, SymbolKey,
    TableRef,
};

#[derive(Parser)]
#[command(
    name = "refdata",
    about = "Reference-data pipeline — universe sync, quote collection, listing feeds"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true, default_value = "refdata.toml")]
    config: PathBuf,

    /// Config overrides of the form <dotted.path>=<value>.
    #[arg(short = 'D', value_name = "PATH=VALUE", global = true)]
    define: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile merged listing snapshots against the persisted universe.
    SyncUniverse,

    /// Collect batch quote data and publish a snapshot.
    Collect {
        /// Comma-separated symbols for a dry run against a subset.
        #[arg(long)]
        symbols: Option<String>,

        /// Message type to request, overriding the configured one.
        #[arg(long)]
        message: Option<String>,

        /// Append collected rows to the configured quote table.
        #[arg(long, default_value_t = false)]
        load: bool,
    },

    /// Download listing feeds and publish versioned snapshots.
    FetchListings {
        /// Restrict to specific feed names.
        #[arg(long)]
        only: Vec<String>,
    },
}

fn app_name(command: &Commands) -> &'static str {
    match command {
        Commands::SyncUniverse => "sync_universe",
        Commands::Collect { .. } => "collect",
        Commands::FetchListings { .. } => "fetch_listings",
    }
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config, &cli.define) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let mut alerter = if config.alerting.enabled {
        Alerter::new(config.alerting.webhook_url.clone())
    } else {
        Alerter::disabled()
    };

    let app = app_name(&cli.command);
    let result = run(cli.command, &config, &mut alerter);

    let code = match result {
        Ok(()) => 0,
        Err(e) => {
            error!("{app} failed: {e:#}");
            alerter.error(format!("{app} failed: {e:#}"));
            1
        }
    };

    // The digest goes out exactly once, on success and failure alike.
    if let Err(e) = alerter.send(app) {
        warn!("could not deliver alert digest: {e}");
    }

    std::process::exit(code);
}

fn run(command: Commands, config: &Config, alerter: &mut Alerter) -> Result<()> {
    match command {
        Commands::SyncUniverse => sync_universe(config, alerter),
        Commands::Collect {
            symbols,
            message,
            load,
        } => collect_quotes(
            config,
            alerter,
            symbols.as_deref(),
            message.as_deref(),
            load,
        ),
        Commands::FetchListings { only } => fetch_listings(config, alerter, &only),
    }
}

// ── sync-universe ───────────────────────────────────────────────────

fn sync_universe(config: &Config, alerter: &mut Alerter) -> Result<()> {
    let separator = config.snapshots.separator_byte()?;
    let db = SqliteDatabase::open(&config.database.path)?;
    let table = TableRef::new(&config.database.schema, &config.universe.table);
    ensure_table(&db, &table)?;

    let records = load_universe(&db, &table)?;
    info!(existing = records.len(), "loaded universe snapshot");

    let (exchange_feeds, nasdaq_feeds): (Vec<_>, Vec<_>) = config
        .feeds
        .sources
        .iter()
        .partition(|s| s.kind == FeedKind::Exchange);
    if exchange_feeds.len() != 2 || nasdaq_feeds.len() != 1 {
        bail!(
            "expected two exchange feeds and one nasdaq feed, got {} and {}",
            exchange_feeds.len(),
            nasdaq_feeds.len()
        );
    }

    // Read the stable snapshot names maintained by fetch-listings.
    let dir = &config.snapshots.dir;
    let read = |name: &str| {
        read_snapshot(&dir.join(format!("{name}.csv")), separator)
            .with_context(|| format!("reading listing snapshot '{name}'"))
    };
    let exchange_a = read(&exchange_feeds[0].name)?;
    let exchange_b = read(&exchange_feeds[1].name)?;
    let nasdaq = read(&nasdaq_feeds[0].name)?;

    let mut merged = merge_listings(exchange_a, exchange_b, nasdaq)?;
    let rows = listing_rows(&merged)?;
    alerter.info(format!("Total symbols today: {}", rows.len()));

    let keys = existing_keys(&records);
    let start_id = max_identifier(&records) + 1;
    let today = chrono::Local::now().date_naive();
    let reconciliation = classify_and_render(&keys, &rows, start_id, &table, today);

    // Updates run before inserts.
    for stmt in &reconciliation.updates {
        db.execute(stmt)?;
    }
    info!(updates = reconciliation.updates.len(), "applied updates");
    alerter.info(format!(
        "Updated {} symbols in {table}",
        reconciliation.updates.len()
    ));

    for stmt in &reconciliation.inserts {
        db.execute(stmt)?;
    }
    info!(inserts = reconciliation.inserts.len(), "applied inserts");
    alerter.info(format!(
        "Inserted {} symbols into {table}",
        reconciliation.inserts.len()
    ));

    let snapshot = publish_snapshot(&mut merged, dir, "universe", separator)?;
    info!(file = %snapshot.file.display(), "published universe snapshot");

    Ok(())
}

// ── collect ─────────────────────────────────────────────────────────

/// Collected quote field → quote table column.
const QUOTE_FIELD_MAP: &[(&str, &str)] = &[
    ("symbol_id", "symbol_id"),
    ("symbol", "symbol"),
    ("date", "trade_date"),
    ("open", "open_price"),
    ("high", "high_price"),
    ("low", "low_price"),
    ("close", "close_price"),
    ("volume", "volume"),
    ("changePercent", "change_percent"),
];

fn collect_quotes(
    config: &Config,
    alerter: &mut Alerter,
    symbols: Option<&str>,
    message: Option<&str>,
    load: bool,
) -> Result<()> {
    let db = SqliteDatabase::open(&config.database.path)?;
    let table = TableRef::new(&config.database.schema, &config.universe.table);

    let id_map = match symbols {
        None => symbol_id_map(&db, &table)?,
        Some(raw) => {
            let requested: Vec<SymbolKey> = raw.split(',').map(SymbolKey::new).collect();
            symbol_id_map_for(&db, &table, &requested)?
        }
    };
    if id_map.is_empty() {
        bail!("no collectable symbols found in {table}");
    }

    let keys: Vec<SymbolKey> = id_map.keys().cloned().collect();
    let batches = partition(&keys, config.collector.batch_size)?;
    info!(
        symbols = keys.len(),
        batches = batches.len(),
        "collecting quote data"
    );

    let message = message.unwrap_or(config.collector.message_type.as_str());
    let token = config.collector.resolve_token()?;
    let api = HttpQuoteClient::new(&config.collector.base_url, token);
    let outcome = collect_all(&api, &batches, message, config.collector.range.as_deref());

    // Attach identifiers so collected rows join back to the universe.
    let mut rows = outcome.rows;
    for row in &mut rows {
        let key = row
            .get("symbol")
            .and_then(|v| v.as_str())
            .map(SymbolKey::new);
        if let Some(id) = key.and_then(|k| id_map.get(&k)) {
            row.insert("symbol_id".to_string(), serde_json::json!(id));
        }
    }

    if !outcome.missing.is_empty() {
        let listed: Vec<&str> = outcome.missing.iter().map(SymbolKey::as_str).collect();
        info!(missing = ?listed, "symbols with no data");
    }

    alerter.info(format!("Number of symbols gathered: {}", rows.len()));
    if outcome.missing.is_empty() {
        alerter.info("No missing symbols");
    } else {
        alerter.warn(format!(
            "Number of missing symbols: {}",
            outcome.missing.len()
        ));
    }

    if rows.is_empty() {
        bail!("no data collected for any requested symbol");
    }

    let separator = config.snapshots.separator_byte()?;
    let mut df = rows_to_dataframe(&rows)?;
    let snapshot = publish_snapshot(
        &mut df,
        &config.snapshots.dir,
        &format!("quotes_{message}"),
        separator,
    )?;
    info!(file = %snapshot.file.display(), "published quote snapshot");

    if load {
        let quote_table = config
            .collector
            .quote_table
            .as_deref()
            .ok_or_else(|| anyhow!("collector.quote_table must be configured for --load"))?;
        let target = TableRef::new(&config.database.schema, quote_table);
        let loaded = load_quote_rows(&db, &target, &rows)?;
        alerter.info(format!("Inserted {loaded} rows into {target}"));
    }

    Ok(())
}

fn load_quote_rows(
    db: &dyn Database,
    table: &TableRef,
    rows: &[CollectedRow],
) -> Result<usize> {
    let columns: Vec<&str> = QUOTE_FIELD_MAP.iter().map(|(_, column)| *column).collect();
    let values: Vec<Vec<SqlValue>> = rows
        .iter()
        .map(|row| {
            QUOTE_FIELD_MAP
                .iter()
                .map(|(field, _)| {
                    row.get(*field)
                        .map(SqlValue::from_json)
                        .unwrap_or(SqlValue::Null)
                })
                .collect()
        })
        .collect();

    Ok(db.bulk_load(table, &columns, &values)?)
}

// ── fetch-listings ──────────────────────────────────────────────────

fn fetch_listings(config: &Config, alerter: &mut Alerter, only: &[String]) -> Result<()> {
    let separator = config.snapshots.separator_byte()?;
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("building HTTP client")?;

    let mut published = 0usize;
    for source in &config.feeds.sources {
        if !only.is_empty() && !only.contains(&source.name) {
            continue;
        }

        info!(feed = %source.name, url = %source.url, "downloading listing feed");
        let resp = client
            .get(&source.url)
            .send()
            .with_context(|| format!("downloading feed '{}'", source.name))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("feed '{}' returned status {status}", source.name);
        }
        let body = resp.bytes()?;

        let mut df = match source.kind {
            FeedKind::Exchange => parse_exchange_feed(Cursor::new(body.to_vec()), separator)?,
            FeedKind::Nasdaq => parse_nasdaq_feed(Cursor::new(body.to_vec()), separator)?,
        };

        let rows = df.height();
        publish_snapshot(&mut df, &config.snapshots.dir, &source.name, separator)?;
        alerter.info(format!("Published {} snapshot ({rows} rows)", source.name));
        published += 1;
    }

    if published == 0 {
        bail!("no feeds matched the requested names");
    }

    Ok(())
}
