//! refdata-core — reference-data reconciliation and batch collection.
//!
//! The pipeline building blocks:
//! - Typed configuration tree with dotted-path overrides
//! - Symbol universe domain types and queries
//! - Job partitioning and the remote batch quote client
//! - Listing feed parsing and the three-way reference merge
//! - Universe reconciliation with monotonic identifier allocation
//! - Versioned snapshot publishing with a stable symlink
//! - Run-level alert digest

pub mod alert;
pub mod batch;
pub mod collect;
pub mod config;
pub mod db;
pub mod feeds;
pub mod publish;
pub mod reconcile;
pub mod universe;

pub use alert::{AlertError, AlertLevel, Alerter};
pub use batch::{partition, Batch, BatchError};
pub use collect::{
    collect, collect_all, rows_to_dataframe, BatchOutcome, CollectedRow, HttpQuoteClient, QuoteApi,
    TransportError,
};
pub use config::{Config, ConfigError, FeedKind, FeedSource};
pub use db::{Database, DbError, Row, SqlValue, SqliteDatabase, Statement, TableRef};
pub use feeds::{
    listing_rows, merge_listings, parse_exchange_feed, parse_nasdaq_feed, read_snapshot, FeedError,
    ListingRow,
};
pub use publish::{publish_snapshot, publish_snapshot_on, PublishError, PublishedSnapshot};
pub use reconcile::{classify_and_render, max_identifier, Reconciliation};
pub use universe::{
    ensure_table, existing_keys, load_universe, symbol_id_map, symbol_id_map_for, SymbolKey,
    SymbolRecord,
};
