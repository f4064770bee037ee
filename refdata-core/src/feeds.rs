//! Exchange listing feeds — parsing and the three-way reference merge.
//!
//! Two feeds share the exchange-mapping schema (headerless, pipe-delimited,
//! a junk trailing column); the Nasdaq directory feed differs (headered,
//! with a consolidated symbol column that must be backfilled from the plain
//! symbol, and a summary footer row). The merge is a pair of outer joins:
//! the canonical identifier space is the union of the sources, so rows seen
//! by only one feed survive with the other feeds' columns left null.

use std::path::Path;

use polars::io::mmap::MmapBytesReader;
use polars::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::universe::SymbolKey;

/// Column names assigned to the headerless exchange-mapping feeds.
const EXCHANGE_COLUMNS: [&str; 12] = [
    "exchange_symbol",
    "consolidated_symbol",
    "index_number",
    "market",
    "listed_market",
    "ticker_designation",
    "unit_of_trade",
    "price_scale_code",
    "system_id",
    "bloomberg_bsid",
    "bloomberg_global_id",
    "filler",
];

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("listing feed error: {0}")]
    Polars(#[from] PolarsError),

    #[error("expected {expected} columns in exchange feed, got {got}")]
    UnexpectedShape { expected: usize, got: usize },

    #[error("feed is missing required column '{0}'")]
    MissingColumn(String),
}

/// One merged listing row, typed for reconciliation.
///
/// Fields absent from every contributing feed are `None` and render as SQL
/// NULL downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub exchange_symbol: Option<String>,
    pub consolidated_symbol: SymbolKey,
    pub index_number: Option<i64>,
    pub nasdaq_symbol: Option<String>,
}

/// Parse a raw exchange-mapping feed (headerless, fixed column set).
///
/// Drops the trailing junk column the feed carries after its final delimiter.
pub fn parse_exchange_feed<R: MmapBytesReader>(
    reader: R,
    separator: u8,
) -> Result<DataFrame, FeedError> {
    let mut df = CsvReadOptions::default()
        .with_has_header(false)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .into_reader_with_file_handle(reader)
        .finish()?;

    if df.width() != EXCHANGE_COLUMNS.len() {
        return Err(FeedError::UnexpectedShape {
            expected: EXCHANGE_COLUMNS.len(),
            got: df.width(),
        });
    }

    df.set_column_names(EXCHANGE_COLUMNS)?;
    let df = df.drop("filler")?;

    let df = df
        .lazy()
        .with_column(col("index_number").cast(DataType::Int64))
        .collect()?;

    info!(rows = df.height(), "parsed exchange listing feed");
    Ok(df)
}

/// Parse the raw Nasdaq directory feed.
///
/// The feed is headered, ends with a file-creation footer row, and leaves
/// the consolidated symbol blank for Nasdaq-listed issues; those are
/// backfilled from the plain symbol.
pub fn parse_nasdaq_feed<R: MmapBytesReader>(
    reader: R,
    separator: u8,
) -> Result<DataFrame, FeedError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .into_reader_with_file_handle(reader)
        .finish()?;

    for required in ["Symbol", "CQS Symbol"] {
        if df.column(required).is_err() {
            return Err(FeedError::MissingColumn(required.to_string()));
        }
    }

    // Drop the trailing footer row.
    let df = df.slice(0, df.height().saturating_sub(1));

    let df = df
        .lazy()
        .with_column(
            col("CQS Symbol")
                .fill_null(col("Symbol"))
                .alias("consolidated_symbol"),
        )
        .rename(["Symbol"], ["nasdaq_symbol"], true)
        .collect()?;

    info!(rows = df.height(), "parsed nasdaq listing feed");
    Ok(df)
}

/// Read a previously published listing snapshot (headered, delimited).
pub fn read_snapshot(path: &Path, separator: u8) -> Result<DataFrame, FeedError> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Merge the two exchange feeds and the Nasdaq feed into one unified frame.
///
/// Outer join the exchange feeds on the full key triple, then outer join
/// the Nasdaq feed on the consolidated symbol. One row per distinct
/// security observed in any feed.
pub fn merge_listings(
    exchange_a: DataFrame,
    exchange_b: DataFrame,
    nasdaq: DataFrame,
) -> Result<DataFrame, FeedError> {
    let key_triple = |df: DataFrame| {
        df.lazy().select([
            col("exchange_symbol").cast(DataType::String),
            col("consolidated_symbol").cast(DataType::String),
            col("index_number").cast(DataType::Int64),
        ])
    };

    let exchange = key_triple(exchange_a).join(
        key_triple(exchange_b),
        [
            col("exchange_symbol"),
            col("consolidated_symbol"),
            col("index_number"),
        ],
        [
            col("exchange_symbol"),
            col("consolidated_symbol"),
            col("index_number"),
        ],
        JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
    );

    let nasdaq_pair = nasdaq.lazy().select([
        col("nasdaq_symbol").cast(DataType::String),
        col("consolidated_symbol").cast(DataType::String),
    ]);

    let merged = exchange
        .join(
            nasdaq_pair,
            [col("consolidated_symbol")],
            [col("consolidated_symbol")],
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .select([
            col("exchange_symbol"),
            col("consolidated_symbol"),
            col("index_number"),
            col("nasdaq_symbol"),
        ])
        .collect()?;

    info!(rows = merged.height(), "merged listing feeds");
    Ok(merged)
}

/// Extract typed rows from a merged listing frame.
///
/// Rows without a consolidated symbol cannot be classified against the
/// universe and are dropped with a warning.
pub fn listing_rows(df: &DataFrame) -> Result<Vec<ListingRow>, FeedError> {
    let exchange = df.column("exchange_symbol")?.str()?;
    let consolidated = df.column("consolidated_symbol")?.str()?;
    let index_number = df.column("index_number")?.i64()?;
    let nasdaq = df.column("nasdaq_symbol")?.str()?;

    let mut rows = Vec::with_capacity(df.height());
    let mut dropped = 0usize;

    for i in 0..df.height() {
        let Some(key) = consolidated.get(i) else {
            dropped += 1;
            continue;
        };
        rows.push(ListingRow {
            exchange_symbol: exchange.get(i).map(str::to_string),
            consolidated_symbol: SymbolKey::new(key),
            index_number: index_number.get(i),
            nasdaq_symbol: nasdaq.get(i).map(str::to_string),
        });
    }

    if dropped > 0 {
        warn!(dropped, "dropped listing rows without a consolidated symbol");
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn exchange_df(rows: &[(&str, &str, Option<i64>)]) -> DataFrame {
        let ex: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let cqs: Vec<&str> = rows.iter().map(|r| r.1).collect();
        let idx: Vec<Option<i64>> = rows.iter().map(|r| r.2).collect();
        DataFrame::new(vec![
            Column::new("exchange_symbol".into(), ex),
            Column::new("consolidated_symbol".into(), cqs),
            Column::new("index_number".into(), idx),
        ])
        .unwrap()
    }

    fn nasdaq_df(rows: &[(&str, &str)]) -> DataFrame {
        let nas: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let cqs: Vec<&str> = rows.iter().map(|r| r.1).collect();
        DataFrame::new(vec![
            Column::new("nasdaq_symbol".into(), nas),
            Column::new("consolidated_symbol".into(), cqs),
        ])
        .unwrap()
    }

    #[test]
    fn exchange_feed_parses_and_drops_filler() {
        let raw = "AAA|AAA|1|N|N|A|100|4|1|123|456|\nBBB|BBB.A|2|N|N|A|100|4|2|124|457|\n";
        let df = parse_exchange_feed(Cursor::new(raw.as_bytes().to_vec()), b'|').unwrap();

        assert_eq!(df.height(), 2);
        assert!(df.column("filler").is_err());
        assert_eq!(
            df.column("consolidated_symbol").unwrap().str().unwrap().get(1),
            Some("BBB.A")
        );
        assert_eq!(df.column("index_number").unwrap().i64().unwrap().get(0), Some(1));
    }

    #[test]
    fn exchange_feed_rejects_wrong_width() {
        let raw = "AAA|AAA|1\n";
        let err = parse_exchange_feed(Cursor::new(raw.as_bytes().to_vec()), b'|').unwrap_err();
        assert!(matches!(err, FeedError::UnexpectedShape { got: 3, .. }));
    }

    #[test]
    fn nasdaq_feed_backfills_consolidated_symbol_and_drops_footer() {
        let raw = "Nasdaq Traded|Symbol|Security Name|CQS Symbol\n\
                   Y|AACG|ATA Creativity Global|\n\
                   Y|AXP|American Express|AXP\n\
                   File Creation Time: 0807202617:03|||\n";
        let df = parse_nasdaq_feed(Cursor::new(raw.as_bytes().to_vec()), b'|').unwrap();

        assert_eq!(df.height(), 2);
        let consolidated = df.column("consolidated_symbol").unwrap().str().unwrap();
        assert_eq!(consolidated.get(0), Some("AACG"));
        assert_eq!(consolidated.get(1), Some("AXP"));
        let nasdaq = df.column("nasdaq_symbol").unwrap().str().unwrap();
        assert_eq!(nasdaq.get(0), Some("AACG"));
    }

    #[test]
    fn nasdaq_feed_requires_symbol_columns() {
        let raw = "A|B\n1|2\n";
        let err = parse_nasdaq_feed(Cursor::new(raw.as_bytes().to_vec()), b'|').unwrap_err();
        assert!(matches!(err, FeedError::MissingColumn(_)));
    }

    #[test]
    fn merge_is_a_union_not_an_intersection() {
        // AAA in both exchange feeds, BBB only in the second, CCC only on Nasdaq.
        let a = exchange_df(&[("AAA", "AAA", Some(1))]);
        let b = exchange_df(&[("AAA", "AAA", Some(1)), ("BBB", "BBB", Some(2))]);
        let n = nasdaq_df(&[("AAA", "AAA"), ("CCC", "CCC")]);

        let merged = merge_listings(a, b, n).unwrap();
        assert_eq!(merged.height(), 3);

        let rows = listing_rows(&merged).unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.consolidated_symbol.as_str()).collect();
        assert!(keys.contains(&"AAA"));
        assert!(keys.contains(&"BBB"));
        assert!(keys.contains(&"CCC"));

        // Single-feed rows keep absent columns null.
        let ccc = rows
            .iter()
            .find(|r| r.consolidated_symbol == SymbolKey::new("CCC"))
            .unwrap();
        assert_eq!(ccc.exchange_symbol, None);
        assert_eq!(ccc.index_number, None);
        assert_eq!(ccc.nasdaq_symbol.as_deref(), Some("CCC"));

        let bbb = rows
            .iter()
            .find(|r| r.consolidated_symbol == SymbolKey::new("BBB"))
            .unwrap();
        assert_eq!(bbb.exchange_symbol.as_deref(), Some("BBB"));
        assert_eq!(bbb.nasdaq_symbol, None);
    }

    #[test]
    fn listing_rows_drop_nullkey_rows() {
        let df = DataFrame::new(vec![
            Column::new("exchange_symbol".into(), vec![Some("AAA"), Some("XXX")]),
            Column::new("consolidated_symbol".into(), vec![Some("AAA"), None::<&str>]),
            Column::new("index_number".into(), vec![Some(1i64), None]),
            Column::new("nasdaq_symbol".into(), vec![Some("AAA"), None::<&str>]),
        ])
        .unwrap();

        let rows = listing_rows(&df).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].consolidated_symbol, SymbolKey::new("AAA"));
    }
}
