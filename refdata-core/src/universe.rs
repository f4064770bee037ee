//! The persisted symbol universe — domain types and queries.
//!
//! A `SymbolRecord` is the canonical row for one security. Its `symbol_id`
//! is assigned once by reconciliation and never reused or reassigned; this
//! module only reads existing records and maps symbols to identifiers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::{Database, DbError, Row, SqlValue, Statement, TableRef};

/// A case-normalized ticker, the join key between feeds and the universe.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolKey(String);

impl SymbolKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted universe row.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolRecord {
    pub symbol_id: i64,
    pub exchange_symbol: Option<String>,
    pub consolidated_symbol: SymbolKey,
    pub index_number: Option<i64>,
    pub nasdaq_symbol: Option<String>,
    pub created_date: Option<NaiveDate>,
}

/// Create the universe table if it does not exist yet.
pub fn ensure_table(db: &dyn Database, table: &TableRef) -> Result<(), DbError> {
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         symbol_id INTEGER PRIMARY KEY, \
         exchange_symbol TEXT, \
         consolidated_symbol TEXT NOT NULL, \
         index_number INTEGER, \
         nasdaq_symbol TEXT, \
         created_date TEXT NOT NULL)"
    );
    db.execute(&Statement::bare(sql))?;
    Ok(())
}

/// Load the full universe snapshot.
pub fn load_universe(db: &dyn Database, table: &TableRef) -> Result<Vec<SymbolRecord>, DbError> {
    let sql = format!(
        "SELECT symbol_id, exchange_symbol, consolidated_symbol, \
         index_number, nasdaq_symbol, created_date FROM {table}"
    );
    let rows = db.execute(&Statement::bare(sql))?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        match record_from_row(row) {
            Some(record) => records.push(record),
            None => warn!("skipping malformed universe row: {row:?}"),
        }
    }
    Ok(records)
}

fn record_from_row(row: &Row) -> Option<SymbolRecord> {
    let symbol_id = row.get("symbol_id")?.as_i64()?;
    let consolidated = row.get("consolidated_symbol")?.as_text()?;

    let text = |col: &str| -> Option<String> {
        row.get(col)
            .and_then(SqlValue::as_text)
            .map(str::to_string)
    };

    Some(SymbolRecord {
        symbol_id,
        exchange_symbol: text("exchange_symbol"),
        consolidated_symbol: SymbolKey::new(consolidated),
        index_number: row.get("index_number").and_then(SqlValue::as_i64),
        nasdaq_symbol: text("nasdaq_symbol"),
        created_date: text("created_date").and_then(|s| s.parse().ok()),
    })
}

/// The set of join keys known at a point in time.
///
/// Reconciliation classifies incoming rows against this snapshot; it is not
/// updated mid-run.
pub fn existing_keys(records: &[SymbolRecord]) -> BTreeSet<SymbolKey> {
    records
        .iter()
        .map(|r| r.consolidated_symbol.clone())
        .collect()
}

/// Map Nasdaq symbols to their identifiers, for the quote collector.
///
/// Rows without a Nasdaq symbol are not collectable and are excluded.
pub fn symbol_id_map(
    db: &dyn Database,
    table: &TableRef,
) -> Result<BTreeMap<SymbolKey, i64>, DbError> {
    let sql = format!(
        "SELECT symbol_id, nasdaq_symbol FROM {table} WHERE nasdaq_symbol IS NOT NULL"
    );
    let rows = db.execute(&Statement::bare(sql))?;
    Ok(id_map_from_rows(&rows))
}

/// Like [`symbol_id_map`], restricted to an explicit symbol list.
///
/// Used by dry runs to resolve only the symbols given on the command line.
pub fn symbol_id_map_for(
    db: &dyn Database,
    table: &TableRef,
    requested: &[SymbolKey],
) -> Result<BTreeMap<SymbolKey, i64>, DbError> {
    if requested.is_empty() {
        return Ok(BTreeMap::new());
    }

    let placeholders: Vec<String> = (1..=requested.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT symbol_id, nasdaq_symbol FROM {table} \
         WHERE nasdaq_symbol IN ({})",
        placeholders.join(", ")
    );
    let params = requested
        .iter()
        .map(|k| SqlValue::Text(k.as_str().to_string()))
        .collect();

    let rows = db.execute(&Statement::new(sql, params))?;
    Ok(id_map_from_rows(&rows))
}

fn id_map_from_rows(rows: &[Row]) -> BTreeMap<SymbolKey, i64> {
    rows.iter()
        .filter_map(|row| {
            let id = row.get("symbol_id")?.as_i64()?;
            let symbol = row.get("nasdaq_symbol")?.as_text()?;
            Some((SymbolKey::new(symbol), id))
        })
        .collect()
}
