//! Universe reconciliation — classify incoming listing rows against the
//! persisted universe and render idempotent persistence operations.
//!
//! Classification is fixed against the key snapshot taken at the start of
//! the run: a row whose join key is already known becomes an UPDATE, every
//! other row becomes an INSERT with the next identifier. Identifiers are
//! allocated strictly increasing and gap-free within one run and are never
//! reassigned for existing rows.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::db::{SqlValue, Statement, TableRef};
use crate::feeds::ListingRow;
use crate::universe::{SymbolKey, SymbolRecord};

/// Result of one reconciliation pass.
#[derive(Debug)]
pub struct Reconciliation {
    /// UPDATE statements, in incoming-row order.
    pub updates: Vec<Statement>,
    /// INSERT statements, in incoming-row order; identifiers ascend with it.
    pub inserts: Vec<Statement>,
    /// The identifier the next reconciliation run should start from.
    pub next_id: i64,
}

/// Highest identifier present in the universe, or 0 when empty.
///
/// Seeds allocation only — 0 is never a valid in-universe identifier, so
/// callers start allocating at `max_identifier(..) + 1`.
pub fn max_identifier(records: &[SymbolRecord]) -> i64 {
    records.iter().map(|r| r.symbol_id).max().unwrap_or(0)
}

/// Classify each incoming row as an update or an insert and render it.
///
/// Re-running after persistence with the refreshed key set yields only
/// updates: previously inserted keys are then present in `existing_keys`.
pub fn classify_and_render(
    existing_keys: &BTreeSet<SymbolKey>,
    incoming: &[ListingRow],
    start_id: i64,
    table: &TableRef,
    today: NaiveDate,
) -> Reconciliation {
    let mut updates = Vec::new();
    let mut inserts = Vec::new();
    let mut next_id = start_id;

    for row in incoming {
        if existing_keys.contains(&row.consolidated_symbol) {
            let stmt = update_statement(table, row);
            debug!(statement = %stmt, "update");
            updates.push(stmt);
        } else {
            let stmt = insert_statement(table, row, next_id, today);
            debug!(statement = %stmt, "insert");
            inserts.push(stmt);
            next_id += 1;
        }
    }

    info!(
        updates = updates.len(),
        inserts = inserts.len(),
        "reconciled incoming rows against universe"
    );

    Reconciliation {
        updates,
        inserts,
        next_id,
    }
}

fn opt_text(value: &Option<String>) -> SqlValue {
    match value {
        Some(s) => SqlValue::Text(s.clone()),
        None => SqlValue::Null,
    }
}

fn opt_int(value: Option<i64>) -> SqlValue {
    match value {
        Some(i) => SqlValue::Int(i),
        None => SqlValue::Null,
    }
}

fn update_statement(table: &TableRef, row: &ListingRow) -> Statement {
    Statement::new(
        format!(
            "UPDATE {table} SET exchange_symbol = ?1, index_number = ?2, \
             nasdaq_symbol = ?3 WHERE consolidated_symbol = ?4"
        ),
        vec![
            opt_text(&row.exchange_symbol),
            opt_int(row.index_number),
            opt_text(&row.nasdaq_symbol),
            SqlValue::Text(row.consolidated_symbol.as_str().to_string()),
        ],
    )
}

fn insert_statement(table: &TableRef, row: &ListingRow, id: i64, today: NaiveDate) -> Statement {
    Statement::new(
        format!(
            "INSERT INTO {table} (symbol_id, exchange_symbol, consolidated_symbol, \
             index_number, nasdaq_symbol, created_date) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        vec![
            SqlValue::Int(id),
            opt_text(&row.exchange_symbol),
            SqlValue::Text(row.consolidated_symbol.as_str().to_string()),
            opt_int(row.index_number),
            opt_text(&row.nasdaq_symbol),
            SqlValue::Date(today),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: &str, index: Option<i64>) -> ListingRow {
        ListingRow {
            exchange_symbol: Some(key.to_string()),
            consolidated_symbol: SymbolKey::new(key),
            index_number: index,
            nasdaq_symbol: Some(key.to_string()),
        }
    }

    fn keys(raw: &[&str]) -> BTreeSet<SymbolKey> {
        raw.iter().map(|s| SymbolKey::new(s)).collect()
    }

    fn table() -> TableRef {
        TableRef::new("refdata", "security_universe")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()
    }

    #[test]
    fn max_identifier_defaults_to_zero() {
        assert_eq!(max_identifier(&[]), 0);
    }

    #[test]
    fn known_key_becomes_update_new_key_becomes_insert() {
        // Existing {AAA, BBB}, max id 5; incoming AAA, CCC, DDD.
        let existing = keys(&["AAA", "BBB"]);
        let incoming = vec![row("AAA", Some(1)), row("CCC", Some(2)), row("DDD", None)];

        let rec = classify_and_render(&existing, &incoming, 6, &table(), today());

        assert_eq!(rec.updates.len(), 1);
        assert_eq!(rec.inserts.len(), 2);
        assert_eq!(rec.next_id, 8);

        assert_eq!(rec.inserts[0].params[0], SqlValue::Int(6));
        assert_eq!(rec.inserts[1].params[0], SqlValue::Int(7));

        // Updates never carry a newly allocated identifier.
        for stmt in &rec.updates {
            assert!(!stmt.sql.contains("symbol_id"));
        }
    }

    #[test]
    fn inserted_identifiers_are_dense_and_unique() {
        let incoming: Vec<ListingRow> =
            ["E", "F", "G", "H"].iter().map(|k| row(k, None)).collect();
        let rec = classify_and_render(&BTreeSet::new(), &incoming, 10, &table(), today());

        let ids: Vec<i64> = rec
            .inserts
            .iter()
            .map(|s| s.params[0].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![10, 11, 12, 13]);
        assert_eq!(rec.next_id, 14);
    }

    #[test]
    fn rerun_with_refreshed_keys_is_idempotent() {
        let incoming = vec![row("NEW1", None), row("NEW2", None)];
        let first = classify_and_render(&BTreeSet::new(), &incoming, 1, &table(), today());
        assert_eq!(first.inserts.len(), 2);

        // Simulate persistence: the inserted keys are now part of the universe.
        let refreshed = keys(&["NEW1", "NEW2"]);
        let second = classify_and_render(&refreshed, &incoming, first.next_id, &table(), today());

        assert!(second.inserts.is_empty());
        assert_eq!(second.updates.len(), 2);
        assert_eq!(second.next_id, first.next_id);
    }

    #[test]
    fn missing_index_number_renders_null_not_nan() {
        let incoming = vec![row("AAA", None)];
        let rec = classify_and_render(&BTreeSet::new(), &incoming, 1, &table(), today());

        let rendered = rec.inserts[0].literal_sql();
        assert!(rendered.contains("NULL"));
        assert!(!rendered.to_lowercase().contains("nan"));
    }

    #[test]
    fn created_date_is_stamped_on_inserts_only() {
        let existing = keys(&["OLD"]);
        let incoming = vec![row("OLD", Some(1)), row("NEW", Some(2))];
        let rec = classify_and_render(&existing, &incoming, 9, &table(), today());

        assert!(rec.inserts[0].literal_sql().contains("2026-08-07"));
        assert!(!rec.updates[0].sql.contains("created_date"));
    }

    #[test]
    fn classification_uses_the_snapshot_not_running_state() {
        // Two same-keyed rows and an empty universe: both classify as
        // inserts against the starting snapshot.
        let incoming = vec![row("DUP", Some(1)), row("DUP", Some(2))];
        let rec = classify_and_render(&BTreeSet::new(), &incoming, 1, &table(), today());

        assert_eq!(rec.inserts.len(), 2);
        assert!(rec.updates.is_empty());
    }
}
