//! Property tests for the partitioning and reconciliation invariants.
//!
//! Uses proptest to verify:
//! 1. Partition shape — `ceil(n/b)` batches, order preserved, bounded sizes
//! 2. Identifier allocation — dense, unique, and monotonic per run
//! 3. Idempotence — re-running against a refreshed key set inserts nothing

use std::collections::BTreeSet;

use chrono::NaiveDate;
use proptest::prelude::*;

use refdata_core::{
    classify_and_render, max_identifier, partition, ListingRow, SymbolKey, SymbolRecord, TableRef,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_symbols() -> impl Strategy<Value = Vec<SymbolKey>> {
    prop::collection::vec("[A-Z]{1,4}", 0..80)
        .prop_map(|raw| raw.iter().map(|s| SymbolKey::new(s)).collect())
}

fn arb_unique_symbols() -> impl Strategy<Value = Vec<SymbolKey>> {
    prop::collection::btree_set("[A-Z]{1,4}", 0..40)
        .prop_map(|set| set.iter().map(|s| SymbolKey::new(s)).collect())
}

fn listing_row(key: &SymbolKey) -> ListingRow {
    ListingRow {
        exchange_symbol: Some(key.as_str().to_string()),
        consolidated_symbol: key.clone(),
        index_number: None,
        nasdaq_symbol: Some(key.as_str().to_string()),
    }
}

fn table() -> TableRef {
    TableRef::new("main", "security_universe")
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 7).unwrap()
}

// ── 1. Partition shape ───────────────────────────────────────────────

proptest! {
    #[test]
    fn partition_produces_ceil_batches(symbols in arb_symbols(), batch_size in 1usize..20) {
        let batches = partition(&symbols, batch_size).unwrap();
        let expected = symbols.len().div_ceil(batch_size);
        prop_assert_eq!(batches.len(), expected);
    }

    #[test]
    fn partition_concatenation_reproduces_input(symbols in arb_symbols(), batch_size in 1usize..20) {
        let batches = partition(&symbols, batch_size).unwrap();
        let flattened: Vec<SymbolKey> = batches.into_iter().flatten().collect();
        prop_assert_eq!(flattened, symbols);
    }

    #[test]
    fn partition_sizes_are_bounded(symbols in arb_symbols(), batch_size in 1usize..20) {
        let batches = partition(&symbols, batch_size).unwrap();
        for (i, batch) in batches.iter().enumerate() {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() <= batch_size);
            // Only the final batch may be short.
            if i + 1 < batches.len() {
                prop_assert_eq!(batch.len(), batch_size);
            }
        }
    }
}

// ── 2. Identifier allocation ─────────────────────────────────────────

proptest! {
    #[test]
    fn inserted_identifiers_are_exactly_the_next_k(
        keys in arb_unique_symbols(),
        start_id in 1i64..1000,
    ) {
        let incoming: Vec<ListingRow> = keys.iter().map(listing_row).collect();
        let rec = classify_and_render(&BTreeSet::new(), &incoming, start_id, &table(), today());

        let ids: Vec<i64> = rec
            .inserts
            .iter()
            .map(|s| s.params[0].as_i64().unwrap())
            .collect();
        let expected: Vec<i64> = (start_id..start_id + keys.len() as i64).collect();
        prop_assert_eq!(ids, expected);
        prop_assert_eq!(rec.next_id, start_id + keys.len() as i64);
        prop_assert!(rec.updates.is_empty());
    }

    #[test]
    fn classification_splits_rows_exactly(
        existing in arb_unique_symbols(),
        incoming in arb_unique_symbols(),
    ) {
        let existing_set: BTreeSet<SymbolKey> = existing.iter().cloned().collect();
        let rows: Vec<ListingRow> = incoming.iter().map(listing_row).collect();
        let rec = classify_and_render(&existing_set, &rows, 1, &table(), today());

        let expected_updates = incoming.iter().filter(|k| existing_set.contains(k)).count();
        prop_assert_eq!(rec.updates.len(), expected_updates);
        prop_assert_eq!(rec.updates.len() + rec.inserts.len(), incoming.len());

        // Updates never touch the identifier column.
        for stmt in &rec.updates {
            prop_assert!(!stmt.sql.contains("symbol_id"));
        }
    }

    // ── 3. Idempotence ──────────────────────────────────────────────

    #[test]
    fn rerun_after_persistence_inserts_nothing(keys in arb_unique_symbols()) {
        let rows: Vec<ListingRow> = keys.iter().map(listing_row).collect();
        let first = classify_and_render(&BTreeSet::new(), &rows, 1, &table(), today());

        let refreshed: BTreeSet<SymbolKey> = keys.iter().cloned().collect();
        let second = classify_and_render(&refreshed, &rows, first.next_id, &table(), today());

        prop_assert!(second.inserts.is_empty());
        prop_assert_eq!(second.updates.len(), rows.len());
        prop_assert_eq!(second.next_id, first.next_id);
    }
}

// ── max_identifier seeding ───────────────────────────────────────────

proptest! {
    #[test]
    fn max_identifier_is_the_maximum(ids in prop::collection::vec(1i64..10_000, 0..30)) {
        let records: Vec<SymbolRecord> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| SymbolRecord {
                symbol_id: *id,
                exchange_symbol: None,
                consolidated_symbol: SymbolKey::new(&format!("S{i}")),
                index_number: None,
                nasdaq_symbol: None,
                created_date: None,
            })
            .collect();

        let expected = ids.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(max_identifier(&records), expected);
    }
}
