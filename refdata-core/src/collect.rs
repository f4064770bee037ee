//! Remote batch quote client.
//!
//! One blocking GET per batch against a quote/reference API, normalizing the
//! response — a single object, a list of objects, or null per symbol — into
//! a flat row collection. A batch whose request fails is absorbed: its
//! symbols are reported as missing and the remaining batches still run.
//!
//! The `QuoteApi` trait abstracts the transport so pipelines and tests can
//! swap implementations.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use polars::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::Batch;
use crate::universe::SymbolKey;

/// One collected row: field name → raw JSON value, tagged with a `symbol`
/// field naming the key it was returned for.
pub type CollectedRow = serde_json::Map<String, Value>;

/// Raw batch response: symbol → message type → payload.
pub type BatchPayload = HashMap<String, HashMap<String, Value>>;

/// Transport-level failures. Absorbed at the batch level by [`collect`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("non-success status {0}")]
    Status(u16),

    #[error("response decode failed: {0}")]
    Decode(String),
}

/// A quote/reference API queried one batch at a time.
pub trait QuoteApi {
    /// Issue one request for the comma-joined `symbols`, returning the raw
    /// per-symbol payload for `message`.
    fn fetch_batch(
        &self,
        symbols: &str,
        message: &str,
        range: Option<&str>,
    ) -> Result<BatchPayload, TransportError>;
}

/// Blocking HTTP client for an IEX-style batch quote endpoint.
pub struct HttpQuoteClient {
    client: reqwest::blocking::Client,
    base_url: String,
    token: String,
}

impl HttpQuoteClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

impl QuoteApi for HttpQuoteClient {
    fn fetch_batch(
        &self,
        symbols: &str,
        message: &str,
        range: Option<&str>,
    ) -> Result<BatchPayload, TransportError> {
        let mut query: Vec<(&str, &str)> = vec![
            ("symbols", symbols),
            ("types", message),
            ("token", &self.token),
        ];
        if let Some(range) = range {
            query.push(("range", range));
        }

        let resp = self.client.get(&self.base_url).query(&query).send()?;
        let status = resp.status();
        debug!(%status, symbols, "batch quote request");

        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        resp.json::<BatchPayload>()
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Rows and missing symbols gathered from one or more batches.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub rows: Vec<CollectedRow>,
    pub missing: BTreeSet<SymbolKey>,
}

/// Collect one batch, absorbing any transport failure.
///
/// On failure the whole batch is reported missing and no error escapes.
/// On success, each symbol's payload contributes one row per object; a
/// symbol mapping to null, an absent key, or an empty list is missing.
pub fn collect(
    api: &dyn QuoteApi,
    batch: &Batch,
    message: &str,
    range: Option<&str>,
) -> BatchOutcome {
    let joined = batch
        .iter()
        .map(SymbolKey::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let payload = match api.fetch_batch(&joined, message, range) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(symbols = %joined, error = %e, "batch request failed, recording symbols as missing");
            return BatchOutcome {
                rows: Vec::new(),
                missing: batch.iter().cloned().collect(),
            };
        }
    };

    let mut rows = Vec::new();
    let mut missing: BTreeSet<SymbolKey> = BTreeSet::new();

    // Walk the requested keys rather than the response map: row order stays
    // deterministic and unrequested symbols in the response are ignored.
    for key in batch {
        let value = payload
            .get(key.as_str())
            .and_then(|messages| messages.get(message));

        let objects: Vec<&serde_json::Map<String, Value>> = match value {
            Some(Value::Object(obj)) => vec![obj],
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(symbol = %key, "unexpected payload shape: {other}");
                Vec::new()
            }
        };

        if objects.is_empty() {
            missing.insert(key.clone());
            continue;
        }

        for obj in objects {
            let mut row = obj.clone();
            row.insert("symbol".to_string(), Value::String(key.as_str().to_string()));
            rows.push(row);
        }
    }

    BatchOutcome { rows, missing }
}

/// Collect every batch in order, concatenating rows and unioning missing
/// symbols. A failed batch never aborts the rest.
pub fn collect_all(
    api: &dyn QuoteApi,
    batches: &[Batch],
    message: &str,
    range: Option<&str>,
) -> BatchOutcome {
    let mut total = BatchOutcome::default();

    for (i, batch) in batches.iter().enumerate() {
        let outcome = collect(api, batch, message, range);
        info!(
            batch = i + 1,
            batches = batches.len(),
            rows = outcome.rows.len(),
            missing = outcome.missing.len(),
            "collected batch"
        );
        total.rows.extend(outcome.rows);
        total.missing.extend(outcome.missing);
    }

    total
}

/// Build a DataFrame from collected rows for snapshot backup.
///
/// Columns are the union of field names in first-seen order; values are
/// rendered as strings with JSON nulls left null.
pub fn rows_to_dataframe(rows: &[CollectedRow]) -> PolarsResult<DataFrame> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for field in row.keys() {
            if !columns.iter().any(|c| c == field) {
                columns.push(field.clone());
            }
        }
    }

    let series: Vec<Column> = columns
        .iter()
        .map(|name| {
            let values: Vec<Option<String>> = rows
                .iter()
                .map(|row| match row.get(name) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                })
                .collect();
            Column::new(name.as_str().into(), values)
        })
        .collect();

    DataFrame::new(series)
}
