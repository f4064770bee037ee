//! Partitioning a symbol set into bounded request batches.

use thiserror::Error;
use tracing::debug;

use crate::universe::SymbolKey;

/// An ordered, non-empty group of symbols submitted in one remote request.
pub type Batch = Vec<SymbolKey>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch size must be positive, got {0}")]
    InvalidBatchSize(usize),
}

/// Split `symbols` into batches of at most `batch_size`, preserving order.
///
/// Produces `ceil(n / batch_size)` batches; every batch but the last has
/// exactly `batch_size` members. Each symbol lands in exactly one batch.
pub fn partition(symbols: &[SymbolKey], batch_size: usize) -> Result<Vec<Batch>, BatchError> {
    if batch_size == 0 {
        return Err(BatchError::InvalidBatchSize(batch_size));
    }

    let batches: Vec<Batch> = symbols
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect();

    debug!(
        symbols = symbols.len(),
        batch_size,
        batches = batches.len(),
        "partitioned symbols into batches"
    );

    Ok(batches)
}
