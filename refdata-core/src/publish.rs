//! Versioned snapshot publishing.
//!
//! Writes `{base}_{YYYY_MM_DD}.csv.{version}` — version is one greater than
//! the highest suffix already present for that date — then repoints the
//! stable `{base}.csv` symlink at the new file. Consumers always read the
//! stable name; history stays on disk.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use polars::prelude::*;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("snapshot filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot write failed: {0}")]
    Csv(#[from] PolarsError),
}

/// Paths produced by one publish call.
#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    /// The dated, versioned file that was written.
    pub file: PathBuf,
    /// The stable symlink now pointing at `file`.
    pub link: PathBuf,
    pub version: u32,
}

/// Publish a snapshot dated today.
pub fn publish_snapshot(
    df: &mut DataFrame,
    dir: &Path,
    base: &str,
    separator: u8,
) -> Result<PublishedSnapshot, PublishError> {
    publish_snapshot_on(df, dir, base, separator, chrono::Local::now().date_naive())
}

/// Publish a snapshot for an explicit date.
pub fn publish_snapshot_on(
    df: &mut DataFrame,
    dir: &Path,
    base: &str,
    separator: u8,
    date: NaiveDate,
) -> Result<PublishedSnapshot, PublishError> {
    fs::create_dir_all(dir)?;

    let dated = format!("{base}_{}.csv", date.format("%Y_%m_%d"));
    let version = next_version(dir, &dated)?;
    let versioned = format!("{dated}.{version}");
    let file = dir.join(&versioned);

    let mut out = fs::File::create(&file)?;
    CsvWriter::new(&mut out)
        .with_separator(separator)
        .include_header(true)
        .finish(df)?;

    let link = dir.join(format!("{base}.csv"));
    if fs::symlink_metadata(&link).is_ok() {
        fs::remove_file(&link)?;
    }
    // Relative target keeps the snapshot directory relocatable.
    std::os::unix::fs::symlink(&versioned, &link)?;

    info!(file = %file.display(), version, "published snapshot");

    Ok(PublishedSnapshot {
        file,
        link,
        version,
    })
}

/// Next free version suffix for a dated file name: highest existing + 1,
/// or 0 when none exist.
fn next_version(dir: &Path, dated: &str) -> Result<u32, PublishError> {
    let mut highest: Option<u32> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(suffix) = name.strip_prefix(dated).and_then(|s| s.strip_prefix('.')) else {
            continue;
        };
        if let Ok(version) = suffix.parse::<u32>() {
            highest = Some(highest.map_or(version, |h| h.max(version)));
        }
    }

    Ok(highest.map_or(0, |h| h + 1))
}
