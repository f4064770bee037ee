//! Layered configuration: a TOML file plus `-D<dotted.path>=<value>`
//! command-line overrides.
//!
//! Overrides are applied to the raw TOML tree before typed deserialization,
//! and only when the path already exists in the file — an unrecognized
//! override is dropped with a warning, never an error. A missing or
//! unparseable file is fatal at startup, before any network or database
//! work begins.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use toml::Value;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("config path not found: {0}")]
    PathNotFound(String),

    #[error("invalid config value at {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("no API token configured: set collector.token or {0}")]
    MissingToken(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub universe: UniverseConfig,
    pub snapshots: SnapshotsConfig,
    pub collector: CollectorConfig,
    pub feeds: FeedsConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UniverseConfig {
    /// Universe table name within the database schema.
    pub table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotsConfig {
    /// Directory holding versioned snapshots and their stable symlinks.
    pub dir: PathBuf,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl SnapshotsConfig {
    /// The configured field separator as a single byte.
    pub fn separator_byte(&self) -> Result<u8, ConfigError> {
        match self.separator.as_bytes() {
            [b] => Ok(*b),
            _ => Err(ConfigError::Invalid {
                path: "snapshots.separator".to_string(),
                message: format!("expected a single character, got {:?}", self.separator),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    pub base_url: String,
    /// API credential; prefer `token_env` so the secret stays out of the file.
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    pub batch_size: usize,
    pub message_type: String,
    pub range: Option<String>,
    /// Target table for `collect --load`.
    pub quote_table: Option<String>,
}

impl CollectorConfig {
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        std::env::var(&self.token_env)
            .map_err(|_| ConfigError::MissingToken(self.token_env.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedsConfig {
    pub sources: Vec<FeedSource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSource {
    /// Snapshot base name, e.g. `arca` publishes `arca.csv`.
    pub name: String,
    pub url: String,
    pub kind: FeedKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Headerless exchange-mapping schema (NYSE/ARCA style).
    Exchange,
    /// Headered Nasdaq directory schema.
    Nasdaq,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertingConfig {
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

fn default_schema() -> String {
    "main".to_string()
}

fn default_separator() -> String {
    "|".to_string()
}

fn default_token_env() -> String {
    "REFDATA_API_TOKEN".to_string()
}

impl Config {
    pub fn load(path: &Path, overrides: &[String]) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&raw, overrides, &path.display().to_string())
    }

    pub fn from_toml(raw: &str, overrides: &[String], origin: &str) -> Result<Self, ConfigError> {
        let mut tree: Value = raw.parse().map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;

        apply_overrides(&mut tree, overrides);

        tree.try_into().map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })
    }
}

/// Resolve a dotted path in a TOML tree.
pub fn lookup<'a>(tree: &'a Value, dotted: &str) -> Result<&'a Value, ConfigError> {
    let mut current = tree;
    for part in dotted.split('.') {
        current = current
            .get(part)
            .ok_or_else(|| ConfigError::PathNotFound(dotted.to_string()))?;
    }
    Ok(current)
}

/// Apply `path=value` overrides to the raw tree.
///
/// Values parse as integer, then boolean, then fall back to string. Entries
/// without `=` or naming a path absent from the file are warned about and
/// dropped.
fn apply_overrides(tree: &mut Value, overrides: &[String]) {
    for raw in overrides {
        let Some((path, text)) = raw.split_once('=') else {
            warn!("override '{raw}' is not of the form <dotted.path>=<value>, ignoring");
            continue;
        };

        let value = parse_override_value(text);
        if set_existing(tree, path, value) {
            info!("config override applied: {path} = {text}");
        } else {
            warn!("override path '{path}' is not in the config file, ignoring");
        }
    }
}

fn parse_override_value(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        Value::Integer(i)
    } else if let Ok(b) = text.parse::<bool>() {
        Value::Boolean(b)
    } else {
        Value::String(text.to_string())
    }
}

/// Set a dotted path only if it already exists; returns whether it did.
fn set_existing(tree: &mut Value, dotted: &str, new: Value) -> bool {
    let (parent_path, key) = match dotted.rsplit_once('.') {
        Some((parent, key)) => (Some(parent), key),
        None => (None, dotted),
    };

    let mut current = tree;
    if let Some(parent_path) = parent_path {
        for part in parent_path.split('.') {
            match current.get_mut(part) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    match current.as_table_mut() {
        Some(table) if table.contains_key(key) => {
            table.insert(key.to_string(), new);
            true
        }
        _ => false,
    }
}
