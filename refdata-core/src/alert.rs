//! Run-level alert digest.
//!
//! One `Alerter` is constructed per process run and passed to the pipeline
//! explicitly. Entries accumulate in order; the digest's severity marker is
//! the highest level seen, and error digests are wrapped in an emphasis
//! marker. The orchestrator sends the digest exactly once at the end of the
//! run, on the success and failure paths alike.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

/// Digest severity. Ordered so the highest entry level wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    Info,
    Warn,
    Error,
}

impl AlertLevel {
    fn label(self) -> &'static str {
        match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warn => "WARN",
            AlertLevel::Error => "ERROR",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            AlertLevel::Info => "🟢",
            AlertLevel::Warn => "🟡",
            AlertLevel::Error => "🔴",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert webhook returned status {0}")]
    Status(u16),
}

/// Accumulates leveled entries and delivers one digest per run.
pub struct Alerter {
    entries: Vec<(AlertLevel, String)>,
    level: AlertLevel,
    webhook_url: Option<String>,
}

impl Alerter {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            level: AlertLevel::Info,
            webhook_url,
        }
    }

    /// An alerter that only logs its digest, for disabled configurations.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(AlertLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(AlertLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(AlertLevel::Error, message.into());
    }

    fn push(&mut self, level: AlertLevel, message: String) {
        self.level = self.level.max(level);
        self.entries.push((level, message));
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the digest for an application name.
    pub fn render(&self, application: &str) -> String {
        let mut body = format!(
            "{} {application}\nAlert level: {}\n",
            self.level.marker(),
            self.level
        );
        for (level, message) in &self.entries {
            body.push_str(&format!("{level}: {message}\n"));
        }

        if self.level == AlertLevel::Error {
            format!("***\n{body}***")
        } else {
            body
        }
    }

    /// Deliver the digest once.
    ///
    /// Without a webhook the digest is logged and delivery succeeds; an
    /// empty digest is not sent at all.
    pub fn send(&self, application: &str) -> Result<(), AlertError> {
        if self.entries.is_empty() {
            debug!("no alert entries for {application}, nothing to send");
            return Ok(());
        }

        let digest = self.render(application);

        let Some(url) = &self.webhook_url else {
            info!("alert digest for {application} (no webhook configured):\n{digest}");
            return Ok(());
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let resp = client
            .post(url)
            .json(&serde_json::json!({ "text": digest }))
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }

        info!("alert digest for {application} delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_severity_is_the_highest_level_seen() {
        let mut alerter = Alerter::disabled();
        alerter.info("collected 100 symbols");
        alerter.warn("3 symbols missing");
        alerter.info("snapshot published");

        assert_eq!(alerter.level(), AlertLevel::Warn);
        let digest = alerter.render("collect");
        assert!(digest.starts_with("🟡 collect"));
        assert!(digest.contains("Alert level: WARN"));
    }

    #[test]
    fn entries_render_in_insertion_order() {
        let mut alerter = Alerter::disabled();
        alerter.info("first");
        alerter.warn("second");
        alerter.info("third");

        let digest = alerter.render("app");
        let first = digest.find("INFO: first").unwrap();
        let second = digest.find("WARN: second").unwrap();
        let third = digest.find("INFO: third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn error_digest_is_wrapped_in_emphasis() {
        let mut alerter = Alerter::disabled();
        alerter.error("pipeline failed");

        let digest = alerter.render("sync_universe");
        assert!(digest.starts_with("***\n"));
        assert!(digest.ends_with("***"));
        assert!(digest.contains("🔴 sync_universe"));
    }

    #[test]
    fn empty_digest_sends_nothing_and_succeeds() {
        let alerter = Alerter::disabled();
        assert!(alerter.send("app").is_ok());
    }

    #[test]
    fn send_without_webhook_logs_and_succeeds() {
        let mut alerter = Alerter::disabled();
        alerter.info("done");
        assert!(alerter.send("app").is_ok());
    }
}
