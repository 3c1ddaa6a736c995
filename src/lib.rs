//! Organiser-Worker: a background scraping job worker
//!
//! This crate implements a single-process worker that polls a shared relational
//! job table for scraping tasks (`fwc_lookup`, `incolink_sync`), claims jobs via
//! optimistic locking, runs the matching scraping pipeline against the external
//! site, and writes results back into the domain tables.

pub mod browser;
pub mod config;
pub mod fwc;
pub mod incolink;
pub mod storage;
pub mod worker;

use thiserror::Error;

/// Main error type for worker operations
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid job payload for {job_type}: {message}")]
    InvalidPayload { job_type: String, message: String },

    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Pipeline stage at which a scraping failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeStage {
    Search,
    Parse,
    Login,
    EmployerLookup,
    InvoiceSelection,
    Extraction,
    Persistence,
}

impl ScrapeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Parse => "parse",
            Self::Login => "login",
            Self::EmployerLookup => "employer_lookup",
            Self::InvoiceSelection => "invoice_selection",
            Self::Extraction => "extraction",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ScrapeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic context captured at the point a scrape fails.
///
/// All fields are best-effort: whatever could still be read from the page
/// when the failure surfaced. The HTML sample is truncated so event
/// payloads stay a reasonable size.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScrapeContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_sample: Option<String>,
}

/// Maximum length of the HTML sample carried in a [`ScrapeContext`]
const HTML_SAMPLE_LIMIT: usize = 500;

impl ScrapeContext {
    /// Attaches a truncated HTML sample
    pub fn with_html_sample(mut self, html: &str) -> Self {
        let sample: String = html.chars().take(HTML_SAMPLE_LIMIT).collect();
        self.html_sample = Some(sample);
        self
    }
}

/// A scraping failure tagged with the stage it occurred at and the
/// diagnostic context captured from the live page.
#[derive(Debug, Error)]
#[error("Scrape failed at {stage}: {message}")]
pub struct ScrapeError {
    pub stage: ScrapeStage,
    pub message: String,
    pub context: ScrapeContext,
}

impl ScrapeError {
    pub fn new(stage: ScrapeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            context: ScrapeContext::default(),
        }
    }

    pub fn with_context(mut self, context: ScrapeContext) -> Self {
        self.context = context;
        self
    }

    /// Audit-event payload: the captured context plus the stage the
    /// failure occurred at
    pub fn event_payload(&self) -> serde_json::Value {
        let mut value =
            serde_json::to_value(&self.context).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "stage".to_string(),
                serde_json::Value::String(self.stage.to_string()),
            );
        }
        value
    }
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use storage::{JobPayload, JobStatus, JobType, ScraperJob, SqliteStorage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrape_context_truncates_html_sample() {
        let html = "x".repeat(HTML_SAMPLE_LIMIT * 2);
        let ctx = ScrapeContext::default().with_html_sample(&html);
        assert_eq!(ctx.html_sample.unwrap().len(), HTML_SAMPLE_LIMIT);
    }

    #[test]
    fn scrape_error_event_payload_carries_stage() {
        let err = ScrapeError::new(ScrapeStage::Search, "no results")
            .with_context(ScrapeContext::default().with_html_sample("<html></html>"));
        let payload = err.event_payload();
        assert_eq!(payload["stage"], "search");
        assert_eq!(payload["html_sample"], "<html></html>");
    }

    #[test]
    fn scrape_error_display_names_stage() {
        let err = ScrapeError::new(ScrapeStage::InvoiceSelection, "no invoice link");
        assert_eq!(
            err.to_string(),
            "Scrape failed at invoice_selection: no invoice link"
        );
    }
}
