use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the browser automation layer
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation failed for {url}: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {0:?} waiting for {1}")]
    WaitTimeout(Duration, String),

    #[error("DOM operation failed: {0}")]
    Dom(String),

    #[error("Browser session closed")]
    Closed,
}

/// A table (or ARIA grid) row as seen by the extraction code
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableRow {
    /// Whitespace-normalized full row text
    pub text: String,

    /// Trimmed text of every anchor inside the row
    #[serde(default)]
    pub link_texts: Vec<String>,
}

/// A launched browser instance
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a fresh page
    async fn new_page(&self) -> Result<Box<dyn Page>, BrowserError>;

    /// Shuts the browser down
    async fn close(&self) -> Result<(), BrowserError>;
}

/// A single browser page (tab)
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to a URL, bounded by the given timeout
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Current page URL, best effort (empty when unavailable)
    async fn current_url(&self) -> String;

    /// Current page title, best effort
    async fn title(&self) -> String;

    /// Full page HTML
    async fn content(&self) -> Result<String, BrowserError>;

    /// Waits for the next navigation to settle
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Waits until any of the selectors matches in any frame.
    ///
    /// Best effort: returns false on timeout rather than erroring, since
    /// some portal screens render the data without the expected container.
    async fn wait_for_any(&self, selectors: &[String], timeout: Duration) -> bool;

    /// All frames on the page, main frame first, nested frames in
    /// document order
    async fn frames(&self) -> Result<Vec<Box<dyn Frame>>, BrowserError>;

    /// Closes the page
    async fn close_page(&self) -> Result<(), BrowserError>;
}

/// DOM operations scoped to one frame.
///
/// Every operation that targets an element returns whether a match was
/// found; absent elements are an expected condition when probing selector
/// candidates, not an error.
#[async_trait]
pub trait Frame: Send + Sync {
    /// True if the selector matches at least one element
    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Clears the first matching input and types text into it
    async fn fill(&self, selector: &str, text: &str) -> Result<bool, BrowserError>;

    /// Dispatches an Enter keypress to the first matching element
    async fn press_enter(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Clicks the first matching element
    async fn click(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Clicks the first anchor whose trimmed text equals `text`
    async fn click_link_by_text(&self, text: &str) -> Result<bool, BrowserError>;

    /// Trimmed text content of every element matching the selector
    async fn texts(&self, selector: &str) -> Result<Vec<String>, BrowserError>;

    /// Row text and contained link texts for every element matching the
    /// selector (rows of a table or an ARIA grid)
    async fn table_rows(&self, selector: &str) -> Result<Vec<TableRow>, BrowserError>;

    /// All visible text in the frame
    async fn all_text(&self) -> Result<String, BrowserError>;

    /// Checkbox state of the first match; `None` when no element matches
    async fn is_checked(&self, selector: &str) -> Result<Option<bool>, BrowserError>;
}
