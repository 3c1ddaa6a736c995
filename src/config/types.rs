use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the worker
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub fwc: FwcConfig,
    pub incolink: IncolinkConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    pub storage: StorageConfig,
}

/// Worker loop behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Delay between empty polls of the job table (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Maximum candidate rows considered per reservation pass
    #[serde(rename = "reserve-batch-size", default = "default_reserve_batch")]
    pub reserve_batch_size: u32,

    /// Age after which a running job's lock is considered stale (milliseconds)
    #[serde(rename = "lock-timeout-ms", default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// How often the stale-lock recovery pass runs (milliseconds)
    #[serde(rename = "cleanup-interval-ms", default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,

    /// How long shutdown waits for an in-flight job before force-requeueing it
    #[serde(
        rename = "graceful-shutdown-timeout-ms",
        default = "default_shutdown_timeout"
    )]
    pub graceful_shutdown_timeout_ms: u64,

    /// Politeness delay between employers within one job (milliseconds)
    #[serde(rename = "employer-delay-ms", default = "default_employer_delay")]
    pub employer_delay_ms: u64,
}

/// Retry/backoff policy applied when a failed job is requeued
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Default max attempts for jobs that do not carry their own
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(rename = "initial-delay-ms", default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on the retry delay (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Multiplier applied per additional attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter fraction (0.0 - 1.0) applied to the computed delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// FWC document-search configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FwcConfig {
    /// Base URL of the public document-search endpoint
    #[serde(rename = "search-base-url")]
    pub search_base_url: String,

    /// Fixed phrase prepended to prefixed query candidates
    #[serde(rename = "query-prefix", default = "default_query_prefix")]
    pub query_prefix: String,

    /// Results requested per search page
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    /// Maximum results carried into event logs per employer
    #[serde(rename = "result-limit", default = "default_result_limit")]
    pub result_limit: usize,

    /// HTTP request timeout (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

/// Incolink portal configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IncolinkConfig {
    /// Portal login URL
    #[serde(rename = "portal-url")]
    pub portal_url: String,

    /// Portal account email
    pub email: String,

    /// Portal account password
    pub password: String,
}

/// Browser automation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Run the browser without a visible window
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Page navigation timeout (milliseconds)
    #[serde(
        rename = "navigation-timeout-ms",
        default = "default_navigation_timeout"
    )]
    pub navigation_timeout_ms: u64,

    /// DOM wait timeout for selectors/tables (milliseconds)
    #[serde(rename = "dom-wait-timeout-ms", default = "default_dom_wait_timeout")]
    pub dom_wait_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            navigation_timeout_ms: default_navigation_timeout(),
            dom_wait_timeout_ms: default_dom_wait_timeout(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the shared SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }

    pub fn employer_delay(&self) -> Duration {
        Duration::from_millis(self.employer_delay_ms)
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn dom_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.dom_wait_timeout_ms)
    }
}

fn default_reserve_batch() -> u32 {
    5
}

fn default_lock_timeout() -> u64 {
    30 * 60 * 1000
}

fn default_cleanup_interval() -> u64 {
    5 * 60 * 1000
}

fn default_shutdown_timeout() -> u64 {
    5 * 60 * 1000
}

fn default_employer_delay() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    5000
}

fn default_max_delay() -> u64 {
    5 * 60 * 1000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_query_prefix() -> String {
    "enterprise agreement".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_result_limit() -> usize {
    15
}

fn default_request_timeout() -> u64 {
    45_000
}

fn default_headless() -> bool {
    true
}

fn default_navigation_timeout() -> u64 {
    60_000
}

fn default_dom_wait_timeout() -> u64 {
    25_000
}
