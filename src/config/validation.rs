use crate::config::types::{
    BrowserConfig, Config, FwcConfig, IncolinkConfig, RetryConfig, WorkerConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_worker_config(&config.worker, &config.browser)?;
    validate_retry_config(&config.retry)?;
    validate_fwc_config(&config.fwc)?;
    validate_incolink_config(&config.incolink)?;
    validate_browser_config(&config.browser)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates worker loop configuration
fn validate_worker_config(config: &WorkerConfig, browser: &BrowserConfig) -> Result<(), ConfigError> {
    if config.poll_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 100ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    if config.reserve_batch_size < 1 || config.reserve_batch_size > 100 {
        return Err(ConfigError::Validation(format!(
            "reserve_batch_size must be between 1 and 100, got {}",
            config.reserve_batch_size
        )));
    }

    if config.lock_timeout_ms < config.cleanup_interval_ms {
        return Err(ConfigError::Validation(format!(
            "lock_timeout_ms ({}) must not be shorter than cleanup_interval_ms ({})",
            config.lock_timeout_ms, config.cleanup_interval_ms
        )));
    }

    // A lock timeout close to a single navigation timeout means another
    // worker's cleanup pass can reclaim a job that is still being processed.
    if config.lock_timeout_ms < browser.navigation_timeout_ms * 5 {
        tracing::warn!(
            "lock_timeout_ms ({}) is less than 5x the navigation timeout ({}); \
             a slow job may be reclaimed while still running",
            config.lock_timeout_ms,
            browser.navigation_timeout_ms
        );
    }

    Ok(())
}

/// Validates retry/backoff configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter) {
        return Err(ConfigError::Validation(format!(
            "retry jitter must be between 0.0 and 1.0, got {}",
            config.jitter
        )));
    }

    if config.initial_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry initial_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.initial_delay_ms, config.max_delay_ms
        )));
    }

    Ok(())
}

/// Validates FWC search configuration
fn validate_fwc_config(config: &FwcConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.search_base_url)
        .map_err(|_| ConfigError::InvalidUrl(config.search_base_url.clone()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(config.search_base_url.clone()));
    }

    if config.page_size < 1 {
        return Err(ConfigError::Validation(format!(
            "fwc page_size must be >= 1, got {}",
            config.page_size
        )));
    }

    if config.result_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "fwc result_limit must be >= 1, got {}",
            config.result_limit
        )));
    }

    Ok(())
}

/// Validates Incolink portal configuration
fn validate_incolink_config(config: &IncolinkConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.portal_url)
        .map_err(|_| ConfigError::InvalidUrl(config.portal_url.clone()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(config.portal_url.clone()));
    }

    if config.email.is_empty() {
        return Err(ConfigError::Validation(
            "incolink email cannot be empty".to_string(),
        ));
    }

    if config.password.is_empty() {
        return Err(ConfigError::Validation(
            "incolink password cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates browser configuration
fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.navigation_timeout_ms < 1000 {
        return Err(ConfigError::Validation(format!(
            "navigation_timeout_ms must be >= 1000ms, got {}ms",
            config.navigation_timeout_ms
        )));
    }

    if config.dom_wait_timeout_ms < 1000 {
        return Err(ConfigError::Validation(format!(
            "dom_wait_timeout_ms must be >= 1000ms, got {}ms",
            config.dom_wait_timeout_ms
        )));
    }

    Ok(())
}
