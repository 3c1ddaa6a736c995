use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use organiser_worker::config::load_config;
///
/// let config = load_config(Path::new("config.toml")).unwrap();
/// println!("Database: {}", config.storage.database_path);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    // Read the configuration file
    let content = std::fs::read_to_string(path)?;

    // Parse TOML
    let config: Config = toml::from_str(&content)?;

    // Validate the configuration
    validate(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const VALID_CONFIG: &str = r#"
[worker]
poll-interval-ms = 5000

[fwc]
search-base-url = "https://www.fwc.gov.au/document-search"

[incolink]
portal-url = "https://compliancelink.incolink.org.au"
email = "ops@example.com"
password = "secret"

[storage]
database-path = "./worker.db"
"#;

    #[test]
    fn test_load_valid_config_with_defaults() {
        let file = create_temp_config(VALID_CONFIG);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.worker.poll_interval_ms, 5000);
        assert_eq!(config.worker.reserve_batch_size, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.fwc.result_limit, 15);
        assert_eq!(config.fwc.query_prefix, "enterprise agreement");
        assert!(config.browser.headless);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        // Zero poll interval busy-loops against the shared table
        let bad = VALID_CONFIG.replace("poll-interval-ms = 5000", "poll-interval-ms = 0");
        let file = create_temp_config(&bad);
        let result = load_config(file.path());
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }
}
