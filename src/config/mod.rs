//! Configuration module for the organiser worker
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use organiser_worker::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Poll interval: {}ms", config.worker.poll_interval_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, FwcConfig, IncolinkConfig, RetryConfig, StorageConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::load_config;
