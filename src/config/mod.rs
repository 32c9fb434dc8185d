//! Configuration module for PageProbe
//!
//! This module handles loading, parsing, and validating the TOML configuration
//! shared by the server and worker processes.
//!
//! # Example
//!
//! ```no_run
//! use pageprobe::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("pageprobe.toml")).unwrap();
//! println!("Worker concurrency: {}", config.worker.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FetcherConfig, NotifierConfig, OrchestratorConfig, ServerConfig, StorageConfig,
    UserAgentConfig, WorkerConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
