use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
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
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so server and worker can be checked for running
/// against the same configuration.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[user-agent]
crawler-name = "PageProbe"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[storage]
database-path = "./pageprobe.db"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:7070");
        assert!(!config.server.embedded_worker);
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.orchestrator.max_attempts, 3);
        assert_eq!(config.orchestrator.heartbeat_timeout_secs, 30);
        assert_eq!(config.fetcher.max_redirects, 5);
        assert_eq!(config.notifier.keepalive_secs, 30);
        assert_eq!(config.notifier.channel_capacity, 10);
    }

    #[test]
    fn test_load_full_config() {
        let content = format!(
            r#"{MINIMAL}
[server]
bind = "0.0.0.0:9000"
embedded-worker = true

[worker]
concurrency = 2
poll-interval-ms = 750

[orchestrator]
max-attempts = 5
attempt-timeout-secs = 120
overall-timeout-secs = 300

[fetcher]
probe-timeout-secs = 3
probe-concurrency = 16

[notifier]
relay-url = "http://127.0.0.1:9000/api/v1/internal/notify-crawl-update"
keepalive-secs = 15
"#
        );

        let file = create_temp_config(&content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert!(config.server.embedded_worker);
        assert_eq!(config.worker.concurrency, 2);
        assert_eq!(config.orchestrator.max_attempts, 5);
        assert_eq!(config.fetcher.probe_concurrency, 16);
        assert_eq!(config.notifier.keepalive_secs, 15);
        assert_eq!(config.user_agent.crawler_name, "PageProbe");
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/pageprobe.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_storage_section_is_rejected() {
        let content = r#"
[user-agent]
crawler-name = "PageProbe"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"
"#;
        assert!(matches!(parse_config(content), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_validation_error_surfaces() {
        let content = format!("{MINIMAL}\n[worker]\nconcurrency = 0\n");
        assert!(matches!(
            parse_config(&content),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config(MINIMAL);

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
