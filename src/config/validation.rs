use crate::config::types::{
    Config, FetcherConfig, NotifierConfig, OrchestratorConfig, ServerConfig, StorageConfig,
    UserAgentConfig, WorkerConfig,
};
use crate::ConfigError;
use std::net::SocketAddr;
use url::Url;

/// Longest accepted attempt, overall or heartbeat timeout (one day)
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Longest accepted backoff cap (one hour)
const MAX_BACKOFF_SECS: u64 = 3_600;

/// Longest accepted start delay, initial backoff or poll interval (one hour)
const MAX_DELAY_MS: u64 = 3_600_000;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_worker_config(&config.worker)?;
    validate_orchestrator_config(&config.orchestrator)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_notifier_config(&config.notifier)?;
    validate_storage_config(&config.storage)?;
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    config
        .bind
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidBind(format!("'{}': {}", config.bind, e)))?;
    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "worker concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.poll_interval_ms < 100 || config.poll_interval_ms > MAX_DELAY_MS {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be between 100ms and {}ms, got {}ms",
            MAX_DELAY_MS, config.poll_interval_ms
        )));
    }

    Ok(())
}

/// Validates the retry, timeout and liveness policy
fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.attempt_timeout_secs == 0 || config.overall_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "attempt and overall timeouts must be non-zero".to_string(),
        ));
    }

    if config.overall_timeout_secs > MAX_TIMEOUT_SECS
        || config.heartbeat_timeout_secs > MAX_TIMEOUT_SECS
    {
        return Err(ConfigError::Validation(format!(
            "overall and heartbeat timeouts must not exceed {}s",
            MAX_TIMEOUT_SECS
        )));
    }

    if config.max_backoff_secs > MAX_BACKOFF_SECS {
        return Err(ConfigError::Validation(format!(
            "max_backoff_secs must not exceed {}, got {}",
            MAX_BACKOFF_SECS, config.max_backoff_secs
        )));
    }

    if config.start_delay_ms > MAX_DELAY_MS
        || config.initial_backoff_ms > MAX_DELAY_MS
        || config.cancel_poll_interval_ms > MAX_DELAY_MS
    {
        return Err(ConfigError::Validation(format!(
            "start_delay_ms, initial_backoff_ms and cancel_poll_interval_ms must not exceed {}ms",
            MAX_DELAY_MS
        )));
    }

    if config.attempt_timeout_secs > config.overall_timeout_secs {
        return Err(ConfigError::Validation(format!(
            "attempt_timeout_secs ({}) cannot exceed overall_timeout_secs ({})",
            config.attempt_timeout_secs, config.overall_timeout_secs
        )));
    }

    if config.heartbeat_interval_secs == 0
        || config.heartbeat_interval_secs >= config.heartbeat_timeout_secs
    {
        return Err(ConfigError::Validation(format!(
            "heartbeat_interval_secs ({}) must be non-zero and below heartbeat_timeout_secs ({})",
            config.heartbeat_interval_secs, config.heartbeat_timeout_secs
        )));
    }

    if config.backoff_coefficient < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_coefficient must be >= 1.0, got {}",
            config.backoff_coefficient
        )));
    }

    if config.cancel_poll_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "cancel_poll_interval_ms must be >= 100ms, got {}ms",
            config.cancel_poll_interval_ms
        )));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.page_timeout_secs == 0 || config.probe_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "page and probe timeouts must be non-zero".to_string(),
        ));
    }

    if config.probe_concurrency < 1 || config.probe_concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "probe_concurrency must be between 1 and 64, got {}",
            config.probe_concurrency
        )));
    }

    if config.heartbeat_every_links == 0 {
        return Err(ConfigError::Validation(
            "heartbeat_every_links must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_notifier_config(config: &NotifierConfig) -> Result<(), ConfigError> {
    let relay = Url::parse(&config.relay_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid relay_url: {}", e)))?;

    if relay.scheme() != "http" && relay.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "relay_url must use http or https, got '{}'",
            config.relay_url
        )));
    }

    if config.keepalive_secs == 0 {
        return Err(ConfigError::Validation(
            "keepalive_secs must be >= 1".to_string(),
        ));
    }

    if config.channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "channel_capacity must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_bind_address_must_parse() {
        let mut server = ServerConfig::default();
        assert!(validate_server_config(&server).is_ok());

        server.bind = "localhost".to_string();
        assert!(matches!(
            validate_server_config(&server),
            Err(ConfigError::InvalidBind(_))
        ));
    }

    #[test]
    fn test_heartbeat_interval_below_timeout() {
        let mut config = OrchestratorConfig::default();
        assert!(validate_orchestrator_config(&config).is_ok());

        config.heartbeat_interval_secs = config.heartbeat_timeout_secs;
        assert!(validate_orchestrator_config(&config).is_err());
    }

    #[test]
    fn test_attempt_timeout_within_overall() {
        let mut config = OrchestratorConfig::default();
        config.attempt_timeout_secs = config.overall_timeout_secs + 1;
        assert!(validate_orchestrator_config(&config).is_err());
    }

    #[test]
    fn test_timeouts_and_backoff_are_capped() {
        let mut config = OrchestratorConfig::default();
        config.overall_timeout_secs = u64::MAX;
        config.attempt_timeout_secs = u64::MAX;
        assert!(validate_orchestrator_config(&config).is_err());

        let mut config = OrchestratorConfig::default();
        config.max_backoff_secs = u64::MAX;
        assert!(validate_orchestrator_config(&config).is_err());

        let mut config = OrchestratorConfig::default();
        config.heartbeat_timeout_secs = MAX_TIMEOUT_SECS + 1;
        assert!(validate_orchestrator_config(&config).is_err());

        let mut config = OrchestratorConfig::default();
        config.start_delay_ms = u64::MAX;
        assert!(validate_orchestrator_config(&config).is_err());

        let mut config = OrchestratorConfig::default();
        config.overall_timeout_secs = MAX_TIMEOUT_SECS;
        config.attempt_timeout_secs = MAX_TIMEOUT_SECS;
        config.max_backoff_secs = MAX_BACKOFF_SECS;
        assert!(validate_orchestrator_config(&config).is_ok());
    }

    #[test]
    fn test_backoff_with_huge_cap_does_not_overflow() {
        let config = OrchestratorConfig {
            max_backoff_secs: u64::MAX,
            backoff_coefficient: 10.0,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.backoff_after(1).as_millis(), 1000);
        assert!(config.backoff_after(500) >= config.backoff_after(2));
    }

    #[test]
    fn test_backoff_coefficient_lower_bound() {
        let mut config = OrchestratorConfig::default();
        config.backoff_coefficient = 0.5;
        assert!(validate_orchestrator_config(&config).is_err());
    }

    #[test]
    fn test_relay_url_scheme() {
        let mut config = NotifierConfig::default();
        assert!(validate_notifier_config(&config).is_ok());

        config.relay_url = "ftp://127.0.0.1/notify".to_string();
        assert!(validate_notifier_config(&config).is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.backoff_after(1).as_millis(), 1000);
        assert_eq!(config.backoff_after(2).as_millis(), 2000);
        assert_eq!(config.backoff_after(3).as_millis(), 4000);
        assert_eq!(config.backoff_after(30).as_secs(), 60);
    }
}
