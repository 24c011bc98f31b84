use crate::config::types::{
    Config, CrawlConfig, EgressConfig, OutputConfig, PacingConfig, SessionConfig, TargetEntry,
    WriteMode,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_session_config(&config.session)?;
    validate_crawl_config(&config.crawl)?;
    validate_pacing_config(&config.pacing)?;
    validate_egress_config(&config.egress)?;
    validate_output_config(&config.output)?;
    validate_targets(&config.targets)?;
    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base-url must use http or https, got '{}'",
            config.base_url
        )));
    }

    if let Some(referer) = &config.referer {
        Url::parse(referer)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid referer: {}", e)))?;
    }

    Ok(())
}

/// Validates stream bounds
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_list_pages < 1 {
        return Err(ConfigError::Validation(
            "max-list-pages must be >= 1".to_string(),
        ));
    }

    if config.max_comment_pages < 1 {
        return Err(ConfigError::Validation(
            "max-comment-pages must be >= 1".to_string(),
        ));
    }

    if config.request_timeout < 1 {
        return Err(ConfigError::Validation(
            "request-timeout must be >= 1s".to_string(),
        ));
    }

    Ok(())
}

/// Validates pacing thresholds
fn validate_pacing_config(config: &PacingConfig) -> Result<(), ConfigError> {
    if config.min_page_gap < 1 {
        return Err(ConfigError::Validation(
            "min-page-gap must be >= 1".to_string(),
        ));
    }

    if config.min_page_gap > config.max_page_gap {
        return Err(ConfigError::Validation(format!(
            "min-page-gap ({}) must not exceed max-page-gap ({})",
            config.min_page_gap, config.max_page_gap
        )));
    }

    validate_wait_range("wait", config.min_wait, config.max_wait)?;
    validate_wait_range(
        "failure-wait",
        config.min_failure_wait,
        config.max_failure_wait,
    )?;

    if config.max_consecutive_failures < 1 {
        return Err(ConfigError::Validation(
            "max-consecutive-failures must be >= 1".to_string(),
        ));
    }

    if config.global_wait.is_empty() {
        return Err(ConfigError::Validation(
            "global-wait must contain at least one entry".to_string(),
        ));
    }

    if let Some(entry) = config.global_wait.iter().find(|e| e.pages < 1) {
        return Err(ConfigError::Validation(format!(
            "global-wait entry pages must be >= 1, got {} (wait {}s)",
            entry.pages, entry.wait
        )));
    }

    Ok(())
}

fn validate_wait_range(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
    if !min.is_finite() || !max.is_finite() || min < 0.0 {
        return Err(ConfigError::Validation(format!(
            "min-{name} and max-{name} must be finite and non-negative"
        )));
    }

    if min > max {
        return Err(ConfigError::Validation(format!(
            "min-{name} ({min}) must not exceed max-{name} ({max})"
        )));
    }

    Ok(())
}

/// Validates egress pool configuration
fn validate_egress_config(config: &EgressConfig) -> Result<(), ConfigError> {
    for candidate in &config.candidates {
        validate_proxy_url(candidate)?;
    }

    if config.probe_targets.is_empty() {
        return Err(ConfigError::Validation(
            "probe-targets must contain at least one URL".to_string(),
        ));
    }

    for target in &config.probe_targets {
        Url::parse(target).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid probe target '{}': {}", target, e))
        })?;
    }

    if config.probe_timeout < 1 {
        return Err(ConfigError::Validation(
            "probe-timeout must be >= 1s".to_string(),
        ));
    }

    if config.max_retries < 1 {
        return Err(ConfigError::Validation(
            "max-retries must be >= 1".to_string(),
        ));
    }

    if config.refresh_interval < 1 {
        return Err(ConfigError::Validation(
            "refresh-interval must be >= 1s".to_string(),
        ));
    }

    if config.lease_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "lease-timeout-ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates a proxy candidate URL
fn validate_proxy_url(candidate: &str) -> Result<(), ConfigError> {
    let url = Url::parse(candidate).map_err(|e| {
        ConfigError::InvalidUrl(format!("Invalid egress candidate '{}': {}", candidate, e))
    })?;

    match url.scheme() {
        "http" | "https" | "socks5" | "socks5h" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "Egress candidate '{}' has unsupported scheme '{}'",
                candidate, other
            )))
        }
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Egress candidate '{}' has no host",
            candidate
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.write_mode.is_empty() {
        return Err(ConfigError::Validation(
            "write-mode must enable at least one sink".to_string(),
        ));
    }

    if config.write_mode.contains(&WriteMode::Csv) && config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "directory cannot be empty when csv output is enabled".to_string(),
        ));
    }

    if config.write_mode.contains(&WriteMode::Sqlite) && config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty when sqlite output is enabled".to_string(),
        ));
    }

    Ok(())
}

/// Validates target ids
fn validate_targets(targets: &[TargetEntry]) -> Result<(), ConfigError> {
    for target in targets {
        validate_target_id(&target.id)?;
    }
    Ok(())
}

/// Validates a single target id (also used for ids given on the command line)
pub fn validate_target_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation(
            "target id cannot be empty".to_string(),
        ));
    }

    if !id.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
        return Err(ConfigError::Validation(format!(
            "target id must contain only alphanumeric characters, '_' or '-', got '{}'",
            id
        )));
    }

    Ok(())
}
