use crate::config::types::{Config, DedupConfig, FetchConfig, HarvesterConfig, OutputConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_harvester_config(&config.harvester)?;
    validate_fetch_config(&config.fetch)?;
    validate_dedup_config(&config.dedup)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates pipeline and enumeration settings
fn validate_harvester_config(config: &HarvesterConfig) -> Result<(), ConfigError> {
    if config.max_concurrent_downloads < 1 || config.max_concurrent_downloads > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_downloads must be between 1 and 64, got {}",
            config.max_concurrent_downloads
        )));
    }

    if config.enumeration_retries < 1 {
        return Err(ConfigError::Validation(format!(
            "enumeration_retries must be >= 1, got {}",
            config.enumeration_retries
        )));
    }

    if config.enumeration_backoff_ms > 60_000 {
        return Err(ConfigError::Validation(format!(
            "enumeration_backoff_ms must be <= 60000ms, got {}ms",
            config.enumeration_backoff_ms
        )));
    }

    Ok(())
}

/// Validates download settings
fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 || config.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and 300, got {}",
            config.timeout_secs
        )));
    }

    if config.max_image_bytes <= config.min_image_bytes {
        return Err(ConfigError::Validation(format!(
            "max_image_bytes ({}) must be greater than min_image_bytes ({})",
            config.max_image_bytes, config.min_image_bytes
        )));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates near-duplicate settings
fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    // A 64-bit signature can differ in at most 64 bits
    if config.near_duplicate_threshold < 1 || config.near_duplicate_threshold > 64 {
        return Err(ConfigError::Validation(format!(
            "near_duplicate_threshold must be between 1 and 64, got {}",
            config.near_duplicate_threshold
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.image_dir.is_empty() {
        return Err(ConfigError::Validation(
            "image_dir cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}
