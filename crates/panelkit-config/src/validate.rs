//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Longest debounce window accepted, in milliseconds.
const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Deepest parser nesting limit accepted.
const MAX_BUILD_DEPTH: usize = 256;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_templates(config)?;
    validate_cache(config)?;
    validate_events(config)?;
    validate_build(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_templates(config: &Config) -> ConfigResult<()> {
    let t = &config.templates;

    if t.directory.as_os_str().is_empty() {
        return Err(invalid("templates.directory", "directory must not be empty"));
    }

    if t.extensions.is_empty() {
        return Err(invalid(
            "templates.extensions",
            "at least one template extension is required",
        ));
    }

    if let Some(ext) = t
        .extensions
        .iter()
        .find(|ext| ext.is_empty() || ext.starts_with('.') || ext.contains('/'))
    {
        return Err(invalid(
            "templates.extensions",
            format!("invalid extension '{ext}'; use a bare suffix such as 'panel.yaml'"),
        ));
    }

    if t.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(invalid(
            "templates.debounce_ms",
            format!("debounce_ms must be at most {MAX_DEBOUNCE_MS}"),
        ));
    }

    Ok(())
}

fn validate_cache(config: &Config) -> ConfigResult<()> {
    if config.cache.activity_log_capacity == 0 {
        return Err(invalid(
            "cache.activity_log_capacity",
            "activity_log_capacity must be at least 1",
        ));
    }
    Ok(())
}

fn validate_events(config: &Config) -> ConfigResult<()> {
    if config.events.channel_capacity == 0 {
        return Err(invalid(
            "events.channel_capacity",
            "channel_capacity must be at least 1",
        ));
    }
    if config.events.max_emit_depth == 0 {
        return Err(invalid(
            "events.max_emit_depth",
            "max_emit_depth must be at least 1",
        ));
    }
    Ok(())
}

fn validate_build(config: &Config) -> ConfigResult<()> {
    let depth = config.build.max_depth;
    if depth == 0 || depth > MAX_BUILD_DEPTH {
        return Err(invalid(
            "build.max_depth",
            format!("max_depth must be between 1 and {MAX_BUILD_DEPTH}"),
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
