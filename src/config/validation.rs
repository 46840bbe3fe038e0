//! Configuration validation, aggregated so a bad file reports everything
//! wrong at once instead of one field per restart.
use std::net::SocketAddr;

use crate::config::models::GatewayConfig;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("validation failed:\n{message}")]
    ValidationFailed { message: String },
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the whole configuration, collecting every error.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.listen_addr.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr.clone(),
                reason: "must be 'IP:PORT', e.g. '0.0.0.0:8080'".to_string(),
            });
        }

        if !config.database_url.starts_with("postgres://")
            && !config.database_url.starts_with("postgresql://")
        {
            errors.push(ValidationError::InvalidField {
                field: "database_url".to_string(),
                message: "must start with postgres:// or postgresql://".to_string(),
            });
        }

        if !config.redis_url.starts_with("redis://") && !config.redis_url.starts_with("rediss://")
        {
            errors.push(ValidationError::InvalidField {
                field: "redis_url".to_string(),
                message: "must start with redis:// or rediss://".to_string(),
            });
        }

        if config.change_channel.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: "change_channel".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if !matches!(config.log_format.as_str(), "json" | "console") {
            errors.push(ValidationError::InvalidField {
                field: "log_format".to_string(),
                message: format!("'{}' is not 'json' or 'console'", config.log_format),
            });
        }

        if humantime::parse_duration(&config.shutdown_timeout).is_err() {
            errors.push(ValidationError::InvalidField {
                field: "shutdown_timeout".to_string(),
                message: format!("'{}' is not a duration", config.shutdown_timeout),
            });
        }

        if config.transport.max_idle_per_host == 0 {
            errors.push(ValidationError::InvalidField {
                field: "transport.max_idle_per_host".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if config.transport.default_read_timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "transport.default_read_timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::ValidationFailed {
                message: errors
                    .iter()
                    .map(|e| format!("  - {e}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            }),
        }
    }
}
