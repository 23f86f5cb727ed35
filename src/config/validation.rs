//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, formats and value ranges
//! - Refuse an enabled admin API with the placeholder key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::{ServerConfig, PLACEHOLDER_API_KEY};
use crate::observability::logging::LogFormat;

/// One failed check, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("{value:?} is not a socket address"),
        ));
    }
}

/// Check a parsed config, collecting every problem.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.script.path.trim().is_empty() {
        errors.push(ValidationError::new("script.path", "must not be empty"));
    }
    if config.script.max_call_levels == 0 {
        errors.push(ValidationError::new("script.max_call_levels", "must be greater than 0"));
    }

    let event = &config.streaming.event_name;
    if event.is_empty() || event.contains(['\n', '\r']) {
        errors.push(ValidationError::new(
            "streaming.event_name",
            "must be non-empty and contain no line breaks",
        ));
    }

    if config.http.max_body_size == 0 {
        errors.push(ValidationError::new("http.max_body_size", "must be greater than 0"));
    }
    if config.http.send_queue_depth == 0 {
        errors.push(ValidationError::new("http.send_queue_depth", "must be greater than 0"));
    }

    if LogFormat::parse(&config.observability.log_format).is_none() {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("expected \"pretty\" or \"json\", got {:?}", config.observability.log_format),
        ));
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() || config.admin.api_key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set to a real key when admin is enabled",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
