//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the script server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Startup script and engine limits.
    pub script: ScriptConfig,

    /// Held-connection streaming settings.
    pub streaming: StreamingConfig,

    /// HTTP request limits.
    pub http: HttpConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Script loading and engine limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScriptConfig {
    /// Script executed at startup; it registers the routes.
    pub path: String,

    /// Re-execute the script when the file changes.
    pub watch: bool,

    /// Operation budget per execution (0 = unlimited).
    pub max_operations: u64,

    /// Maximum function call depth.
    pub max_call_levels: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            path: "server.rhai".to_string(),
            watch: false,
            max_operations: 0,
            max_call_levels: 64,
        }
    }
}

/// Event-stream settings for held connections.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Event name written on every record.
    pub event_name: String,

    /// Heartbeat interval in seconds (0 = disabled).
    pub keepalive_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            event_name: "message".to_string(),
            keepalive_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
    /// Unread body chunks queued per response. A held stream whose client
    /// falls this far behind is dropped.
    pub send_queue_depth: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024,
            send_queue_depth: crate::http::response::DEFAULT_QUEUE_DEPTH,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

/// Placeholder key; validation refuses it when admin is enabled.
pub const PLACEHOLDER_API_KEY: &str = "CHANGE_ME_IN_PRODUCTION";

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
