//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → command-line overrides applied by the binary
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the script hot-reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, HttpConfig, ListenerConfig, ObservabilityConfig, ScriptConfig, ServerConfig,
    StreamingConfig,
};
pub use validation::{validate_config, ValidationError};
