//! Scripted HTTP server library.
//!
//! Routes are registered by scripts; each request runs its route's script
//! under a process-wide execution serializer, and a script may hold its
//! request open as a named streaming connection that later executions
//! write to.

pub mod admin;
pub mod config;
pub mod connections;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod script;

pub use config::schema::ServerConfig;
pub use error::{Error, Result};
pub use http::HttpServer;
pub use lifecycle::{Application, Shutdown};
