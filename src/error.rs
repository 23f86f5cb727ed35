//! Error taxonomy shared by the router, the host commands and the
//! execution serializer.

use thiserror::Error;

/// Errors surfaced by the scripting host.
///
/// `Context`, `Argument` and `UnknownHandle` are returned to the invoking
/// script as its own failure. `Script` is what the dispatcher sees when an
/// execution fails as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// No registered route matches the request.
    #[error("no route for {method} {path}")]
    Routing { method: String, path: String },

    /// A context-scoped command ran without a request context.
    #[error("{command}: not in request context")]
    Context { command: &'static str },

    /// Wrong arity, type or value passed to a host command.
    #[error("{command}: {message}")]
    Argument {
        command: &'static str,
        message: String,
    },

    /// The engine failed to evaluate a script.
    #[error("{0}")]
    Script(String),

    /// close/info/on_close against a handle that is not held.
    #[error("unknown connection: {0}")]
    UnknownHandle(String),

    /// Malformed route pattern at registration time.
    #[error("invalid pattern {pattern:?}: {reason}")]
    Parse { pattern: String, reason: String },

    /// The serializer worker is no longer accepting executions.
    #[error("script engine stopped")]
    EngineStopped,
}

impl Error {
    pub(crate) fn argument(command: &'static str, message: impl Into<String>) -> Self {
        Error::Argument {
            command,
            message: message.into(),
        }
    }
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, Error>;
