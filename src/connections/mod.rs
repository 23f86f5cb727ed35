//! Held-connection subsystem.
//!
//! # Data Flow
//! ```text
//! Script calls connection::hold(alias?)
//!     → registry.rs (generate id, index by id/alias/context)
//!     → connection.rs (record + termination signal)
//!
//! Later script calls respond(handle, ...)
//!     → registry.rs (resolve handle)
//!     → RequestContext of the held request
//!
//! Connection States:
//!     Held → Terminated (explicit close | disconnect | shutdown) → Removed
//! ```
//!
//! # Design Decisions
//! - Connections reference their context; closing one never cancels the
//!   dispatch task that created it, it only releases its wait
//! - No idle timeout: a hold lives until closed or the peer disconnects

pub mod connection;
pub mod registry;

pub use connection::{CloseReason, Connection, ConnectionInfo};
pub use registry::ConnectionRegistry;
