//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build subsystems → Run startup script → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Close held connections → Drain requests → Stop engine → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! Scripts:
//!     shutdown() → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: close holds, drain, stop the engine last so
//!   in-flight scripts still complete

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::Application;
