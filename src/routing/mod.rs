//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Script calls route(method, pattern, body)
//!     → matcher.rs (compile pattern into segments)
//!     → router.rs (insert or replace, publish new snapshot)
//!
//! Incoming request (method, path)
//!     → router.rs (snapshot, scan in registration order)
//!     → matcher.rs (segment-wise match, bind :params)
//!     → Return: RouteMatch or no-match
//! ```
//!
//! # Design Decisions
//! - Routes are mutable at runtime; readers see immutable snapshots
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use matcher::{Params, PathPattern};
pub use router::{Route, RouteInfo, RouteMatch, RouteTable};
