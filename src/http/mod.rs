//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, catch-all handler)
//!     → request.rs (snapshot method, path, query, headers, body)
//!     → dispatcher.rs (route match, script execution, hold wait)
//!     → context.rs (status/headers until commit, then body bytes)
//!     → response.rs (head + streaming body back to the handler)
//!     → sse.rs (event framing for held connections)
//!     → Send to client
//! ```

pub mod context;
pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;
pub mod sse;

pub use context::RequestContext;
pub use dispatcher::{Dispatcher, HoldEnd, Outcome};
pub use request::{RequestData, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
