//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (`x-request-id`) is set on every request, echoed on the
//!   response and readable by scripts
//! - Metrics are cheap (atomic increments)
//! - Script `print` output is logged under the `script` target

pub mod logging;
pub mod metrics;
