//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, histograms; optional Prometheus endpoint)
//! HTTP access logs come from tower-http's TraceLayer, one span per request
//! carrying the request ID (http/request.rs).
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
