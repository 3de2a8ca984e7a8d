//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → cors.rs (origin policy, preflight answers)
//!     → request.rs (request ID, tracing span)
//!     → timeout / body limit
//!     → server.rs router:
//!         GET /          → handlers.rs (identity)
//!         GET /health    → handlers.rs (liveness)
//!         {prefix}/...   → mounted API registry
//!         anything else  → error.rs (404 / 405 JSON)
//! ```

pub mod cors;
pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use error::ApiError;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, Application, ApplicationBuilder};
