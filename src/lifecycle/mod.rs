//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Uninitialized → Starting: acquire resources in order
//!     Starting → Serving: listener starts accepting
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     Signal received → Stopping: stop accepting, drain resources,
//!     wait for in-flight requests → release resources → Stopped
//!
//! Reload (reload.rs):
//!     File change → stop worker process → spawn a fresh worker
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then resources, then listeners
//! - Ordered shutdown: stop accept, drain, release in reverse order
//! - Every phase transition happens at most once (state.rs)

pub mod reload;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::Shutdown;
pub use startup::{BoxError, DrainHandle, Lifespan, Resource, StartupError};
pub use state::{Lifecycle, LifecycleError, Phase};
