//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → environment overrides (PROJECT_NAME, API_V1_STR, PORT, ...)
//!     → validation.rs (semantic checks)
//!     → Settings (validated, immutable)
//!     → shared via Arc with the application
//! ```
//!
//! # Design Decisions
//! - Settings are immutable once loaded; a change means a new worker process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_with, ConfigError};
pub use schema::{DatabaseConfig, MetricsConfig, ServerConfig, Settings, WebSocketConfig};
pub use validation::{validate_settings, ValidationError};
