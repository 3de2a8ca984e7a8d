//! Crate-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::reload::ReloadError;
use crate::lifecycle::{LifecycleError, StartupError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("startup aborted: {0}")]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("reload supervisor: {0}")]
    Reload(#[from] ReloadError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
