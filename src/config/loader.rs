//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::Settings;
use crate::config::validation::{validate_settings, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {message}")]
    Env { var: &'static str, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, then apply environment
/// overrides from the process environment.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    load_config_with(path, |var| std::env::var(var).ok())
}

/// Same as [`load_config`] with an explicit environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, env: F) -> Result<Settings, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut settings = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => Settings::default(),
    };

    apply_env_overrides(&mut settings, env)?;
    validate_settings(&settings).map_err(ConfigError::Validation)?;

    Ok(settings)
}

/// Environment variables take precedence over values from the file.
pub fn apply_env_overrides<F>(settings: &mut Settings, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env("PROJECT_NAME") {
        settings.project_name = v;
    }
    if let Some(v) = env("VERSION") {
        settings.version = v;
    }
    if let Some(v) = env("DESCRIPTION") {
        settings.description = v;
    }
    if let Some(v) = env("BACKEND_CORS_ORIGINS") {
        settings.backend_cors_origins = parse_origins(&v)?;
    }
    if let Some(v) = env("API_V1_STR") {
        settings.api_v1_str = v;
    }
    if let Some(v) = env("HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env("PORT") {
        settings.server.port = v.trim().parse().map_err(|e| ConfigError::Env {
            var: "PORT",
            message: format!("{e}"),
        })?;
    }
    if let Some(v) = env("RELOAD") {
        settings.server.reload = parse_bool(&v).ok_or_else(|| ConfigError::Env {
            var: "RELOAD",
            message: format!("'{v}' is not a boolean"),
        })?;
    }
    if let Some(v) = env("DATABASE_URL") {
        settings.database.url = v;
    }
    Ok(())
}

/// Accepts a JSON list (`["http://a", "http://b"]`) or a comma separated list.
fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| ConfigError::Env {
            var: "BACKEND_CORS_ORIGINS",
            message: e.to_string(),
        });
    }

    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
