//! Configuration validation.
//!
//! Serde handles the syntactic side; this pass checks values that would only
//! fail later (at router construction or bind time). Every violation is
//! reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use axum::http::HeaderValue;
use url::Url;

use crate::config::schema::Settings;

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a loaded configuration.
pub fn validate_settings(settings: &Settings) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if settings.project_name.trim().is_empty() {
        errors.push(ValidationError::new("project_name", "must not be empty"));
    }
    if settings.version.trim().is_empty() {
        errors.push(ValidationError::new("version", "must not be empty"));
    }

    validate_prefix(&settings.api_v1_str, &mut errors);

    for (i, origin) in settings.backend_cors_origins.iter().enumerate() {
        if let Err(message) = validate_origin(origin) {
            errors.push(ValidationError::new(
                format!("backend_cors_origins[{i}]"),
                message,
            ));
        }
    }

    if settings.bind_address().parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.host",
            format!("'{}' is not a valid IP address", settings.server.host),
        ));
    }
    if settings.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "server.request_timeout_secs",
            "must be greater than zero",
        ));
    }
    if settings.server.max_body_bytes == 0 {
        errors.push(ValidationError::new(
            "server.max_body_bytes",
            "must be greater than zero",
        ));
    }

    if settings.database.url.trim().is_empty() {
        errors.push(ValidationError::new("database.url", "must not be empty"));
    }
    if settings.database.max_connections == 0 {
        errors.push(ValidationError::new(
            "database.max_connections",
            "must be greater than zero",
        ));
    }

    if settings.metrics.enabled && settings.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "metrics.address",
            format!("'{}' is not a socket address", settings.metrics.address),
        ));
    }

    if settings.websocket.channel_capacity == 0 {
        errors.push(ValidationError::new(
            "websocket.channel_capacity",
            "must be greater than zero",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_prefix(prefix: &str, errors: &mut Vec<ValidationError>) {
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new("api_v1_str", "must start with '/'"));
    } else if prefix == "/" {
        errors.push(ValidationError::new(
            "api_v1_str",
            "must not be the root path",
        ));
    } else if prefix.ends_with('/') {
        errors.push(ValidationError::new("api_v1_str", "must not end with '/'"));
    } else if prefix.contains("//") {
        errors.push(ValidationError::new("api_v1_str", "must not contain empty segments"));
    } else if let Some(c) = prefix
        .chars()
        .find(|&c| matches!(c, '{' | '}' | '*') || c.is_whitespace() || c.is_control())
    {
        // The prefix is a literal route; axum reads these as captures.
        errors.push(ValidationError::new(
            "api_v1_str",
            format!("must not contain {c:?}"),
        ));
    } else if prefix.split('/').any(|segment| segment.starts_with(':')) {
        errors.push(ValidationError::new(
            "api_v1_str",
            "segments must not start with ':'",
        ));
    }
}

/// An origin is `*` or `scheme://host[:port]` with nothing after the authority.
fn validate_origin(origin: &str) -> Result<(), String> {
    if origin == "*" {
        return Ok(());
    }

    let url = Url::parse(origin).map_err(|e| format!("'{origin}' is not a valid origin: {e}"))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(format!("'{origin}' has no host"));
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return Err(format!("'{origin}' must not contain a path, query or fragment"));
    }
    // Url::parse appends '/', so compare against the serialized origin form.
    if origin.ends_with('/') {
        return Err(format!("'{origin}' must not end with '/'"));
    }
    HeaderValue::from_str(origin).map_err(|_| format!("'{origin}' is not a valid header value"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(validate_settings(&Settings::default()), Ok(()));
    }

    #[test]
    fn test_reports_every_violation() {
        let mut settings = Settings::default();
        settings.project_name = " ".into();
        settings.api_v1_str = "api/v1".into();
        settings.backend_cors_origins = vec!["not an origin".into()];
        settings.database.url = String::new();

        let errors = validate_settings(&settings).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["project_name", "api_v1_str", "backend_cors_origins[0]", "database.url"]
        );
    }

    #[test]
    fn test_prefix_rules() {
        for bad in [
            "/",
            "/api/v1/",
            "api",
            "/api//v1",
            "/api/{*rest}",
            "/api/{",
            "/api/}",
            "/api/*",
            "/api /v1",
            "/api/\tv1",
            "/api/:version",
        ] {
            let mut settings = Settings::default();
            settings.api_v1_str = bad.into();
            assert!(validate_settings(&settings).is_err(), "{bad} should be rejected");
        }

        let mut settings = Settings::default();
        settings.api_v1_str = "/v2".into();
        assert!(validate_settings(&settings).is_ok());
        settings.api_v1_str = "/api/v1.2-beta".into();
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_origin_rules() {
        assert!(validate_origin("*").is_ok());
        assert!(validate_origin("http://localhost:5173").is_ok());
        assert!(validate_origin("https://lab.example.com").is_ok());

        assert!(validate_origin("http://localhost:5173/").is_err());
        assert!(validate_origin("http://localhost/app").is_err());
        assert!(validate_origin("localhost:5173").is_err());
    }

    #[test]
    fn test_host_must_be_ip() {
        let mut settings = Settings::default();
        settings.server.host = "example.com".into();
        let errors = validate_settings(&settings).unwrap_err();
        assert_eq!(errors[0].field, "server.host");
    }
}
