//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Service name reported by `GET /`.
    pub project_name: String,

    /// Service version reported by `GET /`.
    pub version: String,

    /// Human readable description reported by `GET /`.
    pub description: String,

    /// Origins allowed by the CORS policy. `*` mirrors any origin.
    pub backend_cors_origins: Vec<String>,

    /// Path prefix the API registry is mounted under (e.g. "/api/v1").
    pub api_v1_str: String,

    /// Listener and request handling settings.
    pub server: ServerConfig,

    /// Database initializer settings.
    pub database: DatabaseConfig,

    /// Metrics exporter settings.
    pub metrics: MetricsConfig,

    /// Experiment channel settings.
    pub websocket: WebSocketConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: "Experiment Hub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Experiment tracking backend".to_string(),
            backend_cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            api_v1_str: "/api/v1".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            metrics: MetricsConfig::default(),
            websocket: WebSocketConfig::default(),
        }
    }
}

impl Settings {
    /// The `host:port` pair the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// TCP port to bind.
    pub port: u16,

    /// Restart the worker process when the config file or binary changes.
    pub reload: bool,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// How long the reload supervisor waits for a worker to exit.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            reload: true,
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            shutdown_grace_secs: 30,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (e.g., "sqlite://experiment_hub.db").
    pub url: String,

    /// Maximum pooled connections.
    pub max_connections: u32,

    /// Time to wait for a pooled connection, in seconds.
    pub acquire_timeout_secs: u64,

    /// Directory of SQL migrations applied at startup.
    pub migrations_dir: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://experiment_hub.db".to_string(),
            max_connections: 5,
            acquire_timeout_secs: 5,
            migrations_dir: None,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint.
    pub enabled: bool,

    /// Prometheus endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Buffered messages per experiment before slow subscribers lag.
    pub channel_capacity: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}
