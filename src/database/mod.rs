//! Database initializer.
//!
//! # Responsibilities
//! - Open the connection pool once, before the first request
//! - Verify connectivity and apply operator-supplied migrations
//! - Hand the shared pool to request handlers
//! - Close the pool at shutdown
//!
//! # Design Decisions
//! - The pool lives behind an `ArcSwapOption` so handlers read it lock-free
//!   and shutdown can take it back out
//! - No schema is created here; migrations are the only source of DDL

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::lifecycle::{BoxError, Resource};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database is not initialized")]
    NotInitialized,

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Shared handle onto the service database.
pub struct Database {
    config: DatabaseConfig,
    pool: ArcSwapOption<SqlitePool>,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: ArcSwapOption::empty(),
        }
    }

    /// The connection pool. Fails before startup and after shutdown.
    pub fn pool(&self) -> Result<SqlitePool, DatabaseError> {
        self.pool
            .load_full()
            .map(|pool| (*pool).clone())
            .ok_or(DatabaseError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.load().is_some()
    }

    /// Connect, verify and migrate.
    pub async fn init(&self) -> Result<(), DatabaseError> {
        let options = SqliteConnectOptions::from_str(&self.config.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.acquire_timeout_secs))
            .connect_with(options)
            .await?;

        if let Err(e) = self.prepare(&pool).await {
            pool.close().await;
            return Err(e);
        }

        tracing::info!(
            url = %redact(&self.config.url),
            max_connections = self.config.max_connections,
            "Database initialized"
        );
        self.pool.store(Some(Arc::new(pool)));
        Ok(())
    }

    async fn prepare(&self, pool: &SqlitePool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;

        if let Some(dir) = &self.config.migrations_dir {
            let migrator = Migrator::new(Path::new(dir)).await?;
            migrator.run(pool).await?;
            tracing::info!(
                migrations_dir = %dir,
                applied = migrator.iter().count(),
                "Migrations applied"
            );
        }
        Ok(())
    }

    /// Close the pool. Safe to call when it was never opened.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.swap(None) {
            pool.close().await;
            tracing::info!("Database connection closed");
        }
    }
}

#[async_trait]
impl Resource for Database {
    fn name(&self) -> &str {
        "database"
    }

    async fn start(&self) -> Result<(), BoxError> {
        self.init().await.map_err(Into::into)
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.close().await;
        Ok(())
    }
}

/// Hide credentials in URLs before logging them.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
