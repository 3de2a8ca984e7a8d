//! Startup orchestration.
//!
//! # Responsibilities
//! - Acquire every resource in dependency order before traffic is served
//! - Roll back already-acquired resources if one of them fails
//! - Release resources in reverse order exactly once at shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Resources initialize in order, not concurrently
//! - Release never aborts halfway: stop errors are logged and the rest still run

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

/// Boxed error returned by resource hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Something acquired at startup and released at shutdown.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Acquire the resource. Runs once, before the first request.
    async fn start(&self) -> Result<(), BoxError>;

    /// Called when the service stops accepting traffic, before in-flight
    /// requests are drained. Long-lived sessions should be wound down here.
    async fn drain(&self) {}

    /// Release the resource. Runs once, after draining finished.
    async fn stop(&self) -> Result<(), BoxError>;
}

/// A resource failed to start.
#[derive(Debug, Error)]
#[error("failed to start {resource}: {source}")]
pub struct StartupError {
    pub resource: String,
    #[source]
    pub source: BoxError,
}

/// Ordered set of resources with scoped acquisition and release.
#[derive(Default)]
pub struct Lifespan {
    resources: Vec<Arc<dyn Resource>>,
    started: Vec<Arc<dyn Resource>>,
}

impl Lifespan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource. Resources start in insertion order.
    pub fn push(&mut self, resource: Arc<dyn Resource>) {
        self.resources.push(resource);
    }

    /// Names of the resources still waiting to start, in start order.
    pub fn names(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.name().to_string()).collect()
    }

    /// Start every resource in order.
    ///
    /// On the first failure the resources started so far are stopped in
    /// reverse order and the failure is returned.
    pub async fn startup(&mut self) -> Result<(), StartupError> {
        let pending = std::mem::take(&mut self.resources);
        for resource in pending {
            let begin = Instant::now();
            match resource.start().await {
                Ok(()) => {
                    tracing::info!(
                        resource = resource.name(),
                        elapsed_ms = begin.elapsed().as_millis() as u64,
                        "Resource started"
                    );
                    self.started.push(resource);
                }
                Err(source) => {
                    tracing::error!(
                        resource = resource.name(),
                        error = %source,
                        "Resource failed to start"
                    );
                    let resource = resource.name().to_string();
                    self.shutdown().await;
                    return Err(StartupError { resource, source });
                }
            }
        }
        Ok(())
    }

    /// Notify started resources that traffic is winding down.
    pub async fn drain(&self) {
        self.drain_handle().drain().await;
    }

    /// Detached handle for draining from another task (e.g. the server's
    /// graceful shutdown future).
    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            resources: self.started.clone(),
        }
    }

    /// Stop started resources in reverse order. Later calls are no-ops.
    pub async fn shutdown(&mut self) {
        while let Some(resource) = self.started.pop() {
            match resource.stop().await {
                Ok(()) => tracing::info!(resource = resource.name(), "Resource stopped"),
                Err(e) => tracing::error!(
                    resource = resource.name(),
                    error = %e,
                    "Resource failed to stop cleanly"
                ),
            }
        }
    }

    /// Number of resources currently held.
    pub fn started_count(&self) -> usize {
        self.started.len()
    }
}

/// The started resources of a [`Lifespan`], for draining.
pub struct DrainHandle {
    resources: Vec<Arc<dyn Resource>>,
}

impl DrainHandle {
    /// Drain in reverse start order.
    pub async fn drain(self) {
        for resource in self.resources.iter().rev() {
            resource.drain().await;
        }
    }
}
