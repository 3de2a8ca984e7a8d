//! Versioned API surface.
//!
//! The application mounts a [`RouteRegistry`] under the configured prefix
//! without knowing what it contains. [`ApiRouter`] is the registry the
//! service ships with; tests and embedders can mount their own.

pub mod experiments;
pub mod hub;

use axum::Router;

use crate::http::server::AppState;

pub use hub::{ExperimentHub, ExperimentMessage, HubError, Subscription};

/// A mountable set of request handlers.
pub trait RouteRegistry: Send + 'static {
    /// The handlers, with paths relative to the mount prefix.
    fn routes(self: Box<Self>) -> Router<AppState>;
}

impl RouteRegistry for Router<AppState> {
    fn routes(self: Box<Self>) -> Router<AppState> {
        *self
    }
}

/// The default API registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct ApiRouter;

impl RouteRegistry for ApiRouter {
    fn routes(self: Box<Self>) -> Router<AppState> {
        Router::new().merge(experiments::routes())
    }
}
