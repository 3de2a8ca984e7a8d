//! HTTP server setup and lifecycle.
//!
//! # Responsibilities
//! - Build the application once: identity, state, router, resources
//! - Wire up middleware (CORS, request ID, tracing, timeout, body limit)
//! - Mount the API registry under the configured prefix
//! - Run the lifecycle: start resources → serve → drain → release
//!
//! # Design Decisions
//! - The listener is only served after every resource started, so no
//!   request can observe a half-initialized resource
//! - CORS is the outermost layer so error and timeout responses carry it too
//! - Resources are released on every exit path, including failed startup

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::api::{ApiRouter, ExperimentHub, RouteRegistry};
use crate::config::{validate_settings, ConfigError, Settings};
use crate::database::Database;
use crate::error::Error;
use crate::http::cors::cors_layer;
use crate::http::error::{method_not_allowed, not_found};
use crate::http::handlers;
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, RequestSpan};
use crate::lifecycle::{Lifecycle, Lifespan, Phase, Resource};
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub database: Arc<Database>,
    pub hub: Arc<ExperimentHub>,
    pub lifecycle: Lifecycle,
}

/// Configures an [`Application`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct ApplicationBuilder {
    settings: Settings,
    registry: Box<dyn RouteRegistry>,
    resources: Vec<Arc<dyn Resource>>,
}

impl ApplicationBuilder {
    /// Mount `registry` under the API prefix instead of [`ApiRouter`].
    pub fn registry(mut self, registry: impl RouteRegistry) -> Self {
        self.registry = Box::new(registry);
        self
    }

    /// Start `resource` after the built-in ones and stop it before them.
    pub fn resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Validate the settings and assemble the application.
    pub fn build(self) -> Result<Application, ConfigError> {
        validate_settings(&self.settings).map_err(ConfigError::Validation)?;

        let settings = Arc::new(self.settings);
        let database = Arc::new(Database::new(settings.database.clone()));
        let hub = Arc::new(ExperimentHub::new(settings.websocket.channel_capacity));

        let mut lifespan = Lifespan::new();
        lifespan.push(database.clone());
        lifespan.push(hub.clone());
        for resource in self.resources {
            lifespan.push(resource);
        }

        let state = AppState {
            settings: settings.clone(),
            database,
            hub,
            lifecycle: Lifecycle::new(),
        };
        let router = build_router(&settings, state.clone(), self.registry.routes());

        tracing::info!(
            name = %settings.project_name,
            version = %settings.version,
            api_prefix = %settings.api_v1_str,
            cors_origins = ?settings.backend_cors_origins,
            "Application constructed"
        );

        Ok(Application {
            state,
            router,
            lifespan,
        })
    }
}

/// One service instance: router plus the resources it owns.
pub struct Application {
    state: AppState,
    router: Router,
    lifespan: Lifespan,
}

impl Application {
    pub fn builder(settings: Settings) -> ApplicationBuilder {
        ApplicationBuilder {
            settings,
            registry: Box::new(ApiRouter),
            resources: Vec::new(),
        }
    }

    /// Build with the default registry.
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        Self::builder(settings).build()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    /// Handle onto the lifecycle phase.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle.clone()
    }

    /// The fully layered router. Serving it directly bypasses the lifecycle.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the application until `shutdown` resolves.
    ///
    /// Resources start before the listener is served. When `shutdown`
    /// resolves the listener closes, then resources are drained while
    /// in-flight requests finish, and then resources are released in reverse
    /// order.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Application {
            state,
            router,
            mut lifespan,
        } = self;
        let lifecycle = state.lifecycle.clone();

        lifecycle.advance(Phase::Starting)?;
        tracing::info!(resources = ?lifespan.names(), "Starting up application...");
        if let Err(e) = lifespan.startup().await {
            lifecycle.advance(Phase::Stopping)?;
            lifecycle.advance(Phase::Stopped)?;
            return Err(e.into());
        }

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                lifecycle.advance(Phase::Stopping)?;
                lifespan.shutdown().await;
                lifecycle.advance(Phase::Stopped)?;
                return Err(e.into());
            }
        };
        lifecycle.advance(Phase::Serving)?;
        tracing::info!(address = %addr, "HTTP server accepting connections");

        // Draining starts once the listener is closed and runs while axum
        // waits for in-flight requests.
        let (begin_drain, drain_signal) = oneshot::channel::<()>();
        let drain = lifespan.drain_handle();
        let drain_task = tokio::spawn(async move {
            if drain_signal.await.is_err() {
                return false;
            }
            drain.drain().await;
            true
        });

        let stopping = lifecycle.clone();
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                if let Err(e) = stopping.advance(Phase::Stopping) {
                    tracing::warn!(error = %e, "Unexpected phase at shutdown");
                }
                tracing::info!("Shutting down application...");
                let _ = begin_drain.send(());
            })
            .await;

        let drained = match drain_task.await {
            Ok(drained) => drained,
            Err(e) => {
                tracing::error!(error = %e, "Drain task failed");
                true
            }
        };
        // The server can also return without the shutdown future having run.
        if lifecycle.current() == Phase::Serving {
            lifecycle.advance(Phase::Stopping)?;
        }
        if !drained {
            lifespan.drain().await;
        }
        lifespan.shutdown().await;
        lifecycle.advance(Phase::Stopped)?;
        tracing::info!("HTTP server stopped");

        result.map_err(Error::from)
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
fn build_router(settings: &Settings, state: AppState, api: Router<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .nest(&settings.api_v1_str, api)
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state);

    if settings.metrics.enabled {
        router = router.layer(middleware::from_fn(metrics::track_requests));
    }

    router
        .layer(RequestBodyLimitLayer::new(settings.server.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            settings.server.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http().make_span_with(RequestSpan))
        .layer(propagate_request_id_layer())
        .layer(set_request_id_layer())
        .layer(cors_layer(&settings.backend_cors_origins))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn settings() -> Settings {
        Settings {
            project_name: "X".into(),
            version: "1.0".into(),
            description: "demo".into(),
            backend_cors_origins: vec!["http://localhost:5173".into()],
            ..Settings::default()
        }
    }

    fn app_with_echo() -> Application {
        let api: Router<AppState> = Router::new().route("/echo", get(|| async { "echo" }));
        Application::builder(settings()).registry(api).build().unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap()
            .to_vec();
        (status, headers, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_identity_endpoint() {
        let (status, _, body) = send(app_with_echo().router(), get_req("/")).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"name": "X", "version": "1.0", "description": "demo"}));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, _, body) = send(app_with_echo().router(), get_req("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"status":"healthy"}"#);
    }

    #[tokio::test]
    async fn test_registry_only_under_prefix() {
        let router = app_with_echo().router();

        let (status, _, body) = send(router.clone(), get_req("/api/v1/echo")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"echo");

        let (status, _, body) = send(router, get_req("/echo")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"detail": "Not Found"}));
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(app_with_echo().router(), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"detail": "Method Not Allowed"}));
    }

    #[tokio::test]
    async fn test_cors_on_success_and_errors() {
        let router = app_with_echo().router();
        for uri in ["/", "/health", "/api/v1/echo", "/api/v1/missing", "/nowhere"] {
            let request = Request::builder()
                .uri(uri)
                .header(header::ORIGIN, "http://localhost:5173")
                .body(Body::empty())
                .unwrap();
            let (_, headers, _) = send(router.clone(), request).await;
            assert_eq!(
                headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
                "http://localhost:5173",
                "missing CORS origin on {uri}"
            );
            assert_eq!(
                headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
                "true"
            );
        }
    }

    #[tokio::test]
    async fn test_cors_rejects_unknown_origin() {
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.test")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app_with_echo().router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_method_and_header() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/echo")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PATCH")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-custom-header")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app_with_echo().router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "PATCH");
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "x-custom-header"
        );
    }

    #[tokio::test]
    async fn test_wildcard_origin_mirrors_request() {
        let mut settings = settings();
        settings.backend_cors_origins = vec!["*".into()];
        let app = Application::new(settings).unwrap();
        let request = Request::builder()
            .uri("/")
            .header(header::ORIGIN, "http://anywhere.test")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(app.router(), request).await;
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://anywhere.test"
        );
    }

    #[tokio::test]
    async fn test_request_id_generated_or_propagated() {
        let router = app_with_echo().router();

        let (_, headers, _) = send(router.clone(), get_req("/health")).await;
        let generated = headers.get("x-request-id").unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());

        let request = Request::builder()
            .uri("/health")
            .header("x-request-id", "trace-123")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = send(router, request).await;
        assert_eq!(headers.get("x-request-id").unwrap(), "trace-123");
    }

    #[test]
    fn test_invalid_settings_fail_construction() {
        let mut settings = settings();
        settings.api_v1_str = "no-slash".into();
        assert!(matches!(
            Application::new(settings),
            Err(ConfigError::Validation(_))
        ));
    }

    fn app_with_limits(max_body_bytes: usize, timeout_secs: u64) -> Application {
        let mut settings = settings();
        settings.server.max_body_bytes = max_body_bytes;
        settings.server.request_timeout_secs = timeout_secs;
        let api: Router<AppState> = Router::new()
            .route(
                "/upload",
                axum::routing::post(|body: axum::body::Bytes| async move { body.len().to_string() }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(1500)).await;
                    "late"
                }),
            );
        Application::builder(settings).registry(api).build().unwrap()
    }

    fn upload(size: usize) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/upload")
            .header(header::CONTENT_LENGTH, size)
            .body(Body::from(vec![b'x'; size]))
            .unwrap()
    }

    #[tokio::test]
    async fn test_body_over_limit_is_rejected() {
        let router = app_with_limits(16, 30).router();

        let (status, _, body) = send(router.clone(), upload(16)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"16");

        let (status, _, _) = send(router, upload(17)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_slow_request_times_out() {
        let router = app_with_limits(1024, 1).router();
        let (status, _, _) = send(router, get_req("/api/v1/slow")).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn test_route_syntax_in_prefix_is_rejected_not_panicking() {
        for prefix in ["/api/{*rest}", "/api/{", "/api/:version", "/api//v1"] {
            let mut settings = settings();
            settings.api_v1_str = prefix.into();
            assert!(
                matches!(Application::new(settings), Err(ConfigError::Validation(_))),
                "{prefix} should fail validation"
            );
        }
    }
}
