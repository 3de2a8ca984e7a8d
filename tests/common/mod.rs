//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use experiment_hub::{Application, Error, Lifecycle, Phase, Settings, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Settings for an in-process instance: loopback, ephemeral port, in-memory
/// database, no reload.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.server.reload = false;
    settings.database.url = "sqlite::memory:".into();
    settings
}

/// A running application bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub lifecycle: Lifecycle,
    handle: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for `serve` to return.
    pub async fn stop(self) -> Result<(), Error> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }

    /// Wait for `serve` to return on its own.
    pub async fn join(self) -> Result<(), Error> {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Serve `app` in the background without waiting for it to come up.
pub async fn spawn(app: Application) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let lifecycle = app.lifecycle();

    let handle = tokio::spawn(app.serve(listener, shutdown.wait()));

    TestServer {
        addr,
        shutdown,
        lifecycle,
        handle,
    }
}

/// Serve `app` and wait until it is accepting traffic.
pub async fn start(app: Application) -> TestServer {
    let server = spawn(app).await;
    let serving = tokio::time::timeout(Duration::from_secs(10), server.lifecycle.wait_for(Phase::Serving))
        .await
        .expect("server did not start in time");
    assert!(serving, "server never reached serving");
    server
}

/// Start the default application with `settings`.
pub async fn start_with(settings: Settings) -> TestServer {
    start(Application::new(settings).unwrap()).await
}
