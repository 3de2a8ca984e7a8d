//! Startup and shutdown ordering of a running service.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use experiment_hub::lifecycle::{BoxError, Resource};
use experiment_hub::{AppState, Application, Error, Phase};

mod common;

type Journal = Arc<Mutex<Vec<String>>>;

/// Resource that records its hooks, optionally slow or failing.
struct Recorder {
    name: &'static str,
    journal: Journal,
    start_delay: Duration,
    drain_delay: Duration,
    fail_start: bool,
}

impl Recorder {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: journal.clone(),
            start_delay: Duration::ZERO,
            drain_delay: Duration::ZERO,
            fail_start: false,
        }
    }

    fn record(&self, event: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", self.name, event));
    }
}

#[async_trait]
impl Resource for Recorder {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(&self) -> Result<(), BoxError> {
        tokio::time::sleep(self.start_delay).await;
        if self.fail_start {
            self.record("start-failed");
            return Err("refusing to start".into());
        }
        self.record("start");
        Ok(())
    }

    async fn drain(&self) {
        tokio::time::sleep(self.drain_delay).await;
        self.record("drain");
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.record("stop");
        Ok(())
    }
}

fn events(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

#[tokio::test]
async fn test_requests_wait_for_startup() {
    let journal = Journal::default();
    let mut slow = Recorder::new("slow", &journal);
    slow.start_delay = Duration::from_millis(300);

    let app = Application::builder(common::test_settings())
        .resource(Arc::new(slow))
        .build()
        .unwrap();
    let server = common::spawn(app).await;

    // Issued while the slow resource is still starting.
    let response = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(events(&journal), vec!["slow:start"]);
    assert_eq!(server.lifecycle.current(), Phase::Serving);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_startup_never_serves() {
    let journal = Journal::default();
    let first = Recorder::new("first", &journal);
    let mut broken = Recorder::new("broken", &journal);
    broken.fail_start = true;
    let never = Recorder::new("never", &journal);

    let app = Application::builder(common::test_settings())
        .resource(Arc::new(first))
        .resource(Arc::new(broken))
        .resource(Arc::new(never))
        .build()
        .unwrap();
    let server = common::spawn(app).await;
    let lifecycle = server.lifecycle.clone();
    let addr = server.addr;

    let result = server.join().await;
    match result {
        Err(Error::Startup(e)) => assert_eq!(e.resource, "broken"),
        other => panic!("expected startup error, got {other:?}"),
    }

    assert_eq!(
        events(&journal),
        vec!["first:start", "broken:start-failed", "first:stop"]
    );
    assert_eq!(lifecycle.current(), Phase::Stopped);
    assert!(!lifecycle.wait_for(Phase::Serving).await);

    // The listener was dropped without ever being served.
    assert!(reqwest::get(format!("http://{addr}/health")).await.is_err());
}

#[tokio::test]
async fn test_shutdown_drains_then_releases_once() {
    let journal = Journal::default();
    let app = Application::builder(common::test_settings())
        .resource(Arc::new(Recorder::new("a", &journal)))
        .resource(Arc::new(Recorder::new("b", &journal)))
        .build()
        .unwrap();
    let hub = app.state().hub.clone();
    let database = app.state().database.clone();
    let server = common::start(app).await;
    let lifecycle = server.lifecycle.clone();
    assert!(database.is_initialized());

    let shutdown = server.shutdown.clone();
    server.stop().await.unwrap();
    // A second trigger after the service stopped changes nothing.
    shutdown.trigger();

    assert_eq!(
        events(&journal),
        vec!["a:start", "b:start", "b:drain", "a:drain", "b:stop", "a:stop"]
    );
    assert_eq!(lifecycle.current(), Phase::Stopped);
    assert!(hub.is_closed());
    assert!(!database.is_initialized());
}

#[tokio::test]
async fn test_phases_are_observable() {
    let app = Application::new(common::test_settings()).unwrap();
    let lifecycle = app.lifecycle();
    assert_eq!(lifecycle.current(), Phase::Uninitialized);

    let mut phases = lifecycle.subscribe();
    let initial = *phases.borrow_and_update();
    let seen = tokio::spawn(async move {
        let mut seen = vec![initial];
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            seen.push(phase);
            if phase == Phase::Stopped {
                break;
            }
        }
        seen
    });

    let server = common::start(app).await;
    server.stop().await.unwrap();

    let seen = seen.await.unwrap();
    assert_eq!(seen.first(), Some(&Phase::Uninitialized));
    assert_eq!(seen.last(), Some(&Phase::Stopped));
    // Intermediate phases may be coalesced, but never observed out of order.
    let order = [
        Phase::Uninitialized,
        Phase::Starting,
        Phase::Serving,
        Phase::Stopping,
        Phase::Stopped,
    ];
    let rank = |p: &Phase| order.iter().position(|o| o == p).unwrap();
    assert!(seen.windows(2).all(|w| rank(&w[0]) < rank(&w[1])));
    assert_eq!(lifecycle.current(), Phase::Stopped);
}

#[tokio::test]
async fn test_listener_closes_before_drain() {
    let journal = Journal::default();
    let mut slow = Recorder::new("slow", &journal);
    slow.drain_delay = Duration::from_millis(800);

    let app = Application::builder(common::test_settings())
        .resource(Arc::new(slow))
        .build()
        .unwrap();
    let server = common::start(app).await;
    let lifecycle = server.lifecycle.clone();
    let url = server.url("/health");

    server.shutdown.trigger();
    assert!(lifecycle.wait_for(Phase::Stopping).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Still draining, but no longer accepting.
    assert_eq!(events(&journal), vec!["slow:start"]);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(client.get(url).send().await.is_err());

    server.join().await.unwrap();
    assert_eq!(
        events(&journal),
        vec!["slow:start", "slow:drain", "slow:stop"]
    );
}

#[tokio::test]
async fn test_release_waits_for_in_flight_requests() {
    let journal = Journal::default();
    let handler_journal = journal.clone();
    let api: Router<AppState> = Router::new().route(
        "/slow",
        get(move || {
            let journal = handler_journal.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                journal.lock().unwrap().push("handler:done".to_string());
                "done"
            }
        }),
    );

    let app = Application::builder(common::test_settings())
        .registry(api)
        .resource(Arc::new(Recorder::new("res", &journal)))
        .build()
        .unwrap();
    let server = common::start(app).await;

    let request = tokio::spawn(reqwest::get(server.url("/api/v1/slow")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let shutdown = server.shutdown.clone();
    shutdown.trigger();

    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "done");
    server.join().await.unwrap();

    let events = events(&journal);
    let position = |event: &str| events.iter().position(|e| e == event).unwrap();
    assert!(position("handler:done") < position("res:stop"), "{events:?}");
    assert!(position("res:drain") < position("res:stop"));
}
