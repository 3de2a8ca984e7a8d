//! Development auto-reload.
//!
//! The supervisor re-executes the current binary as a worker process and
//! restarts it whenever a watched file changes (the config file, or the
//! binary itself after a rebuild). Each worker runs the full application
//! lifecycle once, so per-process lifecycle guarantees hold per worker.
//!
//! ```text
//! supervisor ──spawn──▶ worker (EXPERIMENT_HUB_RELOAD_WORKER=1, stdin piped)
//!     │                   │
//!   notify event          │
//!     └──close stdin──▶ graceful stop ──▶ exit
//!     └──spawn──▶ fresh worker
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::lifecycle::Shutdown;

/// Environment marker set on worker processes.
pub const WORKER_ENV: &str = "EXPERIMENT_HUB_RELOAD_WORKER";

/// Quiet period used to coalesce bursts of file events.
const DEBOUNCE: Duration = Duration::from_millis(300);

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("failed to watch files: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
}

/// Whether this process was started by a reload supervisor.
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Restarts a worker process whenever a watched file changes.
pub struct Supervisor {
    program: PathBuf,
    args: Vec<OsString>,
    targets: Vec<PathBuf>,
    grace: Duration,
}

enum Outcome {
    Stop,
    Restart,
    Exited,
}

impl Supervisor {
    /// Supervise `program` started with `args`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>, grace: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            targets: Vec::new(),
            grace,
        }
    }

    /// Restart the worker when `path` changes.
    pub fn watch(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = path.canonicalize().unwrap_or(path);
        self.targets.push(path);
        self
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ReloadError> {
        let (tx, mut changes) = mpsc::unbounded_channel();
        let _watcher = self.start_watcher(tx)?;
        let stop = shutdown.wait();
        tokio::pin!(stop);

        loop {
            let mut worker = self.spawn_worker()?;
            tracing::info!(pid = ?worker.id(), "Worker started");

            let outcome = tokio::select! {
                _ = &mut stop => Outcome::Stop,
                _ = next_change(&mut changes) => Outcome::Restart,
                status = worker.wait() => {
                    match status {
                        Ok(status) => tracing::warn!(%status, "Worker exited, waiting for changes"),
                        Err(e) => tracing::error!(error = %e, "Failed to wait on worker"),
                    }
                    Outcome::Exited
                }
            };

            match outcome {
                Outcome::Stop => {
                    self.stop_worker(&mut worker).await;
                    return Ok(());
                }
                Outcome::Restart => {
                    tracing::info!("Change detected, restarting worker");
                    self.stop_worker(&mut worker).await;
                }
                Outcome::Exited => {
                    tokio::select! {
                        _ = &mut stop => return Ok(()),
                        _ = next_change(&mut changes) => {
                            tracing::info!("Change detected, starting worker");
                        }
                    }
                }
            }
        }
    }

    fn start_watcher(
        &self,
        tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<RecommendedWatcher, ReloadError> {
        let targets = self.targets.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(path) = matching_path(&event, &targets) {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        // Watch parent directories: rebuilt binaries and editor saves replace
        // the file, which would drop a watch placed on the file itself.
        for dir in watch_dirs(&self.targets) {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            tracing::info!(path = ?dir, "Reload watcher started");
        }
        Ok(watcher)
    }

    fn spawn_worker(&self) -> Result<Child, ReloadError> {
        Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ReloadError::Spawn)
    }

    /// Ask the worker to exit by closing its stdin, then kill it after the
    /// grace period.
    async fn stop_worker(&self, worker: &mut Child) {
        drop(worker.stdin.take());
        match tokio::time::timeout(self.grace, worker.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "Worker stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to wait on worker"),
            Err(_) => {
                tracing::warn!(grace_secs = self.grace.as_secs(), "Worker did not stop in time, killing");
                if let Err(e) = worker.kill().await {
                    tracing::error!(error = %e, "Failed to kill worker");
                }
            }
        }
    }
}

/// Wait for a change, then swallow the rest of the burst.
async fn next_change(changes: &mut mpsc::UnboundedReceiver<PathBuf>) -> Option<PathBuf> {
    let first = changes.recv().await?;
    tracing::debug!(path = ?first, "Watched file changed");
    while let Ok(Some(_)) = tokio::time::timeout(DEBOUNCE, changes.recv()).await {}
    Some(first)
}

/// The first watched file an event touches, if it is a content change.
fn matching_path(event: &Event, targets: &[PathBuf]) -> Option<PathBuf> {
    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
        return None;
    }
    event
        .paths
        .iter()
        .find(|p| targets.iter().any(|t| same_file(p, t)))
        .cloned()
}

fn same_file(event_path: &Path, target: &Path) -> bool {
    event_path == target
        || event_path
            .canonicalize()
            .map(|p| p == target)
            .unwrap_or(false)
}

fn watch_dirs(targets: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = targets
        .iter()
        .filter_map(|t| t.parent().map(Path::to_path_buf))
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}
