//! Process lifecycle state machine.
//!
//! # States
//! ```text
//! Uninitialized → Starting → Serving → Stopping → Stopped
//!                     │                    ▲
//!                     └── startup failed ──┘
//! ```
//!
//! Every edge is taken at most once. Observers subscribe through a watch
//! channel, so a waiter never misses the phase it is waiting for.

use std::fmt;

use thiserror::Error;
use tokio::sync::watch;

/// Lifecycle phase of one application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    Starting,
    Serving,
    Stopping,
    Stopped,
}

impl Phase {
    /// Whether `self → next` is an edge of the state machine.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Uninitialized, Phase::Starting)
                | (Phase::Starting, Phase::Serving)
                | (Phase::Starting, Phase::Stopping)
                | (Phase::Serving, Phase::Stopping)
                | (Phase::Stopping, Phase::Stopped)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Starting => "starting",
            Phase::Serving => "serving",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition { from: Phase, to: Phase },
}

/// Shared handle onto the phase of one application.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: watch::Sender<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Uninitialized);
        Self { tx }
    }

    /// Current phase.
    pub fn current(&self) -> Phase {
        *self.tx.borrow()
    }

    /// Move to `next`, rejecting skipped, repeated or backward transitions.
    pub fn advance(&self, next: Phase) -> Result<(), LifecycleError> {
        let mut result = Ok(());
        self.tx.send_if_modified(|phase| {
            if phase.can_advance_to(next) {
                tracing::debug!(from = %phase, to = %next, "Lifecycle transition");
                *phase = next;
                true
            } else {
                result = Err(LifecycleError::InvalidTransition {
                    from: *phase,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Subscribe to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }

    /// Wait until the lifecycle reaches `phase`.
    ///
    /// Returns `false` if the lifecycle can no longer reach it (it already
    /// moved past, or every sender was dropped).
    pub async fn wait_for(&self, phase: Phase) -> bool {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|p| *p == phase || !reachable(*p, phase)).await {
            Ok(current) => *current == phase,
            Err(_) => false,
        };
        reached
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `target` can still be reached from `from`.
fn reachable(from: Phase, target: Phase) -> bool {
    let mut current = from;
    loop {
        if current == target {
            return true;
        }
        current = match current {
            Phase::Uninitialized => Phase::Starting,
            Phase::Starting => {
                if target == Phase::Serving {
                    Phase::Serving
                } else {
                    Phase::Stopping
                }
            }
            Phase::Serving => Phase::Stopping,
            Phase::Stopping => Phase::Stopped,
            Phase::Stopped => return false,
        };
    }
}
