//! Per-experiment message fan-out.
//!
//! Each experiment gets a broadcast channel the first time somebody
//! subscribes; the channel is dropped again when its last subscriber leaves.
//! Closing the hub ends every open subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::lifecycle::{BoxError, Resource, Shutdown};

/// A message exchanged on an experiment channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl ExperimentMessage {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("experiment hub is closed")]
    Closed,
}

/// Registry of experiment channels.
pub struct ExperimentHub {
    channels: DashMap<String, broadcast::Sender<ExperimentMessage>>,
    capacity: usize,
    closed: AtomicBool,
    shutdown: Shutdown,
}

impl ExperimentHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            shutdown: Shutdown::new(),
        }
    }

    /// Join the channel of `experiment_id`.
    pub fn subscribe(self: &Arc<Self>, experiment_id: &str) -> Result<Subscription, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        let receiver = self
            .channels
            .entry(experiment_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        tracing::debug!(experiment_id, "Subscriber joined");
        Ok(Subscription {
            experiment_id: experiment_id.to_string(),
            receiver,
            hub: Arc::clone(self),
        })
    }

    /// Deliver `message` to every subscriber of `experiment_id`.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, experiment_id: &str, message: ExperimentMessage) -> Result<usize, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        let delivered = self
            .channels
            .get(experiment_id)
            .and_then(|tx| tx.send(message).ok())
            .unwrap_or(0);
        Ok(delivered)
    }

    pub fn subscriber_count(&self, experiment_id: &str) -> usize {
        self.channels
            .get(experiment_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Number of experiments with at least one channel open.
    pub fn experiment_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new subscribers and end every open subscription.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(experiments = self.channels.len(), "Closing experiment channels");
            self.shutdown.trigger();
        }
    }

    fn release(&self, experiment_id: &str) {
        // The leaving receiver is already dropped, so zero means nobody is left.
        self.channels
            .remove_if(experiment_id, |_, tx| tx.receiver_count() == 0);
    }
}

#[async_trait]
impl Resource for ExperimentHub {
    fn name(&self) -> &str {
        "experiment-hub"
    }

    async fn start(&self) -> Result<(), BoxError> {
        if self.is_closed() {
            return Err(HubError::Closed.into());
        }
        Ok(())
    }

    async fn drain(&self) {
        self.close();
    }

    async fn stop(&self) -> Result<(), BoxError> {
        self.close();
        self.channels.clear();
        Ok(())
    }
}

/// One subscriber's view of an experiment channel.
pub struct Subscription {
    experiment_id: String,
    receiver: broadcast::Receiver<ExperimentMessage>,
    hub: Arc<ExperimentHub>,
}

impl Subscription {
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Next message, or `None` once the hub is closed.
    ///
    /// A subscriber that fell behind skips the messages it missed.
    pub async fn recv(&mut self) -> Option<ExperimentMessage> {
        let mut closed = self.hub.shutdown.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return None;
            }
            tokio::select! {
                result = self.receiver.recv() => match result {
                    Ok(message) => return Some(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            experiment_id = %self.experiment_id,
                            skipped,
                            "Subscriber lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                _ = closed.changed() => {}
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Drop our receiver before checking whether the channel is unused.
        let (_, placeholder) = broadcast::channel(1);
        drop(std::mem::replace(&mut self.receiver, placeholder));
        self.hub.release(&self.experiment_id);
        tracing::debug!(experiment_id = %self.experiment_id, "Subscriber left");
    }
}
