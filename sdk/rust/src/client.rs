use std::ops::ControlFlow;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("invalid message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gave up after {0} reconnect attempts")]
    ReconnectExhausted(u32),
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SdkError::WebSocket(Box::new(err))
    }
}

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

/// A message on an experiment channel.
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

/// Reconnect schedule for [`HubClient::watch_experiment`].
///
/// The n-th consecutive attempt waits `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based), or `None` once the
    /// budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * attempt)
    }
}

pub struct HubClient {
    client: Client,
    base_url: Url,
    api_prefix: String,
}

impl HubClient {
    /// Client for the service at `base_url` (e.g. "http://localhost:8000").
    pub fn new(base_url: &str) -> Result<Self, SdkError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            api_prefix: "/api/v1".to_string(),
        })
    }

    /// Use a different API prefix than "/api/v1".
    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    /// Fetch the service identity.
    pub async fn identity(&self) -> Result<ServiceIdentity, SdkError> {
        self.get_json("/").await
    }

    /// Fetch the liveness status.
    pub async fn health(&self) -> Result<HealthStatus, SdkError> {
        self.get_json("/health").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SdkError> {
        let resp = self.client.get(self.base_url.join(path)?).send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(SdkError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// WebSocket URL of an experiment channel.
    ///
    /// The experiment ID is percent-encoded as a single path segment.
    pub fn experiment_url(&self, experiment_id: &str) -> Result<Url, SdkError> {
        let mut url = self.base_url.join(self.api_prefix.trim_end_matches('/'))?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend(["experiments", "ws", experiment_id]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) → ws(s) is always a valid scheme change.
        let _ = url.set_scheme(scheme);
        Ok(url)
    }

    /// Open one connection to an experiment channel.
    pub async fn connect_experiment(&self, experiment_id: &str) -> Result<ExperimentStream, SdkError> {
        let url = self.experiment_url(experiment_id)?;
        tracing::debug!(url = %url, "Connecting to experiment channel");
        let (inner, _) = connect_async(url.as_str()).await?;
        Ok(ExperimentStream { inner })
    }

    /// Follow an experiment, reconnecting on disconnect.
    ///
    /// `handler` sees every message; returning `ControlFlow::Break` ends the
    /// watch. The attempt counter resets after each successful connection.
    pub async fn watch_experiment<F>(
        &self,
        experiment_id: &str,
        policy: ReconnectPolicy,
        mut handler: F,
    ) -> Result<(), SdkError>
    where
        F: FnMut(ExperimentMessage) -> ControlFlow<()>,
    {
        let mut attempts = 0;
        loop {
            match self.connect_experiment(experiment_id).await {
                Ok(mut stream) => {
                    attempts = 0;
                    while let Some(next) = stream.next_message().await {
                        match next {
                            Ok(message) => {
                                if handler(message).is_break() {
                                    let _ = stream.close().await;
                                    return Ok(());
                                }
                            }
                            Err(SdkError::Decode(e)) => {
                                tracing::warn!(error = %e, "Skipping undecodable message");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Experiment channel failed");
                                break;
                            }
                        }
                    }
                    tracing::info!(experiment_id, "Experiment channel closed");
                }
                Err(e) => tracing::warn!(experiment_id, error = %e, "Connection attempt failed"),
            }

            attempts += 1;
            let Some(delay) = policy.delay_for(attempts) else {
                return Err(SdkError::ReconnectExhausted(policy.max_attempts));
            };
            tracing::info!(attempt = attempts, max = policy.max_attempts, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;
        }
    }
}

/// An open experiment channel.
pub struct ExperimentStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl ExperimentStream {
    /// Next message from the server; `None` once the channel closed.
    pub async fn next_message(&mut self) -> Option<Result<ExperimentMessage, SdkError>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(SdkError::from))
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    /// Publish a message to every subscriber of the experiment.
    pub async fn send(&mut self, message: &ExperimentMessage) -> Result<(), SdkError> {
        let text = serde_json::to_string(message)?;
        self.inner.send(Message::text(text)).await?;
        Ok(())
    }

    /// Send a raw text frame, bypassing message encoding.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), SdkError> {
        self.inner.send(Message::text(text)).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), SdkError> {
        self.inner.close(None).await?;
        Ok(())
    }
}
