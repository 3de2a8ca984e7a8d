//! Experiment live channel.
//!
//! `GET {prefix}/experiments/ws/{experiment_id}` upgrades to a WebSocket that
//! joins the experiment's room on the [`ExperimentHub`]:
//!
//! ```text
//! server → client   {"type":"connected","data":{"experiment_id":...}}
//! server → client   every message published to the experiment
//! client → server   {"type":...,"data":...}  → published to the experiment
//! client → server   anything else            → {"type":"error",...} to sender
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use crate::api::hub::{ExperimentMessage, Subscription};
use crate::http::error::ApiError;
use crate::http::server::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/experiments/ws/{experiment_id}", get(experiment_socket))
}

async fn experiment_socket(
    ws: WebSocketUpgrade,
    Path(experiment_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    // Subscribe before upgrading so a closed hub is reported as an HTTP error.
    let subscription = state.hub.subscribe(&experiment_id)?;
    tracing::info!(experiment_id = %experiment_id, "Experiment socket opened");

    Ok(ws.on_upgrade(move |socket| run_session(socket, subscription, state)))
}

async fn run_session(socket: WebSocket, mut subscription: Subscription, state: AppState) {
    let experiment_id = subscription.experiment_id().to_string();
    let (mut sender, mut receiver) = socket.split();

    let hello = ExperimentMessage::new("connected", json!({ "experiment_id": experiment_id }));
    if send_json(&mut sender, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            outbound = subscription.recv() => match outbound {
                Some(message) => {
                    if send_json(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Hub closed: the service is shutting down.
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ExperimentMessage>(text.as_str()) {
                        Ok(message) => {
                            tracing::debug!(experiment_id = %experiment_id, kind = %message.kind, "Client message");
                            if state.hub.publish(&experiment_id, message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let error = ExperimentMessage::new(
                                "error",
                                json!({ "detail": format!("invalid message: {e}") }),
                            );
                            if send_json(&mut sender, &error).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(experiment_id = %experiment_id, error = %e, "WebSocket error");
                    break;
                }
            },
        }
    }

    tracing::info!(experiment_id = %experiment_id, "Experiment socket closed");
}

async fn send_json<S>(sender: &mut S, message: &ExperimentMessage) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}
