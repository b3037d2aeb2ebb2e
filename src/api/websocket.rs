//! WebSocket bridge for remote UI processes
//!
//! Each connection owns a [`ClientExchange`]. Frames from the socket become
//! submissions, cancels and log lines; completions, state signals and
//! notifications flow back as tagged JSON frames.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ApiState;
use crate::client::{Callbacks, ClientExchange};
use crate::message::{
    ErrorDescription, LogLevel, Notification, Request, RequestBody, RequestId,
};

/// Incoming WebSocket message from a remote UI
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Submit a request to the router
    Submit {
        /// Echoed back in `accepted` so the UI can learn the request id
        #[serde(default)]
        tag: Option<String>,
        request: RequestBody,
        #[serde(default = "default_cancelable")]
        cancelable: bool,
    },
    /// Ask for cancellation of a pending request
    Cancel { request_id: RequestId },
    /// Broadcast a log line
    Log { level: LogLevel, text: String },
    /// Ping to keep connection alive
    Ping,
}

const fn default_cancelable() -> bool {
    true
}

/// Outgoing WebSocket message to a remote UI
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Connection established
    Connected { session_id: uuid::Uuid },
    /// Request handed to the router
    Accepted {
        tag: Option<String>,
        request_id: RequestId,
    },
    /// Request completed successfully
    Response {
        request_id: RequestId,
        body: serde_json::Value,
    },
    /// Request completed with an error
    Failed {
        request_id: RequestId,
        error: ErrorDescription,
    },
    /// Progress of a pending request
    Progress { request_id: RequestId, percent: u8 },
    /// Broadcast notification
    Notification { notification: Notification },
    /// Frame could not be handled
    Error { code: String, message: String },
    /// Pong response
    Pong,
}

impl WsOutgoing {
    fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let session_id = uuid::Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let mut client = match ClientExchange::connect(&state.router).await {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting WebSocket, router unavailable");
            let error = WsOutgoing::error("core_disconnected", e.to_string());
            if let Ok(msg) = serde_json::to_string(&error) {
                let _ = sender.send(Message::Text(msg.into())).await;
            }
            return;
        }
    };

    // Callbacks run synchronously during dispatch, so the queue is unbounded
    let (tx, mut rx) = mpsc::unbounded_channel::<WsOutgoing>();
    let _ = tx.send(WsOutgoing::Connected { session_id });

    let notify_tx = tx.clone();
    client.on_notification(move |note| {
        let _ = notify_tx.send(WsOutgoing::Notification {
            notification: note.clone(),
        });
    });

    tracing::info!(session_id = %session_id, "WebSocket connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode WebSocket frame"),
            }
        }
    });

    let wake = client.waker();
    let mut recv_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = wake.notified() => {
                    client.dispatch_pending();
                    if client.is_disconnected() {
                        let _ = tx.send(WsOutgoing::error("core_disconnected", "router shut down"));
                        break;
                    }
                }
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => handle_message(&mut client, &tx, &text),
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Apply one text frame to the session's exchange
fn handle_message(client: &mut ClientExchange, tx: &mpsc::UnboundedSender<WsOutgoing>, text: &str) {
    let incoming = match serde_json::from_str::<WsIncoming>(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            let _ = tx.send(WsOutgoing::error("invalid_message", e.to_string()));
            return;
        }
    };

    match incoming {
        WsIncoming::Submit {
            tag,
            request,
            cancelable,
        } => {
            let request = Request::new(request);
            let request_id = request.id();
            match client.submit(request, session_callbacks(request_id, tx), cancelable) {
                Ok(request_id) => {
                    let _ = tx.send(WsOutgoing::Accepted { tag, request_id });
                }
                Err(error) => {
                    let _ = tx.send(WsOutgoing::Failed { request_id, error });
                }
            }
        }
        WsIncoming::Cancel { request_id } => {
            if !client.cancel(request_id) {
                tracing::debug!(request_id = %request_id, "cancel ignored");
            }
        }
        WsIncoming::Log { level, text } => {
            if let Err(e) = client.log(level, text) {
                let _ = tx.send(WsOutgoing::error("core_disconnected", e.to_string()));
            }
        }
        WsIncoming::Ping => {
            let _ = tx.send(WsOutgoing::Pong);
        }
    }
}

/// Callbacks that turn a request's outcome into outgoing frames
fn session_callbacks(request_id: RequestId, tx: &mpsc::UnboundedSender<WsOutgoing>) -> Callbacks {
    let ok = tx.clone();
    let failed = tx.clone();
    let progress = tx.clone();
    Callbacks::on_success(move |response| {
        let _ = ok.send(WsOutgoing::Response {
            request_id,
            body: response.body,
        });
    })
    .with_error(move |error| {
        let _ = failed.send(WsOutgoing::Failed { request_id, error });
    })
    .with_progress(move |percent| {
        let _ = progress.send(WsOutgoing::Progress {
            request_id,
            percent,
        });
    })
}
