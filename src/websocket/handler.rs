use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::delivery::{ChatMessage, DeliveryCoordinator, DeliveryError, UserId};
use crate::server::AppState;

use super::message::ServerMessage;

/// How long the send task gets to finish its current write after being told to stop
const SEND_TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: UserId,
}

/// WebSocket upgrade handler for a user's delivery stream
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, query), fields(user_id = query.user_id))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    tracing::info!("WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id))
}

/// Bridge an established WebSocket to the delivery coordinator
#[tracing::instrument(name = "ws.connection", skip(socket, state))]
async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let connection_start = std::time::Instant::now();
    let mut shutdown = state.shutdown.subscribe();

    let (tx, rx) = mpsc::channel::<ChatMessage>(state.settings.websocket.channel_buffer_size);

    // Registers the user, flushes the offline queue, then waits for `rx` to close
    let coordinator = state.coordinator.clone();
    let stream_task =
        tokio::spawn(async move { coordinator.open_delivery_stream(user_id, tx).await });

    let (ws_sender, mut ws_receiver) = socket.split();
    let (stop_tx, stop_rx) = oneshot::channel();

    // Task for sending messages from channel to WebSocket
    let mut send_task = tokio::spawn(forward_to_socket(rx, ws_sender, stop_rx));

    // Task for receiving frames from WebSocket; the stream is server-to-client only
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::debug!("Received close frame");
                    break;
                }
                Ok(Message::Text(_)) | Ok(Message::Binary(_)) => {
                    tracing::debug!("Ignoring inbound data frame on delivery stream");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let finished = tokio::select! {
        exit = &mut send_task => {
            tracing::debug!("Send task completed");
            Some(exit)
        }
        _ = &mut recv_task => {
            tracing::debug!("Receive task completed");
            None
        }
        _ = shutdown.recv() => {
            tracing::info!("Server shutting down, closing delivery stream");
            None
        }
    };

    let exit = match finished {
        Some(result) => result.ok(),
        None => {
            let _ = stop_tx.send(());
            match tokio::time::timeout(SEND_TASK_STOP_TIMEOUT, &mut send_task).await {
                Ok(result) => result.ok(),
                Err(_) => {
                    send_task.abort();
                    tracing::warn!("Send task did not stop in time, buffered messages are dropped");
                    None
                }
            }
        }
    };
    recv_task.abort();

    release_delivery_stream(&state.coordinator, user_id, exit, stream_task).await;

    tracing::info!(
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// What the send task hands back when it stops.
struct SendTaskExit {
    rx: mpsc::Receiver<ChatMessage>,
    /// Message taken from the channel whose socket write failed
    failed: Option<ChatMessage>,
}

async fn forward_to_socket(
    mut rx: mpsc::Receiver<ChatMessage>,
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut stop: oneshot::Receiver<()>,
) -> SendTaskExit {
    let mut failed = None;

    loop {
        let msg = tokio::select! {
            biased;
            _ = &mut stop => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let text = match serde_json::to_string(&ServerMessage::from(msg.clone())) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                continue;
            }
        };

        if ws_sender.send(Message::Text(text.into())).await.is_err() {
            failed = Some(msg);
            break;
        }
    }

    let _ = ws_sender.close().await;
    SendTaskExit { rx, failed }
}

/// End the delivery stream and put back whatever never reached the socket.
///
/// Closing the receiver ends the stream; messages still buffered in it are
/// collected first and returned to the head of the offline queue once the
/// stream has finished its own cleanup.
async fn release_delivery_stream(
    coordinator: &DeliveryCoordinator,
    user_id: UserId,
    exit: Option<SendTaskExit>,
    stream_task: JoinHandle<Result<(), DeliveryError>>,
) {
    let mut unsent = Vec::new();
    if let Some(SendTaskExit { mut rx, failed }) = exit {
        unsent.extend(failed);
        rx.close();
        while let Ok(message) = rx.try_recv() {
            unsent.push(message);
        }
    }

    match stream_task.await {
        Ok(Ok(())) => {}
        Ok(Err(DeliveryError::ChannelClosed { .. })) => {
            tracing::info!("Connection closed before offline queue was fully flushed");
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delivery stream failed");
        }
        Err(e) => {
            tracing::error!(error = %e, "Delivery stream task panicked");
        }
    }

    coordinator.return_unsent(user_id, unsent).await;
}
