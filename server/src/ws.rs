use crate::matchmaker::{guest_snapshot, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures::{sink::SinkExt, stream::StreamExt};
use shared::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

pub async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats().await)
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Forward outbound messages from the matchmaker to the socket.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(%err, "failed to encode server message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Anonymous identity per connection; auth is out of scope.
    let user_id = uuid::Uuid::new_v4().to_string();
    state.add_player(user_id.clone(), tx, guest_snapshot(&user_id));

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else {
            continue;
        };
        let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
            tracing::debug!(user_id = %user_id, "unparseable client message dropped");
            continue;
        };
        // Heartbeats bypass rate limiting; dropping them would fabricate
        // link failures.
        if !matches!(client_msg, ClientMessage::Heartbeat) && !state.check_rate_limit(&user_id) {
            continue;
        }
        match client_msg {
            ClientMessage::FindMatch { mode, session_type } => {
                if let Err(err) = state.find_or_create_match(&user_id, mode, session_type).await {
                    state.notify(&user_id, ServerMessage::Error(err.to_string()));
                }
            }
            ClientMessage::QueueOptimistic { mode, session_type } => {
                state.queue_optimistic(&user_id, mode, session_type);
            }
            ClientMessage::CancelFindMatch => {
                if let Err(err) = state.cancel_matchmaking(&user_id).await {
                    state.notify(&user_id, ServerMessage::Error(err.to_string()));
                }
            }
            ClientMessage::Heartbeat => {
                state.handle_heartbeat(&user_id);
            }
            ClientMessage::LeaveMatch => {
                state.handle_user_gone(&user_id).await;
            }
        }
    }

    // Socket closed.
    state.remove_player(&user_id).await;
}
