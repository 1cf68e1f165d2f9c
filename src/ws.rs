//! Realtime notification socket.
//!
//! `GET /ws?token=<session>` upgrades after the session token checks out;
//! the socket then forwards only the caller's own notifications.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::access::AuthUser;
use crate::api::{ApiError, SharedState};
use crate::auth::{self, BEARER_SCHEME};
use crate::errors::LmsError;
use crate::notifications::{UserEvent, channel_name};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Resolve the session token of an upgrade request.
async fn authorize(state: &SharedState, params: WsParams) -> Result<AuthUser, ApiError> {
    let token = params
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or(LmsError::Unauthorized)?;
    let header = format!("{BEARER_SCHEME}{}", token.trim());
    let user = state
        .db
        .call(move |db| auth::authenticate(db, &header, Utc::now()))
        .await?;
    Ok(user)
}

pub async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let user = authorize(&state, params).await?;
    let rx = state.notifier.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, rx)))
}

async fn handle_socket(socket: WebSocket, user: AuthUser, rx: broadcast::Receiver<UserEvent>) {
    let channel = channel_name(user.id);
    info!(channel = %channel, "websocket connected");
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, user.id).await;
    info!(channel = %channel, "websocket disconnected");
}

/// JSON frame for `event` if it belongs to `user_id`.
fn frame_for(user_id: i64, event: &UserEvent) -> Option<String> {
    if event.user_id != user_id {
        return None;
    }
    match serde_json::to_string(&event.payload) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(user_id, error = %e, "failed to encode notification");
            None
        }
    }
}

/// Forward the user's events and keep the connection alive with pings.
///
/// If no Pong arrives within [`PONG_TIMEOUT`] after a Ping, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<UserEvent>,
    user_id: i64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(user_id, "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let Some(text) = frame_for(user_id, &event) else {
                            continue;
                        };
                        if sender.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(user_id, skipped, "websocket lagged behind notifications");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{login_as, test_state};
    use crate::notifications::NotificationPayload;
    use lms_common::models::{NotificationType, Role};

    fn event(user_id: i64) -> UserEvent {
        UserEvent {
            user_id,
            payload: NotificationPayload {
                notification_type: NotificationType::LevelUp,
                data: serde_json::json!({"level": 3}),
                created_at: "2024-05-01T12:00:00Z".to_string(),
            },
        }
    }

    #[test]
    fn test_frames_only_for_owner() {
        assert!(frame_for(2, &event(1)).is_none());
        let text = frame_for(1, &event(1)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["type"], "level_up");
        assert_eq!(json["data"]["level"], 3);
        assert_eq!(json["created_at"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test]
    async fn test_authorize_requires_valid_token() {
        let state = test_state();
        let (student, token) = login_as(&state, "s@x.test", Role::Student, None);

        let user = authorize(&state, WsParams { token: Some(token) }).await;
        assert_eq!(user.ok().map(|u| u.id), Some(student.id));

        let missing = authorize(&state, WsParams { token: None }).await;
        assert!(matches!(missing, Err(ApiError::Unauthorized(_))));
        let bogus = authorize(&state, WsParams { token: Some("nope".into()) }).await;
        assert!(matches!(bogus, Err(ApiError::Unauthorized(_))));
    }
}
