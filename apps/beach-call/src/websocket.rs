use std::borrow::Cow;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::engine::Disconnection;
use crate::protocol::{decode_client_event, encode_server_event, ClientEvent};
use crate::registry::{ConnectionHandle, Outbound};
use crate::routes::ApiError;
use crate::session::Identity;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

/// GET /ws?token=... - verify the token, then upgrade. The token is checked
/// before the upgrade headers so unauthenticated callers always get a 401.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(token) = query.token.filter(|token| !token.trim().is_empty()) else {
        return ApiError::Unauthorized.into_response();
    };

    let identity = match state.verifier().verify(&token) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "websocket token rejected");
            return ApiError::Unauthorized.into_response();
        }
    };

    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_socket(socket, identity, state)),
        None => ApiError::BadRequest("websocket upgrade required".into()).into_response(),
    }
}

/// Handle one party's connection until it closes.
async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut rx) = ConnectionHandle::channel(state.outbound_buffer());
    let connection_id = handle.id();

    if let Some(previous) = state.engine().registry().register(&identity, handle) {
        info!(
            identity = %identity,
            superseded = %previous.id(),
            "closing superseded connection"
        );
        previous.close("superseded by a newer connection");
    }
    counter!("beach_call_connections_total").increment(1);
    info!(identity = %identity, connection_id = %connection_id, "websocket connected");

    // Drain the outbound queue into the socket.
    let writer_identity = identity.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let message = match outbound {
                Outbound::Event(event) => match encode_server_event(&event) {
                    Ok(json) => Message::Text(json),
                    Err(err) => {
                        warn!(identity = %writer_identity, error = %err, "failed to encode event");
                        continue;
                    }
                },
                Outbound::Close(reason) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
        debug!(identity = %writer_identity, "writer task finished");
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = &mut writer => {
                debug!(identity = %identity, "writer closed; ending connection");
                break;
            }
        };
        let Some(frame) = frame else {
            break;
        };

        let text = match frame {
            Ok(Message::Text(text)) => text,
            // Binary frames carrying UTF-8 JSON are accepted for compatibility.
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!(identity = %identity, "non-UTF8 binary frame; closing connection");
                    break;
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    identity = %identity,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(err) => {
                warn!(identity = %identity, error = %err, "websocket read error");
                break;
            }
        };

        match decode_client_event(&text) {
            Ok(ClientEvent::Signal(payload)) => {
                state.relay().relay(&identity, payload);
            }
            Ok(ClientEvent::Unrecognized(event)) => {
                debug!(identity = %identity, event = %event, "ignoring event");
            }
            Err(err) => {
                warn!(identity = %identity, error = %err, "undecodable frame; closing connection");
                break;
            }
        }
    }

    match state.engine().disconnect(&identity, connection_id) {
        Disconnection::Superseded => {
            debug!(identity = %identity, connection_id = %connection_id, "superseded connection closed");
        }
        Disconnection::Idle => {}
        Disconnection::Ended(session) => {
            info!(
                identity = %identity,
                session_id = %session.id,
                "session ended by disconnect"
            );
        }
    }
    writer.abort();

    info!(identity = %identity, connection_id = %connection_id, "websocket disconnected");
}
