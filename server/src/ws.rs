//! # Control-Channel WebSocket Handler
//!
//! Owns the lifecycle of one developer-or-PM control channel:
//! the `connected`/`register`/`registered` handshake, the heartbeat, frame
//! dispatch, and cleanup on disconnect. Generalizes the teacher's
//! `handle_connection`/`handle_message` pair in `handlers.rs` from a flat
//! agent/controller registry to the Session/Connection/Pending
//! registries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use tunnel_protocol::{ControlRole, Frame};

use crate::connection::ChannelHandle;
use crate::signaling::relay_signaling_frame;
use crate::state::AppState;
use crate::websocket_proxy::bridge_public_websocket;

/// A peer tolerates this many consecutive malformed frames before the
/// channel is closed with `ProtocolError`.
const MAX_PARSE_FAILURES: u32 = 5;
/// Two missed heartbeats close the channel.
const MAX_MISSED_HEARTBEATS: u32 = 2;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// When present, the socket is a public WebSocket-upgrade request being
    /// tunneled to the developer rather than a control-channel registration.
    /// Populated by the ingress router.
    #[serde(default)]
    pub tunnel_session: Option<String>,
    #[serde(default)]
    pub tunnel_path: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if let Some(session_id) = query.tunnel_session {
        let path = query.tunnel_path.unwrap_or_default();
        return ws.on_upgrade(move |socket| bridge_public_websocket(socket, state, session_id, path));
    }
    ws.on_upgrade(move |socket| handle_control_channel(socket, state))
}

async fn handle_control_channel(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    if sink
        .lock()
        .await
        .send(frame_to_message(&Frame::Connected {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }))
        .await
        .is_err()
    {
        return;
    }

    let mut registration: Option<(String, ChannelHandle)> = None;
    let mut parse_failures: u32 = 0;
    let mut missed_heartbeats: u32 = 0;
    let mut last_heartbeat_sent = Instant::now();
    let heartbeat_interval = state.config.heartbeat_interval;

    let mut writer_task: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        let idle_budget = heartbeat_interval.saturating_sub(last_heartbeat_sent.elapsed());
        tokio::select! {
            _ = tokio::time::sleep(idle_budget) => {
                missed_heartbeats += 1;
                if missed_heartbeats > MAX_MISSED_HEARTBEATS {
                    warn!("heartbeat timeout, closing control channel");
                    break;
                }
                let _ = sink.lock().await.send(frame_to_message(&Frame::Ping {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                })).await;
                last_heartbeat_sent = Instant::now();
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                let Ok(message) = incoming else { break };
                match message {
                    WsMessage::Text(text) => {
                        match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => {
                                parse_failures = 0;
                                missed_heartbeats = 0;
                                handle_frame(
                                    &state,
                                    &sink,
                                    &mut registration,
                                    &mut writer_task,
                                    frame,
                                )
                                .await;
                            }
                            Err(err) => {
                                parse_failures += 1;
                                warn!(%err, parse_failures, "malformed control-channel frame");
                                if parse_failures >= MAX_PARSE_FAILURES {
                                    warn!("too many malformed frames, closing with ProtocolError");
                                    break;
                                }
                            }
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(task) = writer_task.take() {
        task.abort();
    }
    if let Some((session_id, channel)) = registration {
        match channel.role {
            ControlRole::Developer => {
                state.connections.unregister_developer(&session_id, &state.pending);
                state.connections.notify_peer_disconnected(&session_id, ControlRole::Developer);
            }
            ControlRole::Pm => {
                state.connections.unregister_pm(&session_id, &channel);
                state.connections.notify_peer_disconnected(&session_id, ControlRole::Pm);
            }
        }
        info!(session_id, role = ?channel.role, "control channel disconnected");
    }
}

async fn handle_frame(
    state: &AppState,
    sink: &Arc<Mutex<futures::stream::SplitSink<WebSocket, WsMessage>>>,
    registration: &mut Option<(String, ChannelHandle)>,
    writer_task: &mut Option<tokio::task::JoinHandle<()>>,
    frame: Frame,
) {
    match frame {
        Frame::Register {
            role, session_id, ..
        } => {
            if state.sessions.get_session(&session_id).is_none() {
                let _ = sink
                    .lock()
                    .await
                    .send(frame_to_message(&Frame::Error {
                        error: "Session not found".into(),
                    }))
                    .await;
                return;
            }

            let (handle, mut rx) = ChannelHandle::new(role);
            match role {
                ControlRole::Developer => {
                    state.connections.register_developer(&session_id, handle.clone(), &state.pending);
                    state.sessions.mark_active(&session_id);
                }
                ControlRole::Pm => state.connections.register_pm(&session_id, handle.clone()),
            }

            let sink_clone = sink.clone();
            let task = tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    if sink_clone.lock().await.send(frame_to_message(&frame)).await.is_err() {
                        break;
                    }
                }
            });
            *writer_task = Some(task);
            *registration = Some((session_id.clone(), handle));

            info!(session_id, ?role, "control channel registered");
            let _ = sink
                .lock()
                .await
                .send(frame_to_message(&Frame::Registered { session_id, role }))
                .await;
        }

        Frame::Response {
            request_id,
            response,
            error,
            ..
        } => {
            if let Some(payload) = response {
                state.pending.resolve_request(&request_id, payload);
            } else if let Some(message) = error {
                state.pending.reject_request(
                    &request_id,
                    tunnel_protocol::TunnelError::Internal(message),
                );
            }
        }

        Frame::Ping { timestamp } => {
            let _ = sink.lock().await.send(frame_to_message(&Frame::Pong { timestamp })).await;
        }
        Frame::Pong { .. } => {}

        Frame::WebsocketMessage { ref connection_id, .. } => {
            let connection_id = connection_id.clone();
            state.ws_relays.route_frame(&connection_id, frame);
        }
        Frame::WebsocketClose { ref connection_id } => {
            let connection_id = connection_id.clone();
            state.ws_relays.route_frame(&connection_id, frame);
        }

        Frame::P2pOffer { ref session_id, .. }
        | Frame::P2pAnswer { ref session_id, .. }
        | Frame::P2pIceCandidate { ref session_id, .. }
        | Frame::P2pReady { ref session_id, .. }
        | Frame::P2pFailed { ref session_id, .. } => {
            let session_id = session_id.clone();
            if let Some((_, handle)) = registration.as_ref() {
                relay_signaling_frame(&state.connections, &session_id, handle.role, frame);
            }
        }

        _ => {}
    }
}

fn frame_to_message(frame: &Frame) -> WsMessage {
    WsMessage::Text(serde_json::to_string(frame).unwrap_or_default().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_to_message_round_trips_as_json_text() {
        let frame = Frame::Ping { timestamp: 42 };
        let WsMessage::Text(text) = frame_to_message(&frame) else {
            panic!("expected a text message");
        };
        let back: Frame = serde_json::from_str(&text).unwrap();
        assert!(matches!(back, Frame::Ping { timestamp: 42 }));
    }

    #[test]
    fn ws_query_defaults_when_fields_absent() {
        let query: WsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.tunnel_session.is_none());
        assert!(query.tunnel_path.is_none());
    }

    #[test]
    fn ws_query_parses_tunnel_fields_when_present() {
        let query: WsQuery =
            serde_json::from_str(r#"{"tunnel_session":"brave-otter","tunnel_path":"/a"}"#).unwrap();
        assert_eq!(query.tunnel_session.as_deref(), Some("brave-otter"));
        assert_eq!(query.tunnel_path.as_deref(), Some("/a"));
    }
}
