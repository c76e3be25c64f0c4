//! # WebSocket Upgrade Relay
//!
//! An optional path alongside the plain HTTP relay: a public WebSocket
//! upgrade is bridged through the same control channel used for HTTP, tagged
//! by a fresh `connection_id` instead of a `requestId`. Order is preserved
//! per connection id; `isBase64` distinguishes text from binary frames, same
//! as the HTTP body encoding.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tunnel_protocol::Frame;
use uuid::Uuid;

use crate::state::AppState;

/// Registry of public-side WebSocket relays currently bridged to a
/// developer, keyed by `connection_id`. `ws.rs`'s frame dispatcher looks
/// here to route inbound `websocket-message` / `websocket-close` frames.
#[derive(Clone, Default)]
pub struct WebSocketRelayRegistry {
    relays: Arc<DashMap<String, mpsc::Sender<Frame>>>,
}

impl WebSocketRelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_frame(&self, connection_id: &str, frame: Frame) {
        if let Some(tx) = self.relays.get(connection_id) {
            if tx.try_send(frame).is_err() {
                warn!(connection_id, "dropping websocket relay frame: queue full or closed");
            }
        } else {
            debug!(connection_id, "websocket relay frame for unknown connection");
        }
    }

    fn register(&self, connection_id: String, tx: mpsc::Sender<Frame>) {
        self.relays.insert(connection_id, tx);
    }

    fn unregister(&self, connection_id: &str) {
        self.relays.remove(connection_id);
    }
}

/// Bridges one accepted public WebSocket to the developer's control channel
/// for the duration of the connection.
pub async fn bridge_public_websocket(
    socket: WebSocket,
    state: AppState,
    session_id: String,
    url: String,
) {
    let connection_id = Uuid::new_v4().to_string();
    let (from_developer_tx, mut from_developer_rx) = mpsc::channel::<Frame>(64);
    state
        .ws_relays
        .register(connection_id.clone(), from_developer_tx);

    if let Err(err) = state.connections.send_to_developer(
        &session_id,
        Frame::WebsocketConnect {
            connection_id: connection_id.clone(),
            session_id: session_id.clone(),
            url,
        },
    ) {
        warn!(session_id, %err, "failed to notify developer of websocket upgrade");
        state.ws_relays.unregister(&connection_id);
        return;
    }

    let (mut public_sink, mut public_stream) = {
        use futures::StreamExt;
        socket.split()
    };

    loop {
        tokio::select! {
            incoming = public_stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let _ = state.connections.send_to_developer(
                            &session_id,
                            Frame::WebsocketMessage {
                                connection_id: connection_id.clone(),
                                data: text.to_string(),
                                is_base64: false,
                            },
                        );
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let _ = state.connections.send_to_developer(
                            &session_id,
                            Frame::WebsocketMessage {
                                connection_id: connection_id.clone(),
                                data: BASE64.encode(&bytes),
                                is_base64: true,
                            },
                        );
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        warn!(session_id, %err, "public websocket read error");
                        break;
                    }
                    _ => {}
                }
            }
            from_dev = from_developer_rx.recv() => {
                match from_dev {
                    Some(Frame::WebsocketMessage { data, is_base64, .. }) => {
                        use futures::SinkExt;
                        let outgoing = if is_base64 {
                            BASE64
                                .decode(data.as_bytes())
                                .map(WsMessage::Binary)
                                .unwrap_or_else(|_| WsMessage::Binary(Vec::new().into()))
                        } else {
                            WsMessage::Text(data.into())
                        };
                        if public_sink.send(outgoing).await.is_err() {
                            break;
                        }
                    }
                    Some(Frame::WebsocketClose { .. }) | None => break,
                    _ => {}
                }
            }
        }
    }

    let _ = state
        .connections
        .send_to_developer(&session_id, Frame::WebsocketClose { connection_id: connection_id.clone() });
    state.ws_relays.unregister(&connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn route_frame_delivers_to_registered_connection() {
        let registry = WebSocketRelayRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        registry.register("conn-1".into(), tx);

        registry.route_frame(
            "conn-1",
            Frame::WebsocketMessage {
                connection_id: "conn-1".into(),
                data: "hello".into(),
                is_base64: false,
            },
        );

        let received = rx.recv().await.unwrap();
        match received {
            Frame::WebsocketMessage { data, .. } => assert_eq!(data, "hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn route_frame_for_unknown_connection_is_a_no_op() {
        let registry = WebSocketRelayRegistry::new();
        // No registered relay for "missing" — must not panic, just drop.
        registry.route_frame("missing", Frame::WebsocketClose { connection_id: "missing".into() });
    }

    #[test]
    fn unregister_removes_the_relay() {
        let registry = WebSocketRelayRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        registry.register("conn-2".into(), tx);
        registry.unregister("conn-2");
        assert!(registry.relays.get("conn-2").is_none());
    }
}
