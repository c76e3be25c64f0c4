//! # Local WebSocket Relay
//!
//! The developer-side half of the optional WebSocket-upgrade bridge: on
//! `Frame::WebsocketConnect`, dial the
//! matching local WebSocket endpoint and relay `WebsocketMessage`/
//! `WebsocketClose` frames bidirectionally, keyed by `connection_id`.
//! Mirrors the server's `WebSocketRelayRegistry` (`server/src/websocket_proxy.rs`)
//! but runs on the opposite side of the tunnel.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as LocalWsMessage;
use tracing::warn;
use tunnel_protocol::Frame;

/// Registry of local-WebSocket relays currently bridged to the tunnel
/// server, keyed by `connection_id`.
#[derive(Clone, Default)]
pub struct WsRelayRegistry {
    relays: Arc<DashMap<String, mpsc::Sender<Frame>>>,
}

impl WsRelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route_frame(&self, connection_id: &str, frame: Frame) {
        if let Some(tx) = self.relays.get(connection_id) {
            if tx.try_send(frame).is_err() {
                warn!(connection_id, "dropping local websocket relay frame: queue full or closed");
            }
        }
    }

    /// Dials `ws://localhost:<target_port><url>` and bridges it to the
    /// control channel until either side closes.
    pub async fn relay_local_websocket(
        &self,
        target_port: u16,
        connection_id: String,
        url: String,
        control_tx: mpsc::UnboundedSender<Frame>,
    ) {
        let (from_control_tx, mut from_control_rx) = mpsc::channel::<Frame>(64);
        self.relays.insert(connection_id.clone(), from_control_tx);

        let local_url = format!("ws://localhost:{target_port}{url}");
        let (local_stream, _) = match connect_async(&local_url).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, local_url, "failed to connect to local websocket endpoint");
                self.relays.remove(&connection_id);
                let _ = control_tx.send(Frame::WebsocketClose {
                    connection_id: connection_id.clone(),
                });
                return;
            }
        };
        let (mut local_sink, mut local_stream) = local_stream.split();

        loop {
            tokio::select! {
                incoming = local_stream.next() => {
                    match incoming {
                        Some(Ok(LocalWsMessage::Text(text))) => {
                            let _ = control_tx.send(Frame::WebsocketMessage {
                                connection_id: connection_id.clone(),
                                data: text.to_string(),
                                is_base64: false,
                            });
                        }
                        Some(Ok(LocalWsMessage::Binary(bytes))) => {
                            let _ = control_tx.send(Frame::WebsocketMessage {
                                connection_id: connection_id.clone(),
                                data: BASE64.encode(&bytes),
                                is_base64: true,
                            });
                        }
                        Some(Ok(LocalWsMessage::Close(_))) | None => break,
                        Some(Err(err)) => {
                            warn!(%err, "local websocket read error");
                            break;
                        }
                        _ => {}
                    }
                }
                from_control = from_control_rx.recv() => {
                    match from_control {
                        Some(Frame::WebsocketMessage { data, is_base64, .. }) => {
                            let outgoing = if is_base64 {
                                BASE64
                                    .decode(data.as_bytes())
                                    .map(LocalWsMessage::Binary)
                                    .unwrap_or_else(|_| LocalWsMessage::Binary(Vec::new().into()))
                            } else {
                                LocalWsMessage::Text(data.into())
                            };
                            if local_sink.send(outgoing).await.is_err() {
                                break;
                            }
                        }
                        Some(Frame::WebsocketClose { .. }) | None => break,
                        _ => {}
                    }
                }
            }
        }

        let _ = control_tx.send(Frame::WebsocketClose { connection_id: connection_id.clone() });
        self.relays.remove(&connection_id);
    }
}
