//! # Control-Channel Connection Loop
//!
//! The developer-side half of the tunnel protocol: connect to the tunnel server's
//! `/ws` endpoint, register the session, forward `Request` frames to the
//! local server, and reconnect with a bounded number of attempts on
//! failure. Generalizes the teacher's `run_agent_loop`/`handle_server_message`
//! pair in `client/src-tauri/src/agent.rs` — same split-socket-plus-
//! outbound-channel shape, same message-dispatch-by-variant structure —
//! from a TCP-stream relay to an HTTP request/response relay.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Client as HttpClient;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use tunnel_protocol::{ControlRole, Frame};

use crate::config::Cli;
use crate::forwarder::forward_request;
use crate::metrics::Metrics;
use crate::ws_relay::WsRelayRegistry;

/// Runs the control-channel connection loop until `max_reconnect_attempts`
/// consecutive failures are reached, or forever if a connection keeps
/// succeeding. Each successful registration resets the attempt counter.
///
/// Returns `true` if the loop gave up after exhausting reconnect attempts,
/// `false` if it stopped for any other reason (currently unreachable, but
/// leaves room for a future clean-shutdown signal without changing callers).
pub async fn run(cli: Cli, session_id: String, metrics: Arc<Metrics>) -> bool {
    let control_url = match cli.control_url() {
        Ok(url) => url,
        Err(err) => {
            error!(%err, "invalid tunnel server url");
            return true;
        }
    };

    let http_client = HttpClient::new();
    let ws_relay = WsRelayRegistry::new();
    let mut attempt = 0u32;

    loop {
        match run_once(&cli, &control_url, &session_id, &http_client, &ws_relay, &metrics).await {
            Ok(()) => {
                // Clean disconnect (server closed the socket); treat as a
                // reconnect-worthy event, not a fatal error.
                attempt = 0;
            }
            Err(err) => {
                attempt += 1;
                metrics.record_reconnect();
                metrics.record_error(err.to_string());
                error!(%err, attempt, "control channel connection failed");
                if attempt >= cli.max_reconnect_attempts {
                    error!(
                        attempts = attempt,
                        "giving up after reaching max reconnect attempts"
                    );
                    return true;
                }
            }
        }

        info!(
            delay_ms = cli.reconnect_interval_ms,
            "reconnecting to tunnel server"
        );
        tokio::time::sleep(Duration::from_millis(cli.reconnect_interval_ms)).await;
    }
}

async fn run_once(
    cli: &Cli,
    control_url: &str,
    session_id: &str,
    http_client: &HttpClient,
    ws_relay: &WsRelayRegistry,
    metrics: &Arc<Metrics>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let (ws_stream, _) = connect_async(control_url).await?;
    info!(url = %control_url, "connected to tunnel server");

    let (sink, mut stream) = ws_stream.split();
    let sink = Arc::new(tokio::sync::Mutex::new(sink));

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let writer_sink = sink.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if writer_sink.lock().await.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(incoming) = stream.next().await {
        let message = incoming?;
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<Frame>(&text) {
                Ok(frame) => {
                    handle_frame(cli, session_id, frame, &tx, http_client, ws_relay, metrics).await;
                }
                Err(err) => warn!(%err, "malformed frame from tunnel server"),
            },
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    Ok(())
}

async fn handle_frame(
    cli: &Cli,
    session_id: &str,
    frame: Frame,
    tx: &mpsc::UnboundedSender<Frame>,
    http_client: &HttpClient,
    ws_relay: &WsRelayRegistry,
    metrics: &Arc<Metrics>,
) {
    match frame {
        Frame::Connected { .. } => {
            let register = Frame::Register {
                role: ControlRole::Developer,
                session_id: session_id.to_string(),
                target_port: Some(cli.target_port),
                developer_id: Some(cli.developer_id.clone()),
                client_info: None,
            };
            let _ = tx.send(register);
        }

        Frame::Registered { session_id, .. } => {
            info!(session_id, "registered with tunnel server");
        }

        Frame::Ping { timestamp } => {
            let _ = tx.send(Frame::Pong { timestamp });
        }

        Frame::Request { .. } => {
            let target_port = cli.target_port;
            let tx = tx.clone();
            let client = http_client.clone();
            let metrics = metrics.clone();
            tokio::spawn(async move {
                let response = forward_request(&client, target_port, frame, &metrics).await;
                let _ = tx.send(response);
            });
        }

        Frame::WebsocketConnect { ref connection_id, ref url, .. } => {
            let target_port = cli.target_port;
            let connection_id = connection_id.clone();
            let url = url.clone();
            let tx = tx.clone();
            let ws_relay = ws_relay.clone();
            tokio::spawn(async move {
                ws_relay
                    .relay_local_websocket(target_port, connection_id, url, tx)
                    .await;
            });
        }

        Frame::WebsocketMessage { ref connection_id, .. } => {
            ws_relay.route_frame(connection_id, frame);
        }
        Frame::WebsocketClose { ref connection_id } => {
            ws_relay.route_frame(connection_id, frame);
        }

        Frame::P2pInitiate { .. }
        | Frame::P2pOffer { .. }
        | Frame::P2pAnswer { .. }
        | Frame::P2pIceCandidate { .. }
        | Frame::P2pReady { .. }
        | Frame::P2pFailed { .. } => {
            // P2P handoff needs a WebRTC stack the CLI client doesn't carry
            // (that lives in the browser-extension peer, out of scope here).
            // Acknowledging nothing is fine; the server's settle-window retry
            // is cosmetic for a developer client that will never answer.
        }

        Frame::Error { error } => {
            warn!(error, "tunnel server reported an error");
        }

        Frame::Response { .. } => {
            // Only ever sent by us, never received.
        }
    }
}
