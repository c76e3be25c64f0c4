//! # Wingman Tunnel Client
//!
//! The developer-side counterpart to `tunnel-server`: registers a session's
//! control channel and forwards inbound requests to a local HTTP server
//! Generalizes the teacher's Tauri desktop agent
//! (`client/src-tauri`) into a headless CLI — same reconnect-loop shape,
//! no GUI, no TCP-stream multiplexing (replaced by the server's per-request
//! HTTP relay).
//!
//! ## Modules
//!
//! - [`config`]     — CLI argument parsing
//! - [`connection`] — control-channel WebSocket loop, reconnect, dispatch
//! - [`forwarder`]  — replays `Request` frames against the local server
//! - [`ws_relay`]   — bridges a local WebSocket endpoint through the tunnel
//! - [`metrics`]    — in-memory request/connection counters

mod config;
mod connection;
mod forwarder;
mod metrics;
mod ws_relay;

use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use crate::config::Cli;
use crate::metrics::Metrics;

#[derive(Debug, Deserialize)]
struct CreatedSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_client=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let metrics = Arc::new(Metrics::default());

    let session_id = match &cli.session_id {
        Some(id) => id.clone(),
        None => match create_session(&cli).await {
            Ok(id) => id,
            Err(err) => {
                error!(%err, "failed to create a tunnel session");
                std::process::exit(1);
            }
        },
    };

    info!(session_id, port = cli.target_port, "starting tunnel client");
    spawn_metrics_log(metrics.clone());
    let gave_up = connection::run(cli, session_id, metrics).await;
    if gave_up {
        std::process::exit(1);
    }
}

/// Logs a metrics snapshot periodically so a developer running the CLI in
/// a terminal can see request volume and error rate without a dashboard.
fn spawn_metrics_log(metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let snapshot = metrics.snapshot();
            info!(
                total = snapshot.total_requests,
                successful = snapshot.successful_requests,
                failed = snapshot.failed_requests,
                avg_latency_ms = snapshot.average_latency_ms,
                reconnects = snapshot.reconnect_count,
                "tunnel client metrics"
            );
        }
    });
}

#[derive(Debug, thiserror::Error)]
enum CreateSessionError {
    #[error("invalid --tunnel-server-url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Mints a new session via the REST API when `--session-id` wasn't given.
async fn create_session(cli: &Cli) -> Result<String, CreateSessionError> {
    let base = url::Url::parse(&cli.tunnel_server_url)?;
    let url = base.join("/api/sessions")?;
    let response = reqwest::Client::new()
        .post(url)
        .json(&serde_json::json!({
            "developerId": cli.developer_id,
            "targetPort": cli.target_port,
        }))
        .send()
        .await?
        .error_for_status()?;
    let created: CreatedSession = response.json().await?;
    Ok(created.session_id)
}
