//! # Wingman Tunnel Server
//!
//! A WebSocket-based reverse-tunnel relay that exposes a developer's local
//! HTTP server at a public URL. It acts as a central hub connecting
//! **developers** (machines running a local server) with **public
//! clients** (anyone hitting the tunnel's public URL), plus an optional
//! **PM** (browser extension / preview-tool peer) role used for P2P
//! handoff.
//!
//! ## Architecture
//!
//! ```text
//! Public client ──HTTP/WS──► Tunnel Server ──control channel──► Developer ──► Local server
//!                                   │
//!                                   └──signaling──► PM (optional, for P2P handoff)
//! ```
//!
//! ## Modules
//!
//! - [`session`]    — session registry (data model, lifecycle, REST CRUD)
//! - [`connection`] — control-channel registry (developer/PM channels)
//! - [`pending`]    — request/response correlation table
//! - [`ingress`]    — subdomain/path-prefix → session id resolution
//! - [`proxy`]      — HTTP request/response relay over the control channel
//! - [`websocket_proxy`] — public WebSocket-upgrade relay
//! - [`signaling`]  — P2P offer/answer/ICE relay
//! - [`ws`]         — control-channel WebSocket handler
//! - [`api`]        — REST API endpoints
//! - [`persistence`] — optional durable session storage
//! - [`config`]     — environment-driven configuration
//! - [`error`]      — `TunnelError` → HTTP response mapping

pub mod api;
pub mod config;
pub mod connection;
pub mod cors;
pub mod error;
pub mod ingress;
pub mod pending;
pub mod persistence;
pub mod proxy;
pub mod session;
pub mod signaling;
pub mod state;
pub mod websocket_proxy;
pub mod ws;

use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::ingress::Ingress;
use crate::state::AppState;
use crate::websocket_proxy::bridge_public_websocket;

/// Assembles the full axum [`Router`] for a given [`AppState`]: session CRUD,
/// health probe, control-channel WebSocket upgrade, and the catch-all tunnel
/// fallback. Split out of the binary so integration tests can exercise the
/// exact router the server serves, without going through `main`.
pub fn build_router(state: AppState) -> Router {
    let cors = cors::build(&state.config);
    Router::new()
        .route(
            "/api/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(api::get_session)
                .put(api::update_session)
                .delete(api::delete_session),
        )
        .route("/health", get(api::health))
        .route("/ws", get(ws::ws_handler))
        .fallback(tunnel_fallback)
        .layer(cors)
        .with_state(state)
}

/// Catches every request that didn't match an API or control-channel route
/// and resolves it against the ingress router. Handles both
/// plain HTTP requests (via [`proxy::handle_tunnel_request`]) and public
/// WebSocket upgrades (via [`bridge_public_websocket`]) for the same
/// subdomain/path-prefix resolution.
async fn tunnel_fallback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
    body: Body,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok());
    let ingress = ingress::resolve(host, uri.path(), &state.config.base_domain);

    let (session_id, forward_path) = match ingress {
        Ingress::Tunnel { session_id, path } => {
            let forward_path = if path.is_empty() {
                // Subdomain match: the original path is the request path, untouched.
                match uri.query() {
                    Some(q) => format!("{}?{q}", uri.path()),
                    None => uri.path().to_string(),
                }
            } else {
                match uri.query() {
                    Some(q) => format!("{path}?{q}"),
                    None => path,
                }
            };
            (session_id, forward_path)
        }
        Ingress::InvalidSessionShape => {
            return not_found("Session not found", "SESSION_NOT_FOUND");
        }
        Ingress::PassThrough => {
            return not_found("Not found", "NOT_FOUND");
        }
    };

    if let Some(ws) = ws {
        return ws
            .on_upgrade(move |socket| bridge_public_websocket(socket, state, session_id, forward_path));
    }

    proxy::handle_tunnel_request(state, session_id, method, forward_path, headers, body).await
}

fn not_found(message: &str, code: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": message, "code": code })),
    )
        .into_response()
}
