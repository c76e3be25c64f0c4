//! # REST API Endpoints
//!
//! The developer-facing session lifecycle API: create, list,
//! inspect, patch, and delete tunnel sessions, plus a liveness probe.
//! Generalizes the teacher's single `list_agents` read endpoint into the
//! full CRUD surface `SessionRegistry` supports.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ApiError;
use crate::session::{Session, SessionFilter, SessionPatch};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub developer_id: String,
    pub target_port: u16,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// A session plus its derived public URL, the shape returned for single-session reads.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEnvelope {
    pub session: Session,
    pub tunnel_url: String,
}

impl SessionEnvelope {
    fn new(session: Session, base_domain: &str) -> Self {
        let tunnel_url = session.tunnel_url(base_domain);
        Self { session, tunnel_url }
    }
}

/// `POST /api/sessions` response: the envelope plus a top-level `sessionId`
/// so callers don't have to reach into `session.id` just to know what they made.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub envelope: SessionEnvelope,
}

impl CreateSessionResponse {
    fn new(session: Session, base_domain: &str) -> Self {
        Self {
            session_id: session.id.clone(),
            envelope: SessionEnvelope::new(session, base_domain),
        }
    }
}

/// `PUT /api/sessions/:id` response: just the patched session, no derived URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOnlyResponse {
    pub session: Session,
}

/// `POST /api/sessions` — mints a new session for a developer's local port.
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session = state
        .sessions
        .create_session(req.developer_id, req.target_port, req.metadata)?;
    if let Some(store) = &state.persistence {
        store.save(&session).await;
    }
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse::new(session, &state.config.base_domain)),
    ))
}

/// `GET /api/sessions` — lists sessions, optionally filtered by developer,
/// target port, or status.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Json<Vec<SessionEnvelope>> {
    let sessions = state
        .sessions
        .list_sessions(&filter)
        .into_iter()
        .map(|s| SessionEnvelope::new(s, &state.config.base_domain))
        .collect();
    Json(sessions)
}

/// `GET /api/sessions/:id` — fetches a single session.
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionEnvelope>, ApiError> {
    let session = state
        .sessions
        .get_session(&id)
        .ok_or_else(|| tunnel_protocol::TunnelError::SessionNotFound(id))?;
    Ok(Json(SessionEnvelope::new(session, &state.config.base_domain)))
}

/// `PUT /api/sessions/:id` — patches status and/or merges metadata.
pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> Result<Json<SessionOnlyResponse>, ApiError> {
    let session = state.sessions.update_session(&id, patch)?;
    if let Some(store) = &state.persistence {
        store.save(&session).await;
    }
    Ok(Json(SessionOnlyResponse { session }))
}

/// `DELETE /api/sessions/:id` — tears down a session: drops the record,
/// closes any live control channels, and cancels outstanding requests.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if !state.sessions.delete_session(&id) {
        return Err(tunnel_protocol::TunnelError::SessionNotFound(id).into());
    }
    state.connections.unregister_developer(&id, &state.pending);
    state.pending.cancel_requests_for_session(&id);
    if let Some(store) = &state.persistence {
        store.delete(&id).await;
    }
    Ok((StatusCode::OK, Json(json!({ "success": true }))))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub pending_requests: usize,
}

/// `GET /health` — liveness probe for load balancers and uptime checks.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
        pending_requests: state.pending.get_pending_request_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> AppState {
        AppState::new(Config::default())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let state = state();
        let created = state
            .sessions
            .create_session("dev-1".into(), 3000, None)
            .unwrap();
        let fetched = state.sessions.get_session(&created.id).unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.target_port, 3000);
    }

    #[tokio::test]
    async fn delete_missing_session_errors() {
        let state = state();
        let result = delete_session(State(state), Path("no-such-id".into())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let state = state();
        state.sessions.create_session("dev-1".into(), 3000, None).unwrap();
        let Json(body) = health(State(state)).await;
        assert_eq!(body.sessions, 1);
        assert_eq!(body.status, "ok");
    }
}
