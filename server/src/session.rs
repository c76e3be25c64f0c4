//! # Session Registry
//!
//! Owns [`Session`] records: creation, lookup, patching, deletion, and the
//! idle-expiry sweep. Generalizes the teacher's `AppState.agents`
//! map (`state.rs`) from a bare `ClientTx` lookup to a full record with a
//! lifecycle state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use tunnel_protocol::{generate_session_id, TunnelError};

/// Sessions idle longer than this (and not `permanent`) are reaped by
/// [`SessionRegistry::cleanup_expired_sessions`].
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A session's place in the `pending → active → (expired|closed)` DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Expired,
    Closed,
}

/// A tunnel binding between a public URL and a developer's local port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub developer_id: String,
    pub target_port: u16,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl Session {
    /// `https://<id>.<base_domain>`, the public tunnel URL for this session.
    pub fn tunnel_url(&self, base_domain: &str) -> String {
        format!("https://{}.{base_domain}", self.id)
    }

    /// `metadata.permanent === true` exempts a session from idle cleanup.
    pub fn is_permanent(&self) -> bool {
        matches!(self.metadata.get("permanent"), Some(Value::Bool(true)))
    }
}

/// Query parameters accepted by `GET /api/sessions`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionFilter {
    pub developer_id: Option<String>,
    pub target_port: Option<u16>,
    pub status: Option<SessionStatus>,
}

/// Fields an authenticated caller may patch via `PUT /api/sessions/:id`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub metadata: Option<Map<String, Value>>,
}

/// Creates, looks up, patches, and expires [`Session`] records. Cloned
/// cheaply (an `Arc<DashMap<..>>` inside); every handler task gets its own
/// handle.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Session>>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            idle_ttl,
        }
    }

    /// Validates `target_port`, mints a collision-free `<word>-<word>` id,
    /// and inserts a new `pending` session.
    pub fn create_session(
        &self,
        developer_id: String,
        target_port: u16,
        metadata: Option<Map<String, Value>>,
    ) -> Result<Session, TunnelError> {
        if target_port == 0 {
            return Err(TunnelError::InvalidPort(
                "targetPort must be in [1, 65535]".into(),
            ));
        }

        let id = loop {
            let candidate = generate_session_id();
            if !self.sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        let session = Session {
            id: id.clone(),
            developer_id,
            target_port,
            status: SessionStatus::Pending,
            created_at: now,
            last_activity: now,
            metadata: metadata.unwrap_or_default(),
        };
        self.sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Restores a session record verbatim, e.g. from a durable JSON file at
    /// startup. Does not validate the id shape —
    /// the file is assumed to have come from this registry originally.
    pub fn restore(&self, session: Session) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.clone())
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> Vec<Session> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|s| {
                filter
                    .developer_id
                    .as_ref()
                    .map_or(true, |d| &s.developer_id == d)
                    && filter.target_port.map_or(true, |p| s.target_port == p)
                    && filter.status.map_or(true, |st| s.status == st)
            })
            .collect()
    }

    /// Marks a session `active` on first successful developer registration
    /// and bumps `lastActivity`. A no-op if the session is missing.
    pub fn mark_active(&self, id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.status = SessionStatus::Active;
            entry.last_activity = Utc::now();
        }
    }

    pub fn touch(&self, id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(id) {
            entry.last_activity = Utc::now();
        }
    }

    pub fn update_session(
        &self,
        id: &str,
        patch: SessionPatch,
    ) -> Result<Session, TunnelError> {
        let mut entry = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| TunnelError::SessionNotFound(id.to_string()))?;
        if let Some(status) = patch.status {
            entry.status = status;
        }
        if let Some(metadata) = patch.metadata {
            entry.metadata.extend(metadata);
        }
        entry.last_activity = Utc::now();
        Ok(entry.clone())
    }

    pub fn delete_session(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Removes sessions idle longer than `idle_ttl` that are not permanent,
    /// flagging them `expired` first so any reader racing the removal still
    /// observes the terminal status.
    pub fn cleanup_expired_sessions(&self) -> Vec<Session> {
        let now = Utc::now();
        let expired_ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                !entry.is_permanent()
                    && now.signed_duration_since(entry.last_activity)
                        > chrono::Duration::from_std(self.idle_ttl).unwrap_or_default()
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                entry.status = SessionStatus::Expired;
            }
            if let Some((_, session)) = self.sessions.remove(&id) {
                removed.push(session);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(3600))
    }

    #[test]
    fn create_session_rejects_invalid_port() {
        let reg = registry();
        let err = reg.create_session("dev".into(), 0, None).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidArgument(_)));
    }

    #[test]
    fn create_session_generates_unique_word_word_ids() {
        let reg = registry();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let s = reg.create_session("dev".into(), 3000, None).unwrap();
            assert!(tunnel_protocol::is_valid_session_id(&s.id));
            assert!(seen.insert(s.id));
        }
    }

    #[test]
    fn permanent_session_survives_cleanup_when_idle() {
        let reg = registry();
        let mut session = reg.create_session("dev".into(), 3000, None).unwrap();
        session.metadata.insert("permanent".into(), Value::Bool(true));
        session.last_activity = Utc::now() - ChronoDuration::hours(48);
        reg.restore(session.clone());

        let removed = reg.cleanup_expired_sessions();
        assert!(removed.is_empty());
        assert!(reg.get_session(&session.id).is_some());
    }

    #[test]
    fn non_permanent_idle_session_is_expired_and_removed() {
        let reg = registry();
        let mut session = reg.create_session("dev".into(), 3000, None).unwrap();
        session.last_activity = Utc::now() - ChronoDuration::hours(48);
        reg.restore(session.clone());

        let removed = reg.cleanup_expired_sessions();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].status, SessionStatus::Expired);
        assert!(reg.get_session(&session.id).is_none());
    }

    #[test]
    fn update_session_merges_metadata() {
        let reg = registry();
        let session = reg.create_session("dev".into(), 3000, None).unwrap();
        let mut patch_meta = Map::new();
        patch_meta.insert("purpose".into(), Value::String("demo".into()));
        let updated = reg
            .update_session(
                &session.id,
                SessionPatch {
                    status: Some(SessionStatus::Closed),
                    metadata: Some(patch_meta),
                },
            )
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Closed);
        assert_eq!(
            updated.metadata.get("purpose").and_then(Value::as_str),
            Some("demo")
        );
    }

    #[test]
    fn update_session_missing_id_errors() {
        let reg = registry();
        let err = reg
            .update_session("nope-nope", SessionPatch::default())
            .unwrap_err();
        assert!(matches!(err, TunnelError::SessionNotFound(_)));
    }
}
