//! # Server State
//!
//! Dependency-injected handle bundling the three registries plus server
//! configuration, built once at startup and cloned into every axum
//! handler, replacing the teacher's module-scoped singletons — tests
//! build an `AppState` directly with `AppState::new(..)`, no process-wide
//! statics involved.

use std::sync::Arc;

use crate::config::Config;
use crate::connection::{ConnectionRegistry, P2pSettleWindow};
use crate::pending::PendingRequestTable;
use crate::persistence::PersistenceStore;
use crate::session::SessionRegistry;
use crate::websocket_proxy::WebSocketRelayRegistry;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub connections: ConnectionRegistry,
    pub pending: PendingRequestTable,
    pub ws_relays: WebSocketRelayRegistry,
    pub persistence: Option<PersistenceStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = SessionRegistry::new(config.idle_ttl);
        let connections = ConnectionRegistry::new(P2pSettleWindow(config.p2p_settle_window));
        let pending = PendingRequestTable::new(config.request_timeout);
        let persistence = config.storage_dir.as_ref().map(PersistenceStore::new);
        Self {
            sessions,
            connections,
            pending,
            ws_relays: WebSocketRelayRegistry::new(),
            persistence,
            config: Arc::new(config),
        }
    }
}
