//! Binary entry point for the tunnel server: loads configuration, restores
//! any persisted sessions, starts the idle-session sweep, and serves the
//! router built by [`tunnel_server::build_router`].

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use tunnel_server::config::Config;
use tunnel_server::state::AppState;
use tunnel_server::build_router;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tunnel_server=info".into()),
        )
        .init();

    let config = Config::from_env();
    let state = AppState::new(config);

    if let Some(store) = &state.persistence {
        store.ensure_dir().await;
        store.load_all(&state.sessions).await;
    }

    spawn_idle_sweep(state.clone());

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = build_router(state);

    info!(%addr, "wingman tunnel server listening");
    let listener = TcpListener::bind(addr).await.expect("failed to bind listen address");
    axum::serve(listener, app).await.expect("server error");
}

/// Runs [`tunnel_server::session::SessionRegistry::cleanup_expired_sessions`]
/// on a fixed interval for the life of the process.
fn spawn_idle_sweep(state: AppState) {
    const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let expired = state.sessions.cleanup_expired_sessions();
            for session in &expired {
                state
                    .connections
                    .unregister_developer(&session.id, &state.pending);
                if let Some(store) = &state.persistence {
                    store.delete(&session.id).await;
                }
            }
            if !expired.is_empty() {
                info!(count = expired.len(), "expired idle sessions");
            }
        }
    });
}
