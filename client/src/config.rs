//! # Client Configuration
//!
//! Command-line arguments for the developer-side tunnel client.
//! Every flag also reads from an environment variable via clap's `env`
//! feature, matching the server's `Config::from_env` convention of never
//! requiring a flag the environment can supply instead.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "wingman",
    about = "Expose a local HTTP server through a Wingman tunnel",
    version
)]
pub struct Cli {
    /// Local port the developer's server is listening on.
    #[arg(long, env = "WINGMAN_TARGET_PORT")]
    pub target_port: u16,

    /// Existing session id to reconnect to. Omit to mint a new one via the
    /// REST API first.
    #[arg(long, env = "WINGMAN_SESSION_ID")]
    pub session_id: Option<String>,

    /// Developer id to register the session under.
    #[arg(long, env = "WINGMAN_DEVELOPER_ID", default_value = "local-developer")]
    pub developer_id: String,

    /// Base URL of the tunnel server. Used directly for the REST API and to
    /// derive the control-channel WebSocket URL (http/https -> ws/wss, `/ws`).
    #[arg(
        long,
        env = "WINGMAN_TUNNEL_SERVER_URL",
        default_value = "http://localhost:8787"
    )]
    pub tunnel_server_url: String,

    /// Milliseconds between reconnect attempts after a dropped connection.
    #[arg(long, env = "WINGMAN_RECONNECT_INTERVAL_MS", default_value_t = 5_000)]
    pub reconnect_interval_ms: u64,

    /// Maximum consecutive reconnect attempts before giving up entirely.
    #[arg(long, env = "WINGMAN_MAX_RECONNECT_ATTEMPTS", default_value_t = 10)]
    pub max_reconnect_attempts: u32,
}

impl Cli {
    /// Derives the control-channel WebSocket URL from `tunnel_server_url`.
    pub fn control_url(&self) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.tunnel_server_url)?;
        let ws_scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let _ = url.set_scheme(ws_scheme);
        url.set_path("/ws");
        Ok(url.to_string())
    }
}
