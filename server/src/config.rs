//! # Server Configuration
//!
//! Reads the environment variables the server accepts, with the timeout
//! defaults the protocol names. The teacher hardcodes its listen port and CORS policy in
//! `main.rs`; we lift both into a `Config` built once at startup so tests can
//! construct a `Config` without touching the process environment.

use std::env;
use std::time::Duration;

/// `requestTimeoutMs` default.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// `heartbeatInterval` default.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// `idleTTL` default.
pub const DEFAULT_IDLE_TTL_SECS: u64 = 24 * 60 * 60;
/// `maxRequestBytes` default (25 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub env: Environment,
    pub base_domain: String,
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub idle_ttl: Duration,
    pub max_request_bytes: usize,
    pub p2p_settle_window: Duration,
    pub storage_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Config {
    /// Reads configuration from the process environment, falling back to
    /// spec-mandated defaults. Never panics: every variable is optional.
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8787);

        let env_name = env::var("ENV").unwrap_or_default();
        let environment = if env_name.eq_ignore_ascii_case("development")
            || env_name.eq_ignore_ascii_case("dev")
        {
            Environment::Development
        } else {
            Environment::Production
        };

        let base_domain = env::var("TUNNEL_BASE_URL")
            .unwrap_or_else(|_| format!("localhost:{port}"));

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let storage_dir = env::var("TUNNEL_STORAGE_DIR").ok();

        Self {
            port,
            env: environment,
            base_domain,
            cors_allowed_origins,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECS),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            p2p_settle_window: Duration::from_secs(1),
            storage_dir,
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            env: Environment::Development,
            base_domain: "localhost:8787".into(),
            cors_allowed_origins: Vec::new(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            idle_ttl: Duration::from_secs(DEFAULT_IDLE_TTL_SECS),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            p2p_settle_window: Duration::from_millis(50),
            storage_dir: None,
        }
    }
}
