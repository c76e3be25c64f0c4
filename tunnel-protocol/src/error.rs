//! Error kinds exchanged between the registries, the proxy engine, and the
//! tunnel client.
//!
//! `TunnelError` carries no HTTP semantics itself — `server::error` maps each
//! variant to a status code and JSON body; the client matches on it directly.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TunnelError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid target port: {0}")]
    InvalidPort(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("developer not connected for session {0}")]
    DeveloperNotConnected(String),

    #[error("developer disconnected while request {request_id} was pending")]
    DeveloperDisconnected { request_id: String },

    #[error("developer connection replaced while request {request_id} was pending")]
    DeveloperReplaced { request_id: String },

    #[error("request {id} timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("channel backpressure: outbound queue full for session {0}")]
    ChannelBackpressure(String),

    #[error("request body exceeds the {limit_bytes} byte limit")]
    Oversize { limit_bytes: usize },

    #[error("control channel protocol error: {0}")]
    ProtocolError(String),

    #[error("duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("heartbeat timeout: peer missed {missed} consecutive pings")]
    HeartbeatTimeout { missed: u32 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TunnelError {
    /// A stable machine-readable code, used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TunnelError::InvalidArgument(_) => "INVALID_REQUEST",
            TunnelError::InvalidPort(_) => "INVALID_PORT",
            TunnelError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            TunnelError::DeveloperNotConnected(_) => "DEVELOPER_NOT_CONNECTED",
            TunnelError::DeveloperDisconnected { .. } => "DEVELOPER_DISCONNECTED",
            TunnelError::DeveloperReplaced { .. } => "DEVELOPER_REPLACED",
            TunnelError::Timeout { .. } => "REQUEST_TIMEOUT",
            TunnelError::ChannelBackpressure(_) => "BACKPRESSURE",
            TunnelError::Oversize { .. } => "PAYLOAD_TOO_LARGE",
            TunnelError::ProtocolError(_) => "PROTOCOL_ERROR",
            TunnelError::DuplicateRequestId(_) => "DUPLICATE_REQUEST_ID",
            TunnelError::HeartbeatTimeout { .. } => "HEARTBEAT_TIMEOUT",
            TunnelError::Cancelled(_) => "CANCELLED",
            TunnelError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
