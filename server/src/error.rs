//! Maps [`TunnelError`] onto HTTP status codes and JSON error bodies.
//! A thin newtype rather than an inherent impl, since
//! `TunnelError` lives in `tunnel-protocol` and must stay axum-free for the
//! client crate.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tunnel_protocol::TunnelError;

pub struct ApiError(pub TunnelError);

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            TunnelError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TunnelError::InvalidPort(_) => StatusCode::BAD_REQUEST,
            TunnelError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            TunnelError::DeveloperNotConnected(_) => StatusCode::BAD_GATEWAY,
            TunnelError::DeveloperDisconnected { .. } | TunnelError::DeveloperReplaced { .. } => {
                StatusCode::BAD_GATEWAY
            }
            TunnelError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            TunnelError::ChannelBackpressure(_) => StatusCode::SERVICE_UNAVAILABLE,
            TunnelError::Oversize { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            TunnelError::ProtocolError(_)
            | TunnelError::DuplicateRequestId(_)
            | TunnelError::HeartbeatTimeout { .. }
            | TunnelError::Cancelled(_)
            | TunnelError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}
