//! # Proxy Engine
//!
//! Serializes an inbound public HTTP request onto the developer's control
//! channel, awaits the correlated response, and writes it back.
//! This is the module the teacher's `relay_message` helper generalizes most:
//! instead of blindly forwarding a raw TCP byte stream, each HTTP request
//! becomes one `Frame::Request` / `Frame::Response` round trip correlated by
//! id through the [`crate::pending`] table.

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, HeaderName, HeaderValue as AxumHeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use tunnel_protocol::{Frame, HeaderValue, HttpHeaders, ResponsePayload, TunnelError};

use crate::state::AppState;

/// RFC 7230 hop-by-hop headers; stripped in both directions.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Lowercases header names, drops hop-by-hop headers, and folds repeated
/// headers into a list value for a `TunnelRequest` frame.
fn headers_to_wire(headers: &HeaderMap) -> HttpHeaders {
    let mut out: HttpHeaders = HttpHeaders::new();
    for name in headers.keys() {
        let key = name.as_str().to_ascii_lowercase();
        if is_hop_by_hop(&key) {
            continue;
        }
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect();
        if values.is_empty() {
            continue;
        }
        let entry = if values.len() == 1 {
            HeaderValue::Single(values.into_iter().next().unwrap())
        } else {
            HeaderValue::Multi(values)
        };
        out.insert(key, entry);
    }
    out
}

/// Rebuilds an `axum::http::HeaderMap` from the wire form, dropping
/// hop-by-hop headers again (defense in depth: a compromised or buggy
/// developer client could otherwise re-introduce one on the response path).
fn headers_from_wire(headers: &HttpHeaders) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (key, value) in headers {
        if is_hop_by_hop(key) {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(key.as_bytes()) else {
            continue;
        };
        for v in value.values() {
            if let Ok(hv) = AxumHeaderValue::from_str(v) {
                out.append(name.clone(), hv);
            }
        }
    }
    out
}

const BINARY_CONTENT_PREFIXES: &[&str] = &["image/", "video/", "audio/"];
const BINARY_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/pdf",
    "application/zip",
    "application/gzip",
];

fn content_type_is_binary(content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    BINARY_CONTENT_PREFIXES.iter().any(|p| ct.starts_with(p))
        || BINARY_CONTENT_TYPES.contains(&ct)
}

/// Samples up to 512 bytes; binary if more than 30% of them fall outside
/// printable ASCII / common whitespace.
fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(512)];
    if sample.is_empty() {
        return false;
    }
    let non_text = sample
        .iter()
        .filter(|&&b| b < 32 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();
    (non_text as f64) / (sample.len() as f64) > 0.3
}

fn should_use_base64(content_type: Option<&str>, body: &[u8]) -> bool {
    if let Some(ct) = content_type {
        if content_type_is_binary(ct) {
            return true;
        }
    }
    std::str::from_utf8(body).is_err() || looks_binary(body)
}

/// A small, literal JSON error body for a given failure, e.g.
/// `{"error":"Tunnel not connected","code":"DEVELOPER_NOT_CONNECTED"}`.
fn tunnel_error_response(err: &TunnelError) -> Response {
    let (status, message) = match err {
        TunnelError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "Session not found"),
        TunnelError::DeveloperNotConnected(_) => {
            (StatusCode::BAD_GATEWAY, "Tunnel not connected")
        }
        TunnelError::DeveloperDisconnected { .. } | TunnelError::DeveloperReplaced { .. } => {
            (StatusCode::BAD_GATEWAY, "Tunnel not connected")
        }
        TunnelError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "Request timed out"),
        TunnelError::ChannelBackpressure(_) => (StatusCode::SERVICE_UNAVAILABLE, "Server is busy"),
        TunnelError::Oversize { .. } => {
            (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
        }
        TunnelError::Cancelled(_) => (StatusCode::BAD_GATEWAY, "Request cancelled"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    };
    (
        status,
        Json(json!({ "error": message, "code": err.code() })),
    )
        .into_response()
}

/// Handles one inbound request already resolved to `session_id` by the
/// ingress router. `path` is the rewritten path+query.
pub async fn handle_tunnel_request(
    state: AppState,
    session_id: String,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let Some(session) = state.sessions.get_session(&session_id) else {
        return tunnel_error_response(&TunnelError::SessionNotFound(session_id));
    };

    let max_bytes = state.config.max_request_bytes;
    let body_bytes = match to_bytes(body, max_bytes + 1).await {
        Ok(b) if b.len() > max_bytes => {
            return tunnel_error_response(&TunnelError::Oversize {
                limit_bytes: max_bytes,
            });
        }
        Ok(b) => b,
        Err(err) => {
            error!(%err, "failed to read request body");
            return tunnel_error_response(&TunnelError::Internal(err.to_string()));
        }
    };

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let is_base64 = should_use_base64(content_type, &body_bytes);
    let body_field = if body_bytes.is_empty() {
        None
    } else if is_base64 {
        Some(BASE64.encode(&body_bytes))
    } else {
        Some(String::from_utf8_lossy(&body_bytes).into_owned())
    };

    let mut wire_headers = headers_to_wire(&headers);
    wire_headers.insert(
        "host".into(),
        HeaderValue::Single(format!("localhost:{}", session.target_port)),
    );

    let request_id = Uuid::new_v4().to_string();
    let frame = Frame::Request {
        id: request_id.clone(),
        session_id: session_id.clone(),
        method: method.as_str().to_string(),
        url: path,
        headers: wire_headers,
        body: body_field,
        is_base64,
    };

    let pending_future = match state
        .pending
        .add_pending_request(request_id.clone(), session_id.clone())
    {
        Ok(fut) => fut,
        Err(err) => return tunnel_error_response(&err),
    };

    if let Err(err) = state.connections.send_to_developer(&session_id, frame) {
        state.pending.cancel_request(&request_id);
        return tunnel_error_response(&err);
    }
    state.sessions.touch(&session_id);

    match pending_future.await {
        Ok(response) => build_http_response(response),
        Err(err) => {
            warn!(session_id, request_id, %err, "proxied request failed");
            tunnel_error_response(&err)
        }
    }
}

fn build_http_response(payload: ResponsePayload) -> Response {
    let status =
        StatusCode::from_u16(payload.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let header_map = headers_from_wire(&payload.headers);

    let body_bytes = match payload.body {
        Some(body) if payload.is_base64 => BASE64.decode(body.as_bytes()).unwrap_or_default(),
        Some(body) => body.into_bytes(),
        None => Vec::new(),
    };

    let mut response = Response::builder().status(status);
    *response.headers_mut().unwrap() = header_map;
    response.body(Body::from(body_bytes)).unwrap_or_else(|err| {
        error!(%err, "failed to build proxied response");
        tunnel_error_response(&TunnelError::Internal(err.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONNECTION,
            AxumHeaderValue::from_static("keep-alive"),
        );
        headers.insert(
            axum::http::header::HeaderName::from_static("transfer-encoding"),
            AxumHeaderValue::from_static("chunked"),
        );
        headers.insert(
            axum::http::header::ACCEPT,
            AxumHeaderValue::from_static("text/plain"),
        );
        let wire = headers_to_wire(&headers);
        assert!(!wire.contains_key("connection"));
        assert!(!wire.contains_key("transfer-encoding"));
        assert!(wire.contains_key("accept"));
    }

    #[test]
    fn repeated_headers_become_a_list() {
        let mut headers = HeaderMap::new();
        headers.append(
            axum::http::header::SET_COOKIE,
            AxumHeaderValue::from_static("a=1"),
        );
        headers.append(
            axum::http::header::SET_COOKIE,
            AxumHeaderValue::from_static("b=2"),
        );
        let wire = headers_to_wire(&headers);
        match wire.get("set-cookie").unwrap() {
            HeaderValue::Multi(values) => assert_eq!(values, &["a=1".to_string(), "b=2".to_string()]),
            HeaderValue::Single(_) => panic!("expected Multi"),
        }
    }

    #[test]
    fn png_content_type_is_treated_as_binary() {
        assert!(content_type_is_binary("image/png"));
        assert!(content_type_is_binary("application/octet-stream; charset=binary"));
        assert!(!content_type_is_binary("application/json"));
    }

    #[test]
    fn non_utf8_body_is_detected_as_binary() {
        let bytes = vec![0xFF, 0xFE, 0x00, 0x01, 0x02];
        assert!(should_use_base64(None, &bytes));
    }

    #[test]
    fn plain_text_body_is_not_binary() {
        let bytes = b"{\"message\":\"hi\"}".to_vec();
        assert!(!should_use_base64(Some("application/json"), &bytes));
    }

    #[test]
    fn looks_binary_tolerates_tabs_and_newlines() {
        let text = b"line one\r\nline two\ttabbed\n".to_vec();
        assert!(!looks_binary(&text));
    }
}
