//! # Request Forwarder
//!
//! Replays one `Frame::Request` against the developer's local HTTP server
//! and turns the result back into a `Frame::Response`. The
//! server already decided text-vs-binary encoding on the way in; this
//! module makes the same decision on the way back out, using the same
//! content-type/byte-sampling heuristic, so a round trip through a tunnel
//! is symmetric on both legs.

use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use tracing::warn;
use tunnel_protocol::{Frame, HeaderValue, HttpHeaders, ResponsePayload};

use crate::metrics::Metrics;

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

fn headers_to_reqwest(headers: &HttpHeaders) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let Ok(name) = reqwest::header::HeaderName::from_bytes(key.as_bytes()) else {
            continue;
        };
        for v in value.values() {
            if let Ok(hv) = reqwest::header::HeaderValue::from_str(v) {
                out.append(name.clone(), hv);
            }
        }
    }
    out
}

fn headers_from_reqwest(headers: &reqwest::header::HeaderMap) -> HttpHeaders {
    let mut out = HttpHeaders::new();
    for name in headers.keys() {
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
        out.insert(name.as_str().to_string(), entry);
    }
    out
}

/// Forwards one `Frame::Request` to `http://localhost:<target_port><url>`
/// and returns the matching `Frame::Response`. Local connection failures
/// become a `response` frame carrying a 502, not a dropped frame — the
/// server's pending-request table is waiting on exactly one reply.
pub async fn forward_request(
    client: &Client,
    target_port: u16,
    frame: Frame,
    metrics: &Metrics,
) -> Frame {
    let Frame::Request {
        id,
        session_id,
        method,
        url,
        headers,
        body,
        is_base64,
    } = frame
    else {
        panic!("forward_request called with a non-Request frame");
    };

    let started = Instant::now();
    let target_url = format!("http://localhost:{target_port}{url}");

    let method = match reqwest::Method::from_bytes(method.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            return error_response(id, session_id, "invalid HTTP method".into());
        }
    };

    let body_bytes = match body {
        Some(b) if is_base64 => match BASE64.decode(b.as_bytes()) {
            Ok(decoded) => decoded,
            Err(_) => return error_response(id, session_id, "invalid base64 body".into()),
        },
        Some(b) => b.into_bytes(),
        None => Vec::new(),
    };

    let mut request = client
        .request(method, &target_url)
        .headers(headers_to_reqwest(&headers));
    if !body_bytes.is_empty() {
        request = request.body(body_bytes);
    }

    match request.send().await {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let response_headers = headers_from_reqwest(response.headers());
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = response.bytes().await.unwrap_or_default();
            let use_base64 = should_use_base64(content_type.as_deref(), &bytes);
            let body_length = bytes.len();
            let body_field = if bytes.is_empty() {
                None
            } else if use_base64 {
                Some(BASE64.encode(&bytes))
            } else {
                Some(String::from_utf8_lossy(&bytes).into_owned())
            };

            metrics.record_request(true, started.elapsed().as_millis() as u64);
            Frame::Response {
                request_id: id,
                session_id,
                response: Some(ResponsePayload {
                    status_code,
                    headers: response_headers,
                    body: body_field,
                    body_length,
                    is_base64: use_base64,
                }),
                error: None,
            }
        }
        Err(err) => {
            warn!(%err, target_url, "local forward failed");
            metrics.record_request(false, started.elapsed().as_millis() as u64);
            metrics.record_error(err.to_string());
            Frame::Response {
                request_id: id,
                session_id,
                response: Some(ResponsePayload {
                    status_code: 502,
                    headers: HttpHeaders::new(),
                    body: Some(format!("Bad Gateway: {err}")),
                    body_length: 0,
                    is_base64: false,
                }),
                error: Some(err.to_string()),
            }
        }
    }
}

fn error_response(request_id: String, session_id: String, message: String) -> Frame {
    Frame::Response {
        request_id,
        session_id,
        response: Some(ResponsePayload {
            status_code: 502,
            headers: HttpHeaders::new(),
            body: Some(message.clone()),
            body_length: 0,
            is_base64: false,
        }),
        error: Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_content_type_forces_base64() {
        assert!(content_type_is_binary("image/png"));
        assert!(!content_type_is_binary("text/html; charset=utf-8"));
    }

    #[test]
    fn non_utf8_body_is_detected_as_binary() {
        let bytes = vec![0xFF, 0xFE, 0x00, 0x01];
        assert!(should_use_base64(None, &bytes));
    }
}
