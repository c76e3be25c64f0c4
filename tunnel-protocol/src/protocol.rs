//! Control-channel frame taxonomy.
//!
//! One JSON object per frame, tagged by `type`. Field names are camelCase
//! to match the wire format a browser-side peer expects.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which side of a session a control channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlRole {
    Developer,
    Pm,
}

/// Alias kept for readability at call sites that only ever deal with the
/// browser-side peer ("PM" per the protocol's naming for that role).
pub type PmRole = ControlRole;

pub const SIGNALING_ROLES: [ControlRole; 2] = [ControlRole::Developer, ControlRole::Pm];

/// A single HTTP header value: either one string or a list (repeated headers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderValue::Single(s) => vec![s.as_str()],
            HeaderValue::Multi(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Lowercased header map, string-or-list values, as carried on a `request` frame.
pub type HttpHeaders = HashMap<String, HeaderValue>;

/// The body of a `response` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status_code: u16,
    pub headers: HttpHeaders,
    pub body: Option<String>,
    pub body_length: usize,
    pub is_base64: bool,
}

/// All control-channel and signaling frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Sent by the server immediately after the socket is accepted.
    Connected { timestamp: i64 },

    /// Sent by a peer to join a session's control channel.
    Register {
        role: ControlRole,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        developer_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_info: Option<serde_json::Value>,
    },

    /// Server's acknowledgement of a successful registration.
    Registered {
        session_id: String,
        role: ControlRole,
    },

    /// Server error, e.g. session not found. Closes the channel.
    Error { error: String },

    /// Server → developer: an inbound public HTTP request to forward.
    Request {
        id: String,
        session_id: String,
        method: String,
        url: String,
        headers: HttpHeaders,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        is_base64: bool,
    },

    /// Developer → server: the result of forwarding a `Request` frame.
    Response {
        request_id: String,
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponsePayload>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Heartbeat, server → peer.
    Ping { timestamp: i64 },
    /// Heartbeat reply, peer → server.
    Pong { timestamp: i64 },

    /// Best-effort advisory: the public client that originated `request_id`
    /// disconnected before a response arrived.
    RequestCancel { request_id: String },

    /// A public WebSocket upgrade request arrived; developer should dial
    /// a local WebSocket connection and relay frames under `connection_id`.
    WebsocketConnect {
        connection_id: String,
        session_id: String,
        url: String,
    },

    /// A relayed WebSocket data frame, either direction.
    WebsocketMessage {
        connection_id: String,
        data: String,
        is_base64: bool,
    },

    /// Either side of a relayed WebSocket connection closed.
    WebsocketClose { connection_id: String },

    /// Server → both sides: invites P2P negotiation once both a developer
    /// and a PM channel exist for the session.
    #[serde(rename = "p2p:initiate")]
    P2pInitiate {
        session_id: String,
        role: ControlRole,
    },

    #[serde(rename = "p2p:offer")]
    P2pOffer {
        session_id: String,
        from: ControlRole,
        data: serde_json::Value,
    },

    #[serde(rename = "p2p:answer")]
    P2pAnswer {
        session_id: String,
        from: ControlRole,
        data: serde_json::Value,
    },

    #[serde(rename = "p2p:ice-candidate")]
    P2pIceCandidate {
        session_id: String,
        from: ControlRole,
        data: serde_json::Value,
    },

    #[serde(rename = "p2p:ready")]
    P2pReady {
        session_id: String,
        from: ControlRole,
    },

    #[serde(rename = "p2p:failed")]
    P2pFailed {
        session_id: String,
        from: ControlRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Frame {
    /// Returns the other side's role, for relaying a signaling frame.
    pub fn opposite_role(role: ControlRole) -> ControlRole {
        match role {
            ControlRole::Developer => ControlRole::Pm,
            ControlRole::Pm => ControlRole::Developer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_round_trips_through_json() {
        let frame = Frame::Register {
            role: ControlRole::Developer,
            session_id: "brave-otter".into(),
            target_port: Some(3000),
            developer_id: Some("dev-1".into()),
            client_info: None,
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"register\""));
        assert!(text.contains("\"targetPort\":3000"));
        let back: Frame = serde_json::from_str(&text).unwrap();
        match back {
            Frame::Register { session_id, .. } => assert_eq!(session_id, "brave-otter"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn p2p_variants_use_colon_type_tags() {
        let frame = Frame::P2pOffer {
            session_id: "s".into(),
            from: ControlRole::Pm,
            data: serde_json::json!({"sdp": "X"}),
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"type\":\"p2p:offer\""));
        assert!(text.contains("\"from\":\"pm\""));
    }

    #[test]
    fn header_value_accepts_single_or_list() {
        let single: HeaderValue = serde_json::from_str("\"text/plain\"").unwrap();
        assert_eq!(single.values(), vec!["text/plain"]);
        let multi: HeaderValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(multi.values(), vec!["a", "b"]);
    }
}
