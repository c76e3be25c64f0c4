//! # Tunnel Protocol
//!
//! Wire types shared by the tunnel server and the developer-side tunnel
//! client: the control-channel frame taxonomy, the error kinds exchanged
//! between the two, and the session id format.
//!
//! Frames are JSON text, one object per message (`#[serde(tag = "type")]`),
//! with compression disabled on both ends to keep framing simple across
//! intermediaries.

mod error;
mod id;
mod protocol;

pub use error::TunnelError;
pub use id::{generate_session_id, is_valid_session_id};
pub use protocol::{
    ControlRole, Frame, HeaderValue, HttpHeaders, PmRole, ResponsePayload, SIGNALING_ROLES,
};
