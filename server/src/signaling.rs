//! # P2P Signaling Relay
//!
//! Opaque forwarding of offer/answer/ICE-candidate/ready/failed frames
//! between the developer and PM channels of one session. The
//! server never interprets `data`; it only rewrites `from` to the sender's
//! role and picks the other side's channel.

use tracing::debug;
use tunnel_protocol::{ControlRole, Frame};

use crate::connection::ConnectionRegistry;

/// Relays a signaling frame to the opposite role, rewriting `from` on the
/// way. Returns the sender's role the frame claimed, or `None` if `frame` is
/// not a signaling frame at all.
pub fn relay_signaling_frame(
    connections: &ConnectionRegistry,
    session_id: &str,
    sender_role: ControlRole,
    frame: Frame,
) -> Option<()> {
    let outgoing = match frame {
        Frame::P2pOffer { session_id, data, .. } => Frame::P2pOffer {
            session_id,
            from: sender_role,
            data,
        },
        Frame::P2pAnswer { session_id, data, .. } => Frame::P2pAnswer {
            session_id,
            from: sender_role,
            data,
        },
        Frame::P2pIceCandidate { session_id, data, .. } => Frame::P2pIceCandidate {
            session_id,
            from: sender_role,
            data,
        },
        Frame::P2pReady { session_id, .. } => Frame::P2pReady {
            session_id,
            from: sender_role,
        },
        Frame::P2pFailed { session_id, reason, .. } => Frame::P2pFailed {
            session_id,
            from: sender_role,
            reason,
        },
        _ => return None,
    };

    debug!(session_id, ?sender_role, "relaying signaling frame");
    match sender_role {
        ControlRole::Developer => connections.send_to_all_pms(session_id, outgoing),
        ControlRole::Pm => {
            let _ = connections.send_to_developer(session_id, outgoing);
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelHandle, P2pSettleWindow};
    use crate::pending::PendingRequestTable;
    use std::time::Duration;

    #[tokio::test]
    async fn offer_from_pm_is_relayed_to_developer_with_from_rewritten() {
        let connections = ConnectionRegistry::new(P2pSettleWindow(Duration::from_secs(10)));
        let pending = PendingRequestTable::new(Duration::from_secs(5));
        let (dev_handle, mut dev_rx) = ChannelHandle::new(ControlRole::Developer);
        connections.register_developer("s1", dev_handle, &pending);

        let offer = Frame::P2pOffer {
            session_id: "s1".into(),
            from: ControlRole::Pm,
            data: serde_json::json!({"sdp": "X"}),
        };
        relay_signaling_frame(&connections, "s1", ControlRole::Pm, offer).unwrap();

        let received = dev_rx.recv().await.unwrap();
        match received {
            Frame::P2pOffer { from, data, .. } => {
                assert_eq!(from, ControlRole::Pm);
                assert_eq!(data, serde_json::json!({"sdp": "X"}));
            }
            _ => panic!("wrong frame"),
        }
    }

    #[tokio::test]
    async fn answer_from_developer_is_relayed_to_all_pms() {
        let connections = ConnectionRegistry::new(P2pSettleWindow(Duration::from_secs(10)));
        let (pm_handle, mut pm_rx) = ChannelHandle::new(ControlRole::Pm);
        connections.register_pm("s1", pm_handle);

        let answer = Frame::P2pAnswer {
            session_id: "s1".into(),
            from: ControlRole::Developer,
            data: serde_json::json!({"sdp": "Y"}),
        };
        relay_signaling_frame(&connections, "s1", ControlRole::Developer, answer).unwrap();

        let received = pm_rx.recv().await.unwrap();
        assert!(matches!(received, Frame::P2pAnswer { from: ControlRole::Developer, .. }));
    }

    #[test]
    fn non_signaling_frame_is_not_relayed() {
        let connections = ConnectionRegistry::new(P2pSettleWindow(Duration::from_secs(10)));
        let result = relay_signaling_frame(
            &connections,
            "s1",
            ControlRole::Developer,
            Frame::Ping { timestamp: 0 },
        );
        assert!(result.is_none());
    }
}
