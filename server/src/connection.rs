//! # Connection Registry
//!
//! Maps a session to its live developer control channel and zero-or-more PM
//! (browser-peer) channels. Generalizes the teacher's
//! `AppState.agents` / `AppState.connections` maps from a flat `ClientTx`
//! lookup to role-aware, bounded-queue channels with FIFO delivery and
//! explicit backpressure.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};
use tunnel_protocol::{ControlRole, Frame, TunnelError};

use crate::pending::PendingRequestTable;

/// Outbound frames queued per channel before a full queue starts dropping
/// writes with `ChannelBackpressure`.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// How long the registry waits after a new registration before checking
/// whether the counterpart is already present, so the newly-arrived side can
/// finish any post-registration bookkeeping first.
#[derive(Debug, Clone, Copy)]
pub struct P2pSettleWindow(pub Duration);

impl Default for P2pSettleWindow {
    fn default() -> Self {
        // ~1s in production; tests construct `P2pSettleWindow(Duration::from_millis(50))`.
        P2pSettleWindow(Duration::from_secs(1))
    }
}

/// A handle to one peer's outbound frame queue.
#[derive(Clone)]
pub struct ChannelHandle {
    pub role: ControlRole,
    tx: mpsc::Sender<Frame>,
}

impl ChannelHandle {
    pub fn new(role: ControlRole) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (Self { role, tx }, rx)
    }

    /// Enqueues a frame for the channel's writer task. Never blocks: a full
    /// queue surfaces as `ChannelBackpressure` so the caller can fail the
    /// originating HTTP request with 503 instead of stalling.
    pub fn send(&self, frame: Frame) -> Result<(), TunnelError> {
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                TunnelError::ChannelBackpressure("outbound queue full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                TunnelError::DeveloperNotConnected("channel closed".into())
            }
        })
    }
}

/// Connection bookkeeping for one session: at most one developer channel,
/// zero-or-more PM channels (DESIGN.md records the decision to support a set
/// rather than a single slot).
#[derive(Default)]
struct SessionConnections {
    developer: Option<ChannelHandle>,
    pms: Vec<ChannelHandle>,
}

/// Live control channels, keyed by session id.
#[derive(Clone)]
pub struct ConnectionRegistry {
    sessions: Arc<DashMap<String, SessionConnections>>,
    settle_window: P2pSettleWindow,
}

impl ConnectionRegistry {
    pub fn new(settle_window: P2pSettleWindow) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            settle_window,
        }
    }

    /// Installs the developer channel for a session, replacing and closing
    /// any previous one. Pending requests held under the previous channel are
    /// rejected with `DeveloperReplaced` through `pending`.
    pub fn register_developer(
        &self,
        session_id: &str,
        channel: ChannelHandle,
        pending: &PendingRequestTable,
    ) {
        let previous = {
            let mut entry = self.sessions.entry(session_id.to_string()).or_default();
            entry.developer.replace(channel)
        };
        if previous.is_some() {
            info!(session_id, "developer connection replaced");
            pending.cancel_requests_for_session_as(session_id, |id| {
                TunnelError::DeveloperReplaced {
                    request_id: id.to_string(),
                }
            });
        }
        self.maybe_initiate_p2p(session_id.to_string());
    }

    /// Drops the developer mapping and cancels every pending request for the
    /// session with `DeveloperDisconnected`.
    pub fn unregister_developer(&self, session_id: &str, pending: &PendingRequestTable) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.developer = None;
        }
        pending.cancel_requests_for_session_as(session_id, |id| {
            TunnelError::DeveloperDisconnected {
                request_id: id.to_string(),
            }
        });
    }

    pub fn register_pm(&self, session_id: &str, channel: ChannelHandle) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .pms
            .push(channel);
        self.maybe_initiate_p2p(session_id.to_string());
    }

    /// Removes a specific PM handle by identity (the `mpsc::Sender`'s
    /// `same_channel`), used on disconnect.
    pub fn unregister_pm(&self, session_id: &str, channel: &ChannelHandle) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.pms.retain(|pm| !pm.tx.same_channel(&channel.tx));
        }
    }

    pub fn is_p2p_available(&self, session_id: &str) -> bool {
        self.sessions
            .get(session_id)
            .map(|entry| entry.developer.is_some() && !entry.pms.is_empty())
            .unwrap_or(false)
    }

    /// Schedules `p2p:initiate` to both sides after the settle window, if
    /// both a developer and at least one PM are present by then.
    fn maybe_initiate_p2p(&self, session_id: String) {
        if !self.is_p2p_available(&session_id) {
            return;
        }
        let registry = self.clone();
        let delay = self.settle_window.0;
        tokio::spawn(async move {
            sleep(delay).await;
            if !registry.is_p2p_available(&session_id) {
                return;
            }
            let _ = registry.send_to_developer(
                &session_id,
                Frame::P2pInitiate {
                    session_id: session_id.clone(),
                    role: ControlRole::Developer,
                },
            );
            registry.send_to_all_pms(
                &session_id,
                Frame::P2pInitiate {
                    session_id: session_id.clone(),
                    role: ControlRole::Pm,
                },
            );
        });
    }

    pub fn send_to_developer(&self, session_id: &str, frame: Frame) -> Result<(), TunnelError> {
        let entry = self
            .sessions
            .get(session_id)
            .ok_or_else(|| TunnelError::DeveloperNotConnected(session_id.to_string()))?;
        let channel = entry
            .developer
            .as_ref()
            .ok_or_else(|| TunnelError::DeveloperNotConnected(session_id.to_string()))?;
        channel.send(frame)
    }

    pub fn send_to_all_pms(&self, session_id: &str, frame: Frame) {
        if let Some(entry) = self.sessions.get(session_id) {
            for pm in &entry.pms {
                if let Err(err) = pm.send(frame.clone()) {
                    warn!(session_id, %err, "failed to relay frame to PM");
                }
            }
        }
    }

    /// Informs the other side that P2P negotiation failed mid-handshake
    /// because its counterpart disconnected.
    pub fn notify_peer_disconnected(&self, session_id: &str, disconnected: ControlRole) {
        let frame = Frame::P2pFailed {
            session_id: session_id.to_string(),
            from: Frame::opposite_role(disconnected),
            reason: Some("peer-disconnected".into()),
        };
        match disconnected {
            ControlRole::Developer => self.send_to_all_pms(session_id, frame),
            ControlRole::Pm => {
                let _ = self.send_to_developer(session_id, frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingRequestTable;
    use std::time::Duration as StdDuration;

    fn table() -> PendingRequestTable {
        PendingRequestTable::new(StdDuration::from_millis(200))
    }

    #[tokio::test]
    async fn p2p_available_only_once_both_sides_present() {
        let registry = ConnectionRegistry::new(P2pSettleWindow(StdDuration::from_millis(10)));
        let pending = table();
        let (dev_handle, _dev_rx) = ChannelHandle::new(ControlRole::Developer);
        registry.register_developer("s1", dev_handle, &pending);
        assert!(!registry.is_p2p_available("s1"));

        let (pm_handle, _pm_rx) = ChannelHandle::new(ControlRole::Pm);
        registry.register_pm("s1", pm_handle);
        assert!(registry.is_p2p_available("s1"));
    }

    #[tokio::test]
    async fn p2p_initiate_is_sent_to_both_sides_after_settle_window() {
        let registry = ConnectionRegistry::new(P2pSettleWindow(StdDuration::from_millis(20)));
        let pending = table();
        let (dev_handle, mut dev_rx) = ChannelHandle::new(ControlRole::Developer);
        let (pm_handle, mut pm_rx) = ChannelHandle::new(ControlRole::Pm);
        registry.register_developer("s1", dev_handle, &pending);
        registry.register_pm("s1", pm_handle);

        let dev_frame = tokio::time::timeout(StdDuration::from_millis(200), dev_rx.recv())
            .await
            .expect("dev frame arrived")
            .expect("channel open");
        assert!(matches!(dev_frame, Frame::P2pInitiate { role: ControlRole::Developer, .. }));

        let pm_frame = tokio::time::timeout(StdDuration::from_millis(200), pm_rx.recv())
            .await
            .expect("pm frame arrived")
            .expect("channel open");
        assert!(matches!(pm_frame, Frame::P2pInitiate { role: ControlRole::Pm, .. }));
    }

    #[tokio::test]
    async fn replacing_developer_cancels_pending_requests_with_developer_replaced() {
        let registry = ConnectionRegistry::new(P2pSettleWindow(StdDuration::from_secs(10)));
        let pending = table();
        let (handle_a, _rx_a) = ChannelHandle::new(ControlRole::Developer);
        registry.register_developer("s1", handle_a, &pending);

        let fut = pending
            .add_pending_request("req-1".into(), "s1".into())
            .unwrap();

        let (handle_b, _rx_b) = ChannelHandle::new(ControlRole::Developer);
        registry.register_developer("s1", handle_b, &pending);

        let result = fut.await.unwrap();
        assert!(matches!(result, Err(TunnelError::DeveloperReplaced { .. })));
    }

    #[tokio::test]
    async fn full_queue_yields_channel_backpressure() {
        let registry = ConnectionRegistry::new(P2pSettleWindow(StdDuration::from_secs(10)));
        let pending = table();
        let (handle, mut rx) = ChannelHandle::new(ControlRole::Developer);
        registry.register_developer("s1", handle, &pending);

        let mut last = Ok(());
        for i in 0..(OUTBOUND_QUEUE_CAPACITY + 5) {
            last = registry.send_to_developer(
                "s1",
                Frame::Ping {
                    timestamp: i as i64,
                },
            );
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(TunnelError::ChannelBackpressure(_))));
        // Drain one slot so the receiver side isn't dropped before assertions run.
        let _ = rx.try_recv();
    }
}
