//! # Pending-Request Table
//!
//! Correlates an inbound HTTP request id with a one-shot sink that the
//! developer's `response` frame (or a timeout, or a cancellation) completes
//! exactly once. Replaces the teacher's callback-free fire-and-
//! forget `ClientTx` relay with explicit result values.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tunnel_protocol::{ResponsePayload, TunnelError};

type OnTimeout = Arc<dyn Fn(&str, &TunnelError) + Send + Sync>;

struct PendingEntry {
    session_id: String,
    sink: oneshot::Sender<Result<ResponsePayload, TunnelError>>,
    timer: JoinHandle<()>,
}

/// A future that resolves to the developer's response, a timeout, or a
/// cancellation. Boxed so `add_pending_request` has a concrete return type.
pub type PendingFuture =
    Pin<Box<dyn Future<Output = Result<ResponsePayload, TunnelError>> + Send>>;

#[derive(Clone)]
pub struct PendingRequestTable {
    entries: Arc<DashMap<String, PendingEntry>>,
    request_timeout: Duration,
    on_timeout: Option<OnTimeout>,
}

impl PendingRequestTable {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            request_timeout,
            on_timeout: None,
        }
    }

    /// Installs a callback invoked once per timeout, before the future's
    /// rejection becomes observable to its awaiter.
    pub fn with_on_timeout(mut self, cb: OnTimeout) -> Self {
        self.on_timeout = Some(cb);
        self
    }

    /// Registers a fresh request id and starts its timeout timer. Returns a
    /// future the caller awaits for the eventual result.
    pub fn add_pending_request(
        &self,
        request_id: String,
        session_id: String,
    ) -> Result<PendingFuture, TunnelError> {
        if self.entries.contains_key(&request_id) {
            return Err(TunnelError::DuplicateRequestId(request_id));
        }

        let (tx, rx) = oneshot::channel();
        let timer = {
            let entries = self.entries.clone();
            let request_id = request_id.clone();
            let timeout_ms = self.request_timeout.as_millis() as u64;
            let on_timeout = self.on_timeout.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                if let Some((_, entry)) = entries.remove(&request_id) {
                    let err = TunnelError::Timeout {
                        id: request_id.clone(),
                        timeout_ms,
                    };
                    if let Some(cb) = &on_timeout {
                        cb(&request_id, &err);
                    }
                    let _ = entry.sink.send(Err(err));
                }
            })
        };

        self.entries.insert(
            request_id.clone(),
            PendingEntry {
                session_id,
                sink: tx,
                timer,
            },
        );

        Ok(Box::pin(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(TunnelError::Internal("pending sink dropped".into())),
            }
        }))
    }

    /// Delivers the developer's response. A response for an unknown or
    /// already-resolved id is dropped silently.
    pub fn resolve_request(&self, request_id: &str, response: ResponsePayload) {
        match self.entries.remove(request_id) {
            Some((_, entry)) => {
                entry.timer.abort();
                let _ = entry.sink.send(Ok(response));
            }
            None => debug!(request_id, "resolve for unknown or already-settled request"),
        }
    }

    pub fn reject_request(&self, request_id: &str, error: TunnelError) {
        if let Some((_, entry)) = self.entries.remove(request_id) {
            entry.timer.abort();
            let _ = entry.sink.send(Err(error));
        }
    }

    pub fn cancel_request(&self, request_id: &str) -> bool {
        if let Some((_, entry)) = self.entries.remove(request_id) {
            entry.timer.abort();
            let _ = entry
                .sink
                .send(Err(TunnelError::Cancelled(request_id.to_string())));
            true
        } else {
            false
        }
    }

    /// Bulk-cancels every request for a session with a caller-chosen error
    /// (`DeveloperDisconnected` or `DeveloperReplaced` depending on cause).
    pub fn cancel_requests_for_session_as(
        &self,
        session_id: &str,
        make_error: impl Fn(&str) -> TunnelError,
    ) -> usize {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &ids {
            if let Some((_, entry)) = self.entries.remove(id) {
                entry.timer.abort();
                let _ = entry.sink.send(Err(make_error(id)));
            }
        }
        ids.len()
    }

    pub fn cancel_requests_for_session(&self, session_id: &str) -> usize {
        self.cancel_requests_for_session_as(session_id, |id| TunnelError::DeveloperDisconnected {
            request_id: id.to_string(),
        })
    }

    pub fn get_pending_request_count(&self) -> usize {
        self.entries.len()
    }

    /// Rejects everything with `Cancelled`, used on server shutdown.
    pub fn cleanup(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.cancel_request(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_response() -> ResponsePayload {
        ResponsePayload {
            status_code: 200,
            headers: Default::default(),
            body: Some("hi".into()),
            body_length: 2,
            is_base64: false,
        }
    }

    #[tokio::test]
    async fn resolve_completes_the_future_exactly_once() {
        let table = PendingRequestTable::new(Duration::from_secs(5));
        let fut = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        table.resolve_request("r1", sample_response());
        let result = fut.await.unwrap();
        assert_eq!(result.status_code, 200);
        assert_eq!(table.get_pending_request_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_request_id_is_rejected() {
        let table = PendingRequestTable::new(Duration::from_secs(5));
        let _fut = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        let err = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap_err();
        assert!(matches!(err, TunnelError::DuplicateRequestId(_)));
    }

    #[tokio::test]
    async fn late_resolve_after_timeout_is_a_no_op() {
        let table = PendingRequestTable::new(Duration::from_millis(20));
        let fut = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        let result = fut.await.unwrap();
        assert!(matches!(result, Err(TunnelError::Timeout { .. })));
        // Entry is already gone; this must not panic and must have no effect.
        table.resolve_request("r1", sample_response());
        assert_eq!(table.get_pending_request_count(), 0);
    }

    #[tokio::test]
    async fn on_timeout_callback_fires_before_future_observes_rejection() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let table = PendingRequestTable::new(Duration::from_millis(10)).with_on_timeout(Arc::new(
            move |_id, _err| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        ));
        let fut = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        let _ = fut.await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_requests_for_session_bulk_cancels() {
        let table = PendingRequestTable::new(Duration::from_secs(5));
        let f1 = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        let f2 = table
            .add_pending_request("r2".into(), "s1".into())
            .unwrap();
        let _f3 = table
            .add_pending_request("r3".into(), "other-session".into())
            .unwrap();

        let count = table.cancel_requests_for_session("s1");
        assert_eq!(count, 2);
        assert!(matches!(f1.await, Err(TunnelError::DeveloperDisconnected { .. })));
        assert!(matches!(f2.await, Err(TunnelError::DeveloperDisconnected { .. })));
        assert_eq!(table.get_pending_request_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_rejects_everything_as_cancelled() {
        let table = PendingRequestTable::new(Duration::from_secs(5));
        let fut = table
            .add_pending_request("r1".into(), "s1".into())
            .unwrap();
        table.cleanup();
        assert!(matches!(fut.await, Err(TunnelError::Cancelled(_))));
    }
}
