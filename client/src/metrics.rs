//! # Client Metrics
//!
//! In-memory counters tracking the developer client's forwarding activity.
//! Plain atomics, no external metrics crate: the teacher doesn't carry one either, and a
//! single-process CLI has no scrape target to export to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct Metrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_latency_ms: AtomicU64,
    reconnect_count: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub reconnect_count: u64,
    pub last_error: Option<String>,
}

impl Metrics {
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(message.into());
    }

    pub fn record_reconnect(&self) {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: total,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            average_latency_ms: if total == 0 {
                0.0
            } else {
                total_latency as f64 / total as f64
            },
            reconnect_count: self.reconnect_count.load(Ordering::Relaxed),
            last_error: self.last_error.lock().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_latency_is_zero_with_no_requests() {
        let metrics = Metrics::default();
        assert_eq!(metrics.snapshot().average_latency_ms, 0.0);
    }

    #[test]
    fn average_latency_divides_total_by_count() {
        let metrics = Metrics::default();
        metrics.record_request(true, 100);
        metrics.record_request(true, 300);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.average_latency_ms, 200.0);
    }

    #[test]
    fn last_error_reflects_most_recent_failure() {
        let metrics = Metrics::default();
        metrics.record_error("connection refused");
        metrics.record_error("timeout");
        assert_eq!(metrics.snapshot().last_error, Some("timeout".to_string()));
    }
}
