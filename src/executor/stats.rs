//! Request and connection counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters updated by the executor and monitor.
///
/// All counters only grow until [`OperationStats::reset`] is called.
#[derive(Debug, Default)]
pub struct OperationStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    retry_attempts: AtomicU64,
    connection_attempts: AtomicU64,
    reconnect_attempts: AtomicU64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time copy of [`OperationStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub connection_attempts: u64,
    pub reconnect_attempts: u64,
    pub last_error: Option<String>,
}

impl OperationStats {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_success(&self) {
        self.successful_requests.fetch_add(1, Ordering::SeqCst);
    }

    /// A failed attempt that the retry loop saw
    pub fn record_attempt_failure(&self, error: &impl ToString) {
        self.failed_requests.fetch_add(1, Ordering::SeqCst);
        self.retry_attempts.fetch_add(1, Ordering::SeqCst);
        self.set_last_error(error.to_string());
    }

    /// A failed single-shot call (retries disabled)
    pub fn record_failure(&self, error: &impl ToString) {
        self.failed_requests.fetch_add(1, Ordering::SeqCst);
        self.set_last_error(error.to_string());
    }

    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
    }

    fn set_last_error(&self, error: String) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(error);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_requests: self.total_requests.load(Ordering::SeqCst),
            successful_requests: self.successful_requests.load(Ordering::SeqCst),
            failed_requests: self.failed_requests.load(Ordering::SeqCst),
            retry_attempts: self.retry_attempts.load(Ordering::SeqCst),
            connection_attempts: self.connection_attempts.load(Ordering::SeqCst),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
        }
    }

    /// Zero every counter and forget the last error
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successful_requests,
            &self.failed_requests,
            &self.retry_attempts,
            &self.connection_attempts,
            &self.reconnect_attempts,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        if let Ok(mut last) = self.last_error.lock() {
            *last = None;
        }
    }
}
