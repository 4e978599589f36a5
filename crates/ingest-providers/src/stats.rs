use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-client request counters (§4.3), exposed as a point-in-time snapshot.
#[derive(Debug, Default)]
pub struct ClientStats {
    attempts: AtomicU64,
    successes: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    timeouts: AtomicU64,
}

/// Serializable snapshot of [`ClientStats`] at a point in time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClientStatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub timeouts: u64,
}

impl ClientStats {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_error(&self) {
        self.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_server_error(&self) {
        self.server_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}
