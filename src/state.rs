//! # Application State
//!
//! State shared by every HTTP worker: the loaded configuration, the session
//! manager (which holds the shared, read-only model) and connection gauges
//! for `/health`.
//!
//! ## Sharing Pattern:
//! Everything is behind an `Arc` and nothing here is mutated per frame.
//! The gauges are atomics updated by the WebSocket actor when a connection
//! starts and stops; sessions themselves never touch shared state.

use crate::config::AppConfig;
use crate::session::SessionManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionManager>,
    pub connections: Arc<ConnectionGauges>,
    /// When the server started
    pub start_time: Instant,
}

/// Live and cumulative WebSocket connection counts.
#[derive(Debug, Default)]
pub struct ConnectionGauges {
    active: AtomicU64,
    total: AtomicU64,
}

impl ConnectionGauges {
    pub fn connection_opened(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    /// Never goes below zero, even if called more often than `connection_opened`.
    pub fn connection_closed(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl AppState {
    pub fn new(config: AppConfig, sessions: SessionManager) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            connections: Arc::new(ConnectionGauges::default()),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauges() {
        let gauges = ConnectionGauges::default();
        gauges.connection_opened();
        gauges.connection_opened();
        gauges.connection_closed();

        assert_eq!(gauges.active(), 1);
        assert_eq!(gauges.total(), 2);
    }

    #[test]
    fn test_active_gauge_does_not_underflow() {
        let gauges = ConnectionGauges::default();
        gauges.connection_closed();
        assert_eq!(gauges.active(), 0);
    }
}
