//! In-flight request tracking for graceful shutdown.
//!
//! Every routed request holds an [`InFlight`] guard. On shutdown the CLI stops
//! accepting input and waits for the count to reach zero, up to the drain
//! timeout.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct State {
    active: AtomicUsize,
    shutdown: AtomicBool,
}

/// Tracks in-flight requests and the shutdown flag.
#[derive(Debug, Clone)]
pub struct DrainCoordinator {
    state: Arc<State>,
    max_drain_time: Duration,
}

/// Marks one request as in flight until dropped.
#[derive(Debug)]
pub struct InFlight {
    state: Arc<State>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let count = self.state.active.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(active_requests = count, "Request completed");
    }
}

impl DrainCoordinator {
    pub fn new(max_drain_time: Duration) -> Self {
        debug!(
            max_drain_time_secs = max_drain_time.as_secs(),
            "Creating drain coordinator"
        );
        Self {
            state: Arc::new(State::default()),
            max_drain_time,
        }
    }

    /// Register a request. Returns `None` once shutdown has begun.
    pub fn begin(&self) -> Option<InFlight> {
        if self.is_shutdown_requested() {
            return None;
        }
        let count = self.state.active.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(active_requests = count, "Request started");
        Some(InFlight {
            state: Arc::clone(&self.state),
        })
    }

    pub fn active_count(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        info!(
            active_requests = self.active_count(),
            "Shutdown requested"
        );
        self.state.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.state.shutdown.load(Ordering::SeqCst)
    }

    /// Wait for in-flight requests to finish.
    ///
    /// Returns `false` if the drain timeout passed with requests still active.
    pub async fn wait_for_drain(&self) -> bool {
        let start = Instant::now();
        let initial = self.active_count();
        info!(
            active_requests = initial,
            max_drain_time_secs = self.max_drain_time.as_secs(),
            "Starting request drain"
        );

        let mut last_logged = initial;
        loop {
            let current = self.active_count();
            if current == 0 {
                break;
            }
            if start.elapsed() > self.max_drain_time {
                warn!(
                    remaining_requests = current,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Drain timeout reached, requests still active"
                );
                return false;
            }
            if current != last_logged {
                debug!(
                    remaining_requests = current,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Draining requests"
                );
                last_logged = current;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            initial_requests = initial,
            "All requests drained"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guards_track_active_requests() {
        let coordinator = DrainCoordinator::new(Duration::from_secs(1));

        let a = coordinator.begin().unwrap();
        let b = coordinator.begin().unwrap();
        assert_eq!(coordinator.active_count(), 2);

        drop(a);
        assert_eq!(coordinator.active_count(), 1);
        drop(b);
        assert_eq!(coordinator.active_count(), 0);

        assert!(coordinator.wait_for_drain().await);
    }

    #[tokio::test]
    async fn test_no_new_requests_after_shutdown() {
        let coordinator = DrainCoordinator::new(Duration::from_secs(1));
        assert!(!coordinator.is_shutdown_requested());

        coordinator.request_shutdown();
        assert!(coordinator.is_shutdown_requested());
        assert!(coordinator.begin().is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_release() {
        let coordinator = DrainCoordinator::new(Duration::from_secs(5));
        let guard = coordinator.begin().unwrap();

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            drop(guard);
        });

        assert!(coordinator.wait_for_drain().await);
        release.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_timeout() {
        let coordinator = DrainCoordinator::new(Duration::from_millis(100));
        let _guard = coordinator.begin().unwrap();
        assert!(!coordinator.wait_for_drain().await);
    }
}
