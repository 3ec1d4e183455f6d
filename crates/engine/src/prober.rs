//! Background recovery prober.
//!
//! Each tick applies cool-down expiry to every circuit, then sends an active
//! probe to each half-open provider. Probe outcomes feed the health monitor
//! like any other sample, so enough successes close the circuit and a failure
//! re-opens it.

use futures::future::join_all;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchyard_common::ProviderId;

use crate::engine::{ProbeOutcome, RoutingEngine};

pub struct RecoveryProber {
    engine: RoutingEngine,
    interval: Duration,
}

impl RecoveryProber {
    pub fn new(engine: RoutingEngine, interval: Duration) -> Self {
        Self {
            engine,
            interval: interval.max(Duration::from_millis(100)),
        }
    }

    /// Run one probe round. Returns the providers that were probed.
    pub async fn tick(&self) -> Vec<(ProviderId, ProbeOutcome)> {
        for (id, transition) in self.engine.poll_circuits() {
            debug!(provider = %id, from = %transition.from, to = %transition.to, "Cool-down expired");
        }

        let targets = self.engine.half_open_providers();
        if targets.is_empty() {
            return Vec::new();
        }

        let probes = targets.into_iter().map(|id| async move {
            let outcome = self.engine.probe(&id).await;
            (id, outcome)
        });

        join_all(probes)
            .await
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Ok(outcome) => {
                    match &outcome {
                        ProbeOutcome::Healthy => info!(provider = %id, "Recovery probe succeeded"),
                        ProbeOutcome::Failed(e) => {
                            warn!(provider = %id, error = %e, "Recovery probe failed")
                        }
                        ProbeOutcome::Skipped => {}
                    }
                    Some((id, outcome))
                }
                Err(e) => {
                    debug!(provider = %id, error = %e, "Probe target disappeared");
                    None
                }
            })
            .collect()
    }

    /// Spawn the probe loop; it stops when `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = self.interval.as_millis() as u64, "Recovery prober started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            info!("Recovery prober stopped");
        })
    }
}

impl std::fmt::Debug for RecoveryProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryProber")
            .field("interval", &self.interval)
            .finish()
    }
}
