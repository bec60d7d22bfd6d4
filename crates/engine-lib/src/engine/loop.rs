//! Periodic detection and evaluation loop

use super::Engine;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Drives [`Engine::tick`] every check interval until shutdown.
///
/// Cycles never overlap: a slow cycle delays the next tick instead of
/// queueing a burst of catch-up ticks.
pub struct EvaluationLoop {
    engine: Arc<Engine>,
}

impl EvaluationLoop {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.engine.config().check_interval;
        info!(
            interval_secs = period.as_secs(),
            keys = self.engine.targets().len(),
            policies = self.engine.policies().len(),
            "Starting evaluation loop"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.engine.health().set_ready(true).await;

        let mut cycles = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.engine.tick(Utc::now()).await;
                    cycles += 1;

                    debug!(
                        cycle = cycles,
                        records = report.detection.records.len(),
                        anomalies = report.detection.anomalies,
                        unavailable = report.detection.unavailable.len(),
                        matches = report.evaluation.matches.len(),
                        dispatched = report.evaluation.dispatched(),
                        elapsed_ms = start.elapsed().as_millis(),
                        "Cycle complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!(cycles = cycles, "Shutting down evaluation loop");
                    break;
                }
            }
        }
    }
}
