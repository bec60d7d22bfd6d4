//! Latest detection results for display and policy evaluation

use crate::models::{Anomaly, MetricKey, Severity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;

/// Default number of records kept in the chronological history
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Whether a batch of records covers every tracked key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleScope {
    /// Replaces the current anomaly set
    Full,
    /// Only replaces entries for the keys present in the batch
    Partial,
}

/// Roll-up status of a service over its latest records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: ServiceStatus,
    pub metrics: BTreeMap<String, f64>,
    pub anomalies_detected: usize,
}

#[derive(Debug, Default)]
struct BoardState {
    latest: HashMap<MetricKey, Anomaly>,
    current: Vec<Anomaly>,
    history: VecDeque<Anomaly>,
}

/// Snapshot-consistent store of detection output
#[derive(Debug)]
pub struct PredictionBoard {
    state: RwLock<BoardState>,
    history_limit: usize,
}

impl PredictionBoard {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(BoardState::default()),
            history_limit: history_limit.max(1),
        }
    }

    /// Publish one detection batch
    pub async fn record(&self, records: &[Anomaly], scope: CycleScope) {
        let mut state = self.state.write().await;

        match scope {
            CycleScope::Full => state.current.clear(),
            CycleScope::Partial => {
                let keys: HashSet<MetricKey> = records.iter().map(Anomaly::key).collect();
                state.current.retain(|a| !keys.contains(&a.key()));
            }
        }

        for record in records {
            state.latest.insert(record.key(), record.clone());
            if record.is_anomaly {
                state.current.push(record.clone());
            }
            state.history.push_back(record.clone());
        }

        let overflow = state.history.len().saturating_sub(self.history_limit);
        state.history.drain(..overflow);
    }

    /// Anomalous records of the most recent cycle
    pub async fn current_anomalies(&self) -> Vec<Anomaly> {
        self.state.read().await.current.clone()
    }

    /// Latest record per key, ordered by key
    pub async fn predictions(&self) -> Vec<Anomaly> {
        let state = self.state.read().await;
        let mut records: Vec<Anomaly> = state.latest.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }

    pub async fn predictions_for(&self, service: &str) -> Vec<Anomaly> {
        self.predictions()
            .await
            .into_iter()
            .filter(|a| a.service == service)
            .collect()
    }

    /// Every recorded detection, most recent first
    pub async fn history(&self, limit: Option<usize>) -> Vec<Anomaly> {
        let state = self.state.read().await;
        let limit = limit.unwrap_or(usize::MAX);
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// Per-service roll-up over the latest records
    pub async fn service_health(&self) -> Vec<ServiceHealth> {
        let mut by_service: BTreeMap<String, Vec<Anomaly>> = BTreeMap::new();
        for record in self.predictions().await {
            by_service
                .entry(record.service.clone())
                .or_default()
                .push(record);
        }

        by_service
            .into_iter()
            .map(|(service, records)| {
                let anomalous: Vec<&Anomaly> = records.iter().filter(|a| a.is_anomaly).collect();
                let status = if anomalous.is_empty() {
                    ServiceStatus::Healthy
                } else if anomalous.iter().any(|a| a.severity == Severity::Critical) {
                    ServiceStatus::Critical
                } else if anomalous.iter().any(|a| a.severity == Severity::Warning) {
                    ServiceStatus::Degraded
                } else {
                    ServiceStatus::Warning
                };

                ServiceHealth {
                    service,
                    status,
                    anomalies_detected: anomalous.len(),
                    metrics: records
                        .iter()
                        .map(|a| (a.metric.clone(), a.current_value))
                        .collect(),
                }
            })
            .collect()
    }
}

impl Default for PredictionBoard {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}
