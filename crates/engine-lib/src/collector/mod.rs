//! Metric value collection from the metrics backend
//!
//! This module provides the gateway contract the engine pulls values
//! through, the registry of tracked (service, metric) targets, and the
//! Prometheus and in-memory gateway implementations.

mod memory;
mod promql;

pub use memory::InMemoryGateway;
pub use promql::PrometheusGateway;

use crate::error::GatewayError;
use crate::models::MetricKey;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

/// Services monitored by the default target set
pub const DEFAULT_SERVICES: &[&str] = &["orders", "users", "payments"];

/// A tracked (service, metric) key and the backend query producing its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTarget {
    pub service: String,
    pub metric: String,
    pub query: String,
}

impl MetricTarget {
    pub fn new(
        service: impl Into<String>,
        metric: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            metric: metric.into(),
            query: query.into(),
        }
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.service.clone(), self.metric.clone())
    }
}

/// Latency, error rate and CPU targets for one service
pub fn service_targets(service: &str) -> Vec<MetricTarget> {
    vec![
        MetricTarget::new(
            service,
            "latency",
            format!("{}_latency_seconds{{quantile=\"0.99\"}}", service),
        ),
        MetricTarget::new(
            service,
            "error_rate",
            format!("rate({}_errors_total[1m])", service),
        ),
        MetricTarget::new(
            service,
            "cpu_usage",
            format!("{}_cpu_usage_percent", service),
        ),
    ]
}

/// Default target set covering [`DEFAULT_SERVICES`]
pub fn default_targets() -> Vec<MetricTarget> {
    DEFAULT_SERVICES
        .iter()
        .flat_map(|service| service_targets(service))
        .collect()
}

/// Contract for pulling the current value of a tracked target
#[async_trait]
pub trait MetricsGateway: Send + Sync {
    /// Current value, or [`GatewayError::Unavailable`] when the backend has none
    async fn fetch(&self, target: &MetricTarget) -> Result<f64, GatewayError>;
}

/// Registry of tracked targets
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: DashMap<MetricKey, MetricTarget>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_targets(targets: impl IntoIterator<Item = MetricTarget>) -> Self {
        let registry = Self::new();
        for target in targets {
            registry.register(target);
        }
        registry
    }

    /// Track a target, replacing any target with the same key
    pub fn register(&self, target: MetricTarget) {
        tracing::debug!(key = %target.key(), query = %target.query, "Tracking metric target");
        self.targets.insert(target.key(), target);
    }

    pub fn unregister(&self, key: &MetricKey) -> Option<MetricTarget> {
        self.targets.remove(key).map(|(_, v)| v)
    }

    pub fn get(&self, key: &MetricKey) -> Option<MetricTarget> {
        self.targets.get(key).map(|r| r.clone())
    }

    /// All targets ordered by key
    pub fn list(&self) -> Vec<MetricTarget> {
        let mut targets: Vec<MetricTarget> =
            self.targets.iter().map(|r| r.value().clone()).collect();
        targets.sort_by(|a, b| a.key().cmp(&b.key()));
        targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets() {
        let targets = default_targets();
        assert_eq!(targets.len(), 9);
        assert!(targets.iter().any(|t| t.service == "payments"
            && t.metric == "error_rate"
            && t.query == "rate(payments_errors_total[1m])"));
        assert!(targets
            .iter()
            .any(|t| t.query == "orders_latency_seconds{quantile=\"0.99\"}"));
    }

    #[test]
    fn test_registry_replaces_same_key() {
        let registry = TargetRegistry::with_targets(service_targets("orders"));
        assert_eq!(registry.len(), 3);

        registry.register(MetricTarget::new("orders", "latency", "custom_latency"));
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry
                .get(&MetricKey::new("orders", "latency"))
                .map(|t| t.query),
            Some("custom_latency".to_string())
        );

        let listed: Vec<String> = registry.list().into_iter().map(|t| t.metric).collect();
        assert_eq!(listed, vec!["cpu_usage", "error_rate", "latency"]);

        assert!(registry
            .unregister(&MetricKey::new("orders", "cpu_usage"))
            .is_some());
        assert_eq!(registry.len(), 2);
    }
}
