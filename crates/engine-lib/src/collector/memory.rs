//! Settable in-memory gateway for dry runs and tests

use super::{async_trait, MetricTarget, MetricsGateway};
use crate::error::GatewayError;
use crate::models::MetricKey;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gateway serving whatever value was last set for a key
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    values: DashMap<MetricKey, f64>,
    fetches: AtomicU64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, service: &str, metric: &str, value: f64) {
        self.values.insert(MetricKey::new(service, metric), value);
    }

    /// Make the key report unavailable
    pub fn clear(&self, service: &str, metric: &str) {
        self.values.remove(&MetricKey::new(service, metric));
    }

    /// Number of fetches served or refused
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsGateway for InMemoryGateway {
    async fn fetch(&self, target: &MetricTarget) -> Result<f64, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = target.key();
        self.values
            .get(&key)
            .map(|v| *v)
            .ok_or_else(|| GatewayError::Unavailable {
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_clear() {
        let gateway = InMemoryGateway::new();
        let target = MetricTarget::new("orders", "latency", "q");

        assert!(gateway.fetch(&target).await.is_err());

        gateway.set("orders", "latency", 0.25);
        assert_eq!(gateway.fetch(&target).await.unwrap(), 0.25);

        gateway.clear("orders", "latency");
        assert!(matches!(
            gateway.fetch(&target).await,
            Err(GatewayError::Unavailable { .. })
        ));
        assert_eq!(gateway.fetch_count(), 3);
    }
}
