//! Backend that records requests without touching any control plane

use super::RemediationBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const INITIAL_REPLICAS: u32 = 1;

/// Logs every request; replica counts live in memory and services always
/// report healthy.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    replicas: DashMap<String, u32>,
    restarts: AtomicU64,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemediationBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn restart(&self, service: &str) -> Result<(), BackendError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        info!(service = %service, backend = "dry_run", "Restart requested (dry run)");
        Ok(())
    }

    async fn is_healthy(&self, _service: &str) -> Result<bool, BackendError> {
        Ok(true)
    }

    async fn replicas(&self, service: &str) -> Result<u32, BackendError> {
        Ok(self
            .replicas
            .get(service)
            .map(|r| *r)
            .unwrap_or(INITIAL_REPLICAS))
    }

    async fn scale(&self, service: &str, replicas: u32) -> Result<u32, BackendError> {
        info!(service = %service, replicas = replicas, backend = "dry_run", "Scale requested (dry run)");
        self.replicas.insert(service.to_string(), replicas);
        Ok(replicas)
    }
}
