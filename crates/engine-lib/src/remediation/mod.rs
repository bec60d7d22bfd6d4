//! Remediation execution against external control planes
//!
//! This module provides:
//! - The backend capability contract (restart, health, scale)
//! - The notification sink contract used by alert actions
//! - Docker, dry-run, log and webhook implementations
//! - The action executor and the append-only action history

mod docker;
mod dry_run;
mod executor;
mod history;
mod notify;

pub use docker::DockerBackend;
pub use dry_run::DryRunBackend;
pub use executor::{ActionExecutor, ActionRequest, ExecutionClaim, ExecutorConfig};
pub use history::ActionHistory;
pub use notify::{LogSink, WebhookSink};

use crate::error::{BackendError, NotifyError};
use crate::models::Severity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Container / orchestration control plane
#[async_trait]
pub trait RemediationBackend: Send + Sync {
    /// Backend name used in logs and errors
    fn name(&self) -> &'static str;

    async fn restart(&self, service: &str) -> Result<(), BackendError>;

    /// Whether the service currently reports healthy
    async fn is_healthy(&self, service: &str) -> Result<bool, BackendError>;

    async fn replicas(&self, service: &str) -> Result<u32, BackendError>;

    /// Request `replicas` instances; returns the count the backend applied
    async fn scale(&self, service: &str, replicas: u32) -> Result<u32, BackendError>;
}

/// Alert emitted by an alert action
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub policy: String,
    pub service: String,
    pub channel: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Alerting destination
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}
