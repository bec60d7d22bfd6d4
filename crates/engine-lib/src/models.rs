//! Core data models shared by detection, policy evaluation and remediation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one tracked time series: a metric of a service
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub service: String,
    pub metric: String,
}

impl MetricKey {
    pub fn new(service: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            metric: metric.into(),
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.metric)
    }
}

/// A single value pulled from the metrics backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub service: String,
    pub metric: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.service.clone(), self.metric.clone())
    }
}

/// Discrete classification of anomaly magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Whether a detection record carries a verdict at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// The window held enough history to classify the value
    Evaluated,
    /// Not enough history yet; the record is neither normal nor anomalous
    InsufficientHistory,
}

/// Band of values considered normal for the current window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Classified detection record for one (service, metric) key
///
/// Created fresh each detection cycle and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub metric: String,
    pub current_value: f64,
    pub expected_range: ExpectedRange,
    #[serde(rename = "anomaly")]
    pub is_anomaly: bool,
    pub confidence: f64,
    pub z_score: f64,
    pub severity: Severity,
    pub status: DetectionStatus,
    /// Number of prior samples the verdict was computed from
    pub samples: usize,
    pub timestamp: DateTime<Utc>,
}

impl Anomaly {
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.service.clone(), self.metric.clone())
    }

    /// True when the record carries a real verdict
    pub fn has_verdict(&self) -> bool {
        self.status == DetectionStatus::Evaluated
    }
}

/// Remediation capability requested by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartContainer,
    Scale,
    Alert,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::RestartContainer => "restart_container",
            ActionKind::Scale => "scale",
            ActionKind::Alert => "alert",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    /// pending -> executing -> (completed | failed); pending may also fail
    /// directly when an action is cancelled before it starts.
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (ActionStatus::Pending, ActionStatus::Executing)
                | (ActionStatus::Pending, ActionStatus::Failed)
                | (ActionStatus::Executing, ActionStatus::Completed)
                | (ActionStatus::Executing, ActionStatus::Failed)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Executing => write!(f, "executing"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One discrete corrective operation and its outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub action_id: String,
    pub policy_name: String,
    pub service: String,
    pub action: ActionKind,
    pub reason: String,
    pub status: ActionStatus,
    /// Trigger time; cooldown spacing is measured on this value
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
