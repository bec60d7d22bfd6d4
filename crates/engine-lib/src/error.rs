//! Typed errors for the engine's component seams

use thiserror::Error;

/// Reasons a condition expression cannot be parsed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("condition expression is empty")]
    Empty,
    #[error("clause {index} is empty")]
    EmptyClause { index: usize },
    #[error("clause '{clause}' has no comparison operator (expected one of >, <, >=, <=, ==)")]
    MissingOperator { clause: String },
    #[error("clause '{clause}' has an invalid metric name")]
    InvalidMetric { clause: String },
    #[error("clause '{clause}' has an invalid threshold '{threshold}'")]
    InvalidThreshold { clause: String, threshold: String },
}

/// Reasons a single policy record is rejected at load time
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy '{name}' has a malformed condition: {source}")]
    Condition {
        name: String,
        #[source]
        source: ConditionError,
    },
    #[error("policy '{name}' uses unknown action '{action}'")]
    UnknownAction { name: String, action: String },
    #[error("policy '{name}' has invalid scale bounds: {reason}")]
    ScaleBounds { name: String, reason: String },
    #[error("policy record is missing a {field}")]
    MissingField { field: &'static str },
    #[error("policy '{name}' is defined more than once")]
    Duplicate { name: String },
    #[error("policy record {index} could not be read: {reason}")]
    Record { index: usize, reason: String },
}

impl PolicyError {
    /// Policy name the error refers to, when known
    pub fn policy_name(&self) -> Option<&str> {
        match self {
            PolicyError::Condition { name, .. }
            | PolicyError::UnknownAction { name, .. }
            | PolicyError::ScaleBounds { name, .. }
            | PolicyError::Duplicate { name } => Some(name),
            PolicyError::MissingField { .. } | PolicyError::Record { .. } => None,
        }
    }
}

/// Failure to obtain a metric value from the metrics backend
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no value available for {key}")]
    Unavailable { key: String },
    #[error("metrics query for {key} timed out")]
    Timeout { key: String },
    #[error("metrics backend request failed: {0}")]
    Request(String),
}

/// Failure reported by the container / orchestration control plane
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("service '{0}' not found")]
    NotFound(String),
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },
    #[error("control plane request failed: {0}")]
    Request(String),
    #[error("control plane rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Failure to deliver a notification
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Invalid use of the action history
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("action '{0}' not found")]
    UnknownAction(String),
    #[error("action '{action_id}' cannot move from {from} to {to}")]
    IllegalTransition {
        action_id: String,
        from: crate::models::ActionStatus,
        to: crate::models::ActionStatus,
    },
}

/// Dispatch refused by the action executor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error("executor is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    History(#[from] HistoryError),
}
