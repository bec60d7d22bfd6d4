//! Engine library for metric anomaly detection and policy remediation
//!
//! This crate provides the core functionality for:
//! - Metric collection through a pluggable gateway
//! - Sliding-window anomaly detection
//! - Policy evaluation with cooldowns
//! - Remediation action execution and history
//! - Health checks, observability and the HTTP API

pub mod anomaly;
pub mod api;
pub mod collector;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod remediation;

pub use engine::{Engine, EngineBuilder, EngineConfig, EvaluationLoop};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EngineMetrics, StructuredLogger};
