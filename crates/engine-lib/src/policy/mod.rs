//! Declarative remediation policies
//!
//! This module provides:
//! - Condition expressions parsed once at load time
//! - Validated policy definitions and the store they are loaded into
//! - Per-policy cooldown tracking

mod condition;
mod cooldown;
mod store;

pub use condition::{Clause, Comparison, Condition};
pub use cooldown::CooldownTracker;
pub use store::{default_policies, LoadReport, PolicyStore};

use crate::error::PolicyError;
use crate::models::{ActionKind, Anomaly};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Target service value matching every service
pub const ANY_SERVICE: &str = "*";

/// Default cooldown between two triggers of one policy
pub const DEFAULT_COOLDOWN_SECS: u64 = 300;

pub const DEFAULT_MIN_REPLICAS: u32 = 1;
pub const DEFAULT_MAX_REPLICAS: u32 = 10;

/// Desired replica change of a scale action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleTarget {
    /// Absolute replica count
    Replicas(u32),
    /// Relative change from the current count
    Step(i32),
}

/// Scale request with the bounds it is clamped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleSpec {
    pub target: ScaleTarget,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

impl ScaleSpec {
    /// Replica count to request given the current count; out-of-bounds
    /// requests are clamped, never rejected.
    pub fn resolve(&self, current: u32) -> u32 {
        let desired = match self.target {
            ScaleTarget::Replicas(n) => i64::from(n),
            ScaleTarget::Step(step) => i64::from(current) + i64::from(step),
        };
        desired.clamp(i64::from(self.min_replicas), i64::from(self.max_replicas)) as u32
    }
}

/// Raw policy record as found in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub service: String,
    #[serde(default = "default_cooldown")]
    pub cooldown: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,
}

fn default_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_enabled() -> bool {
    true
}

impl PolicyRecord {
    pub fn new(name: &str, condition: &str, action: &str, service: &str, cooldown: u64) -> Self {
        Self {
            name: name.to_string(),
            condition: condition.to_string(),
            action: action.to_string(),
            service: service.to_string(),
            cooldown,
            enabled: true,
            channel: None,
            replicas: None,
            min_replicas: None,
            max_replicas: None,
        }
    }

    /// Parse and validate into a [`Policy`]
    pub fn validate(self) -> Result<Policy, PolicyError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(PolicyError::MissingField { field: "name" });
        }
        let target_service = self.service.trim().to_string();
        if target_service.is_empty() {
            return Err(PolicyError::MissingField { field: "service" });
        }

        let condition =
            Condition::parse(&self.condition).map_err(|source| PolicyError::Condition {
                name: name.clone(),
                source,
            })?;

        let (action, scale_target) = match self.action.trim() {
            "restart_container" | "restart" => (ActionKind::RestartContainer, None),
            "alert" => (ActionKind::Alert, None),
            "scale" => match self.replicas {
                Some(n) => (ActionKind::Scale, Some(ScaleTarget::Replicas(n))),
                None => {
                    return Err(PolicyError::ScaleBounds {
                        name,
                        reason: "scale requires a replicas target".to_string(),
                    })
                }
            },
            "scale_up" => (ActionKind::Scale, Some(ScaleTarget::Step(1))),
            "scale_down" => (ActionKind::Scale, Some(ScaleTarget::Step(-1))),
            other => {
                return Err(PolicyError::UnknownAction {
                    name,
                    action: other.to_string(),
                })
            }
        };

        let scale = match scale_target {
            Some(target) => {
                let min_replicas = self.min_replicas.unwrap_or(DEFAULT_MIN_REPLICAS);
                let max_replicas = self.max_replicas.unwrap_or(DEFAULT_MAX_REPLICAS);
                if min_replicas > max_replicas {
                    return Err(PolicyError::ScaleBounds {
                        name,
                        reason: format!(
                            "min_replicas {} exceeds max_replicas {}",
                            min_replicas, max_replicas
                        ),
                    });
                }
                Some(ScaleSpec {
                    target,
                    min_replicas,
                    max_replicas,
                })
            }
            None => None,
        };

        Ok(Policy {
            name,
            condition,
            action,
            target_service,
            cooldown_seconds: self.cooldown,
            enabled: self.enabled,
            channel: self.channel,
            scale,
        })
    }
}

/// Validated, immutable policy
#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub name: String,
    pub condition: Condition,
    pub action: ActionKind,
    #[serde(rename = "service")]
    pub target_service: String,
    #[serde(rename = "cooldown")]
    pub cooldown_seconds: u64,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleSpec>,
}

impl Policy {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn applies_to(&self, service: &str) -> bool {
        self.target_service == ANY_SERVICE || self.target_service == service
    }

    /// Enabled, targets the anomaly's service, and the condition holds
    pub fn matches(&self, anomaly: &Anomaly) -> bool {
        self.enabled && self.applies_to(&anomaly.service) && self.condition.evaluate(anomaly)
    }

    /// Service an action triggered by `anomaly` is executed against
    pub fn resolve_service<'a>(&'a self, anomaly: &'a Anomaly) -> &'a str {
        if self.target_service == ANY_SERVICE {
            &anomaly.service
        } else {
            &self.target_service
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionStatus, ExpectedRange, Severity};
    use chrono::Utc;

    fn anomaly(service: &str, metric: &str, value: f64) -> Anomaly {
        Anomaly {
            service: service.to_string(),
            metric: metric.to_string(),
            current_value: value,
            expected_range: ExpectedRange {
                min: 0.0,
                max: 0.2,
                mean: 0.1,
            },
            is_anomaly: true,
            confidence: 0.9,
            z_score: 4.0,
            severity: Severity::Critical,
            status: DetectionStatus::Evaluated,
            samples: 20,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_validate_restart_policy() {
        let policy = PolicyRecord::new("r", "latency > 0.5", "restart_container", "orders", 300)
            .validate()
            .unwrap();
        assert_eq!(policy.action, ActionKind::RestartContainer);
        assert_eq!(policy.cooldown(), Duration::from_secs(300));
        assert!(policy.scale.is_none());
    }

    #[test]
    fn test_validate_unknown_action_fails() {
        let err = PolicyRecord::new("r", "latency > 0.5", "reboot_host", "orders", 300)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PolicyError::UnknownAction { .. }));
        assert_eq!(err.policy_name(), Some("r"));
    }

    #[test]
    fn test_validate_missing_fields() {
        let err = PolicyRecord::new(" ", "latency > 0.5", "alert", "orders", 300)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PolicyError::MissingField { field: "name" }));

        let err = PolicyRecord::new("a", "latency > 0.5", "alert", "", 300)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PolicyError::MissingField { field: "service" }));
    }

    #[test]
    fn test_validate_scale_variants() {
        let mut record = PolicyRecord::new("s", "cpu_usage > 80", "scale", "orders", 60);
        assert!(matches!(
            record.clone().validate(),
            Err(PolicyError::ScaleBounds { .. })
        ));

        record.replicas = Some(4);
        record.max_replicas = Some(3);
        let policy = record.clone().validate().unwrap();
        let scale = policy.scale.unwrap();
        assert_eq!(scale.target, ScaleTarget::Replicas(4));
        assert_eq!(scale.resolve(1), 3);

        record.min_replicas = Some(5);
        assert!(matches!(
            record.validate(),
            Err(PolicyError::ScaleBounds { .. })
        ));

        let up = PolicyRecord::new("u", "cpu_usage > 80", "scale_up", "orders", 60)
            .validate()
            .unwrap();
        assert_eq!(up.action, ActionKind::Scale);
        assert_eq!(up.scale.unwrap().resolve(2), 3);
        assert_eq!(up.scale.unwrap().resolve(10), 10);

        let down = PolicyRecord::new("d", "cpu_usage < 5", "scale_down", "orders", 60)
            .validate()
            .unwrap();
        assert_eq!(down.scale.unwrap().resolve(1), 1);
        assert_eq!(down.scale.unwrap().resolve(0), 1);
    }

    #[test]
    fn test_matching_rules() {
        let policy = PolicyRecord::new("p", "latency > 0.5", "restart_container", "orders", 300)
            .validate()
            .unwrap();

        assert!(policy.matches(&anomaly("orders", "latency", 0.9)));
        assert!(!policy.matches(&anomaly("users", "latency", 0.9)));
        assert!(!policy.matches(&anomaly("orders", "latency", 0.2)));
        assert!(!policy.matches(&anomaly("orders", "error_rate", 0.9)));

        let mut disabled = policy.clone();
        disabled.enabled = false;
        assert!(!disabled.matches(&anomaly("orders", "latency", 0.9)));
    }

    #[test]
    fn test_wildcard_service() {
        let policy = PolicyRecord::new("any", "error_rate > 0.1", "alert", "*", 60)
            .validate()
            .unwrap();
        let users = anomaly("users", "error_rate", 0.5);

        assert!(policy.matches(&users));
        assert_eq!(policy.resolve_service(&users), "users");
    }

    #[test]
    fn test_record_defaults_from_json() {
        let record: PolicyRecord = serde_json::from_str(
            r#"{"name":"p","condition":"latency > 1","action":"alert","service":"orders"}"#,
        )
        .unwrap();
        assert_eq!(record.cooldown, DEFAULT_COOLDOWN_SECS);
        assert!(record.enabled);
    }
}
