//! Observability infrastructure for the remediation engine
//!
//! Provides:
//! - Prometheus metrics (detection and evaluation latency, anomalies, actions)
//! - Structured JSON logging with tracing

use crate::models::{ActionStatus, Anomaly, RemediationAction, Severity};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latencies (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    detection_latency_seconds: Histogram,
    evaluation_latency_seconds: Histogram,
    tracked_keys: IntGauge,
    anomalies_detected: IntCounterVec,
    fetch_errors: IntCounter,
    actions_dispatched: IntCounterVec,
    actions_completed: IntCounterVec,
    actions_failed: IntCounterVec,
    would_trigger: IntCounter,
    actions_in_flight: IntGauge,
    remediation_enabled: IntGauge,
    policies_loaded: IntGauge,
    policies_rejected: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            detection_latency_seconds: register_histogram!(
                "autoheal_detection_latency_seconds",
                "Time spent on one detection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            evaluation_latency_seconds: register_histogram!(
                "autoheal_evaluation_latency_seconds",
                "Time spent evaluating policies against one cycle's anomalies",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            tracked_keys: register_int_gauge!(
                "autoheal_tracked_keys",
                "Number of (service, metric) keys with a sliding window"
            )
            .expect("Failed to register tracked_keys"),

            anomalies_detected: register_int_counter_vec!(
                "autoheal_anomalies_detected_total",
                "Total number of anomalies detected",
                &["service", "metric", "severity"]
            )
            .expect("Failed to register anomalies_detected"),

            fetch_errors: register_int_counter!(
                "autoheal_fetch_errors_total",
                "Total number of failed metric fetches"
            )
            .expect("Failed to register fetch_errors"),

            actions_dispatched: register_int_counter_vec!(
                "autoheal_actions_dispatched_total",
                "Total number of remediation actions dispatched",
                &["action"]
            )
            .expect("Failed to register actions_dispatched"),

            actions_completed: register_int_counter_vec!(
                "autoheal_actions_completed_total",
                "Total number of remediation actions that completed",
                &["action"]
            )
            .expect("Failed to register actions_completed"),

            actions_failed: register_int_counter_vec!(
                "autoheal_actions_failed_total",
                "Total number of remediation actions that failed",
                &["action"]
            )
            .expect("Failed to register actions_failed"),

            would_trigger: register_int_counter!(
                "autoheal_would_trigger_total",
                "Policy matches observed while remediation was disabled"
            )
            .expect("Failed to register would_trigger"),

            actions_in_flight: register_int_gauge!(
                "autoheal_actions_in_flight",
                "Remediation actions currently executing"
            )
            .expect("Failed to register actions_in_flight"),

            remediation_enabled: register_int_gauge!(
                "autoheal_remediation_enabled",
                "1 when automatic remediation is enabled"
            )
            .expect("Failed to register remediation_enabled"),

            policies_loaded: register_int_gauge!(
                "autoheal_policies_loaded",
                "Number of policies loaded at startup"
            )
            .expect("Failed to register policies_loaded"),

            policies_rejected: register_int_gauge!(
                "autoheal_policies_rejected",
                "Number of policy records rejected at startup"
            )
            .expect("Failed to register policies_rejected"),
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn set_tracked_keys(&self, count: usize) {
        self.inner().tracked_keys.set(count as i64);
    }

    pub fn inc_anomalies_detected(&self, service: &str, metric: &str, severity: Severity) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[service, metric, &severity.to_string()])
            .inc();
    }

    pub fn inc_fetch_errors(&self) {
        self.inner().fetch_errors.inc();
    }

    pub fn inc_actions_dispatched(&self, action: &str) {
        self.inner()
            .actions_dispatched
            .with_label_values(&[action])
            .inc();
        self.inner().actions_in_flight.inc();
    }

    /// Record the terminal status of an action
    pub fn record_action_finished(&self, action: &str, status: ActionStatus) {
        match status {
            ActionStatus::Completed => self
                .inner()
                .actions_completed
                .with_label_values(&[action])
                .inc(),
            _ => self
                .inner()
                .actions_failed
                .with_label_values(&[action])
                .inc(),
        }
        self.inner().actions_in_flight.dec();
    }

    pub fn inc_would_trigger(&self) {
        self.inner().would_trigger.inc();
    }

    pub fn set_remediation_enabled(&self, enabled: bool) {
        self.inner().remediation_enabled.set(i64::from(enabled));
    }

    pub fn set_policies(&self, loaded: usize, rejected: usize) {
        self.inner().policies_loaded.set(loaded as i64);
        self.inner().policies_rejected.set(rejected as i64);
    }
}

/// Structured logger for engine events
///
/// Consistent JSON-formatted logging for anomalies, policy decisions and
/// remediation actions.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, policies: usize, remediation_enabled: bool) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            engine_version = %version,
            policies = policies,
            remediation_enabled = remediation_enabled,
            "Remediation engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Remediation engine shutting down"
        );
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        match anomaly.severity {
            Severity::Critical => {
                warn!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    service = %anomaly.service,
                    metric = %anomaly.metric,
                    severity = %anomaly.severity,
                    current_value = anomaly.current_value,
                    expected_min = anomaly.expected_range.min,
                    expected_max = anomaly.expected_range.max,
                    z_score = anomaly.z_score,
                    confidence = anomaly.confidence,
                    "Critical anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    instance = %self.instance,
                    service = %anomaly.service,
                    metric = %anomaly.metric,
                    severity = %anomaly.severity,
                    current_value = anomaly.current_value,
                    expected_min = anomaly.expected_range.min,
                    expected_max = anomaly.expected_range.max,
                    z_score = anomaly.z_score,
                    confidence = anomaly.confidence,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_policies_loaded(&self, source: &str, loaded: usize, rejected: usize) {
        if rejected > 0 {
            warn!(
                event = "policies_loaded",
                instance = %self.instance,
                source = %source,
                loaded = loaded,
                rejected = rejected,
                "Policies loaded with rejected records"
            );
        } else {
            info!(
                event = "policies_loaded",
                instance = %self.instance,
                source = %source,
                loaded = loaded,
                "Policies loaded"
            );
        }
    }

    pub fn log_action_dispatched(&self, action: &RemediationAction) {
        info!(
            event = "action_dispatched",
            instance = %self.instance,
            action_id = %action.action_id,
            policy = %action.policy_name,
            service = %action.service,
            action = %action.action,
            reason = %action.reason,
            "Remediation action dispatched"
        );
    }

    pub fn log_action_finished(&self, action: &RemediationAction) {
        let details = action.details.as_deref().unwrap_or("");
        if action.status == ActionStatus::Completed {
            info!(
                event = "action_finished",
                instance = %self.instance,
                action_id = %action.action_id,
                policy = %action.policy_name,
                service = %action.service,
                action = %action.action,
                status = "completed",
                details = %details,
                "Remediation action completed"
            );
        } else {
            warn!(
                event = "action_finished",
                instance = %self.instance,
                action_id = %action.action_id,
                policy = %action.policy_name,
                service = %action.service,
                action = %action.action,
                status = "failed",
                details = %details,
                "Remediation action failed"
            );
        }
    }

    pub fn log_would_trigger(&self, policy: &str, service: &str, action: &str) {
        info!(
            event = "would_trigger",
            instance = %self.instance,
            policy = %policy,
            service = %service,
            action = %action,
            "Remediation disabled, policy would have triggered"
        );
    }

    pub fn log_remediation_toggled(&self, enabled: bool) {
        warn!(
            event = "remediation_toggled",
            instance = %self.instance,
            enabled = enabled,
            "Automatic remediation toggled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_metrics_creation() {
        // Registered once per process in the global registry
        let metrics = EngineMetrics::new();
        let again = EngineMetrics::new();

        metrics.observe_detection_latency(0.01);
        metrics.observe_evaluation_latency(0.002);
        metrics.set_tracked_keys(9);
        metrics.inc_anomalies_detected("orders", "latency", Severity::Critical);
        metrics.inc_actions_dispatched("alert");
        again.record_action_finished("alert", ActionStatus::Completed);
        metrics.set_remediation_enabled(true);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "autoheal_anomalies_detected_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("engine-0");
        assert_eq!(logger.instance, "engine-0");
    }
}
