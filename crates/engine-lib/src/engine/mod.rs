//! Detection and remediation engine
//!
//! Each cycle pulls the current value of every tracked key, classifies it
//! against the key's sliding window, publishes the records to the
//! prediction board, and evaluates the anomalous ones against the policy
//! set. Matches that pass the in-flight and cooldown gates are dispatched
//! to the action executor.

mod r#loop;


pub use r#loop::EvaluationLoop;

use crate::anomaly::{
    AnomalyDetector, CycleScope, DetectorConfig, PredictionBoard, WindowStore,
    DEFAULT_HISTORY_LIMIT,
};
use crate::collector::{default_targets, MetricTarget, MetricsGateway, TargetRegistry};
use crate::error::GatewayError;
use crate::health::{components, HealthRegistry};
use crate::models::{ActionKind, Anomaly, RemediationAction};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::policy::{CooldownTracker, LoadReport, Policy, PolicyStore};
use crate::remediation::{
    ActionExecutor, ActionHistory, ActionRequest, DryRunBackend, ExecutorConfig, LogSink,
    NotificationSink, RemediationBackend,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between two cycles
    pub check_interval: Duration,
    /// Upper bound on one metric fetch
    pub fetch_timeout: Duration,
    /// Initial state of the remediation switch
    pub auto_remediation_enabled: bool,
    pub detector: DetectorConfig,
    /// Records kept in the prediction history
    pub history_limit: usize,
    pub executor: ExecutorConfig,
    /// Time running actions get to finish at shutdown
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
            auto_remediation_enabled: true,
            detector: DetectorConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            executor: ExecutorConfig::default(),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            anyhow::bail!("check interval must be greater than zero");
        }
        if self.fetch_timeout.is_zero() {
            anyhow::bail!("fetch timeout must be greater than zero");
        }
        self.detector.validate()
    }
}

/// What the evaluation loop is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Detecting,
    Evaluating,
    Stopped,
}

/// Outcome of one policy match
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum MatchDecision {
    Dispatched { action_id: String },
    /// Remediation is disabled; nothing was executed or recorded
    WouldTrigger,
    CoolingDown { remaining_secs: i64 },
    /// The same policy is already executing against the service
    InFlight,
    /// The executor refused the action
    Refused { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyMatch {
    pub policy: String,
    pub service: String,
    pub metric: String,
    pub action: ActionKind,
    #[serde(flatten)]
    pub decision: MatchDecision,
}

/// Result of evaluating one anomaly set against the policies
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub evaluated_at: DateTime<Utc>,
    pub remediation_enabled: bool,
    pub anomalies: usize,
    pub matches: Vec<PolicyMatch>,
    pub actions: Vec<RemediationAction>,
}

impl EvaluationReport {
    pub fn dispatched(&self) -> usize {
        self.actions.len()
    }

    pub fn would_trigger(&self) -> usize {
        self.matches
            .iter()
            .filter(|m| m.decision == MatchDecision::WouldTrigger)
            .count()
    }
}

/// Result of one detection pass
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub detected_at: DateTime<Utc>,
    /// One record per key whose value could be fetched, ordered by key
    pub records: Vec<Anomaly>,
    pub anomalies: usize,
    /// Keys skipped because no value was available
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub detection: DetectionReport,
    pub evaluation: EvaluationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub auto_remediation_enabled: bool,
    pub policies_loaded: usize,
    pub policies_enabled: usize,
    pub policies_rejected: usize,
    pub policy_source: String,
    pub actions_executed: usize,
    pub actions_in_flight: usize,
    pub tracked_keys: usize,
    pub phase: LoopPhase,
    pub last_check: Option<DateTime<Utc>>,
    pub check_interval_secs: u64,
    pub backend: &'static str,
}

#[derive(Debug)]
struct LoopState {
    phase: LoopPhase,
    last_check: Option<DateTime<Utc>>,
}

pub struct Engine {
    gateway: Arc<dyn MetricsGateway>,
    targets: TargetRegistry,
    windows: WindowStore,
    detector: AnomalyDetector,
    board: PredictionBoard,
    policies: PolicyStore,
    policy_report: LoadReport,
    cooldowns: CooldownTracker,
    executor: ActionExecutor,
    remediation_enabled: AtomicBool,
    state: RwLock<LoopState>,
    config: EngineConfig,
    health: HealthRegistry,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn board(&self) -> &PredictionBoard {
        &self.board
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn policy_report(&self) -> &LoadReport {
        &self.policy_report
    }

    pub fn history(&self) -> &Arc<ActionHistory> {
        self.executor.history()
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn windows(&self) -> &WindowStore {
        &self.windows
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    pub fn remediation_enabled(&self) -> bool {
        self.remediation_enabled.load(Ordering::SeqCst)
    }

    pub fn set_remediation_enabled(&self, enabled: bool) {
        let previous = self.remediation_enabled.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            self.metrics.set_remediation_enabled(enabled);
            self.logger.log_remediation_toggled(enabled);
        }
    }

    /// Flip the remediation switch, returning the new state
    pub fn toggle_remediation(&self) -> bool {
        let enabled = !self.remediation_enabled.fetch_xor(true, Ordering::SeqCst);
        self.metrics.set_remediation_enabled(enabled);
        self.logger.log_remediation_toggled(enabled);
        enabled
    }

    async fn set_phase(&self, phase: LoopPhase) {
        self.state.write().await.phase = phase;
    }

    /// Fetch, classify and publish every tracked key
    pub async fn detect(&self, now: DateTime<Utc>) -> DetectionReport {
        self.detect_targets(self.targets.list(), CycleScope::Full, now)
            .await
    }

    /// Detection restricted to matching keys, outside the regular cycle
    pub async fn trigger_detection(
        &self,
        service: Option<&str>,
        metric: Option<&str>,
        now: DateTime<Utc>,
    ) -> DetectionReport {
        let targets: Vec<MetricTarget> = self
            .targets
            .list()
            .into_iter()
            .filter(|t| service.map_or(true, |s| t.service == s))
            .filter(|t| metric.map_or(true, |m| t.metric == m))
            .collect();
        let scope = if service.is_none() && metric.is_none() {
            CycleScope::Full
        } else {
            CycleScope::Partial
        };
        info!(
            service = service.unwrap_or("*"),
            metric = metric.unwrap_or("*"),
            keys = targets.len(),
            "Manual detection triggered"
        );
        self.detect_targets(targets, scope, now).await
    }

    async fn detect_targets(
        &self,
        targets: Vec<MetricTarget>,
        scope: CycleScope,
        now: DateTime<Utc>,
    ) -> DetectionReport {
        let start = Instant::now();
        let requested = targets.len();
        let fetch_timeout = self.config.fetch_timeout;

        let mut fetches = JoinSet::new();
        for target in targets {
            let gateway = Arc::clone(&self.gateway);
            fetches.spawn(async move {
                let result = match tokio::time::timeout(fetch_timeout, gateway.fetch(&target)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout {
                        key: target.key().to_string(),
                    }),
                };
                (target, result)
            });
        }

        let mut records = Vec::with_capacity(requested);
        let mut unavailable = Vec::new();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((target, Ok(value))) if value.is_finite() => {
                    records.push(self.detector.observe(&self.windows, &target.key(), value, now));
                }
                Ok((target, Ok(value))) => {
                    self.metrics.inc_fetch_errors();
                    debug!(key = %target.key(), value = value, "Skipping non-finite value");
                    unavailable.push(target.key().to_string());
                }
                Ok((target, Err(e))) => {
                    self.metrics.inc_fetch_errors();
                    debug!(key = %target.key(), error = %e, "Skipping key without a value");
                    unavailable.push(target.key().to_string());
                }
                Err(e) => {
                    self.metrics.inc_fetch_errors();
                    warn!(error = %e, "Metric fetch task failed");
                }
            }
        }
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        unavailable.sort();

        for anomaly in records.iter().filter(|a| a.is_anomaly) {
            self.metrics
                .inc_anomalies_detected(&anomaly.service, &anomaly.metric, anomaly.severity);
            self.logger.log_anomaly(anomaly);
        }

        self.board.record(&records, scope).await;
        self.update_gateway_health(requested, unavailable.len()).await;
        self.health.set_healthy(components::DETECTOR).await;
        self.metrics.set_tracked_keys(self.windows.len());
        self.metrics
            .observe_detection_latency(start.elapsed().as_secs_f64());

        let anomalies = records.iter().filter(|a| a.is_anomaly).count();
        debug!(
            keys = records.len(),
            anomalies = anomalies,
            unavailable = unavailable.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Detection pass complete"
        );

        DetectionReport {
            detected_at: now,
            records,
            anomalies,
            unavailable,
        }
    }

    async fn update_gateway_health(&self, requested: usize, unavailable: usize) {
        if unavailable == 0 {
            self.health.set_healthy(components::METRICS_GATEWAY).await;
        } else if unavailable >= requested {
            self.health
                .set_unhealthy(components::METRICS_GATEWAY, "no metric values available")
                .await;
        } else {
            self.health
                .set_degraded(
                    components::METRICS_GATEWAY,
                    format!("{} of {} keys unavailable", unavailable, requested),
                )
                .await;
        }
    }

    /// Match anomalous records against the policies and dispatch what passes
    /// the in-flight and cooldown gates.
    ///
    /// Records without an anomaly verdict are ignored. While remediation is
    /// disabled every match is reported as would-trigger and no state changes.
    pub async fn evaluate(&self, records: &[Anomaly], now: DateTime<Utc>) -> EvaluationReport {
        let start = Instant::now();
        let enabled = self.remediation_enabled();
        let anomalies: Vec<&Anomaly> = records.iter().filter(|a| a.is_anomaly).collect();

        let mut matches = Vec::new();
        let mut actions = Vec::new();

        for anomaly in &anomalies {
            for policy in self.policies.matching(anomaly) {
                let service = policy.resolve_service(anomaly).to_string();
                let decision = if enabled {
                    self.try_dispatch(policy, anomaly, &service, now, &mut actions)
                        .await
                } else {
                    self.metrics.inc_would_trigger();
                    self.logger
                        .log_would_trigger(&policy.name, &service, policy.action.as_str());
                    MatchDecision::WouldTrigger
                };

                matches.push(PolicyMatch {
                    policy: policy.name.clone(),
                    service,
                    metric: anomaly.metric.clone(),
                    action: policy.action,
                    decision,
                });
            }
        }

        self.health.set_healthy(components::POLICY_ENGINE).await;
        self.metrics
            .observe_evaluation_latency(start.elapsed().as_secs_f64());

        if !matches.is_empty() {
            info!(
                anomalies = anomalies.len(),
                matches = matches.len(),
                dispatched = actions.len(),
                remediation_enabled = enabled,
                "Policy evaluation complete"
            );
        }

        EvaluationReport {
            evaluated_at: now,
            remediation_enabled: enabled,
            anomalies: anomalies.len(),
            matches,
            actions,
        }
    }

    async fn try_dispatch(
        &self,
        policy: &Policy,
        anomaly: &Anomaly,
        service: &str,
        now: DateTime<Utc>,
        actions: &mut Vec<RemediationAction>,
    ) -> MatchDecision {
        if self.executor.is_closed() {
            return MatchDecision::Refused {
                reason: "executor is shutting down".to_string(),
            };
        }

        // claim before the cooldown so a busy pair never consumes it
        let Some(claim) = self.executor.try_claim(&policy.name, service) else {
            debug!(policy = %policy.name, service = %service, "Policy already executing");
            return MatchDecision::InFlight;
        };

        if let Err(remaining) = self.cooldowns.try_acquire(policy, now).await {
            debug!(policy = %policy.name, remaining_secs = remaining.num_seconds(), "Policy in cooldown");
            return MatchDecision::CoolingDown {
                remaining_secs: remaining.num_seconds(),
            };
        }

        let request = ActionRequest::from_match(policy, anomaly);
        match self.executor.dispatch(claim, request, now).await {
            Ok(action) => {
                let action_id = action.action_id.clone();
                actions.push(action);
                MatchDecision::Dispatched { action_id }
            }
            Err(e) => {
                warn!(policy = %policy.name, error = %e, "Action dispatch refused");
                MatchDecision::Refused {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Evaluate the anomalies of the most recent detection pass
    pub async fn trigger_evaluation(&self, now: DateTime<Utc>) -> EvaluationReport {
        info!("Manual policy evaluation triggered");
        let current = self.board.current_anomalies().await;
        self.evaluate(&current, now).await
    }

    /// One full cycle: detect every key, then evaluate the result
    pub async fn tick(&self, now: DateTime<Utc>) -> CycleReport {
        self.set_phase(LoopPhase::Detecting).await;
        let detection = self.detect(now).await;

        self.set_phase(LoopPhase::Evaluating).await;
        let evaluation = self.evaluate(&detection.records, now).await;

        let mut state = self.state.write().await;
        state.phase = LoopPhase::Idle;
        state.last_check = Some(now);

        CycleReport {
            detection,
            evaluation,
        }
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.state.read().await;
        EngineStatus {
            auto_remediation_enabled: self.remediation_enabled(),
            policies_loaded: self.policies.len(),
            policies_enabled: self.policies.enabled_count(),
            policies_rejected: self.policy_report.rejected.len(),
            policy_source: self.policy_report.source.clone(),
            actions_executed: self.history().len().await,
            actions_in_flight: self.executor.in_flight(),
            tracked_keys: self.targets.len(),
            phase: state.phase,
            last_check: state.last_check,
            check_interval_secs: self.config.check_interval.as_secs(),
            backend: self.executor.backend_name(),
        }
    }

    /// Stop accepting actions and drain the executor
    pub async fn shutdown(&self) -> bool {
        self.set_phase(LoopPhase::Stopped).await;
        let drained = self.executor.shutdown(self.config.shutdown_grace).await;
        if !drained {
            self.health
                .set_degraded(components::EXECUTOR, "actions cancelled at shutdown")
                .await;
        }
        drained
    }
}

/// Builder wiring an [`Engine`] from its collaborators
pub struct EngineBuilder {
    gateway: Option<Arc<dyn MetricsGateway>>,
    targets: Option<Vec<MetricTarget>>,
    policies: Option<(PolicyStore, LoadReport)>,
    backend: Option<Arc<dyn RemediationBackend>>,
    sink: Option<Arc<dyn NotificationSink>>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            gateway: None,
            targets: None,
            policies: None,
            backend: None,
            sink: None,
            health: None,
            logger: None,
            config: EngineConfig::default(),
        }
    }

    pub fn gateway(mut self, gateway: Arc<dyn MetricsGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Tracked keys; defaults to [`default_targets`]
    pub fn targets(mut self, targets: Vec<MetricTarget>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// Loaded policy set; defaults to the built-in policies
    pub fn policies(mut self, policies: (PolicyStore, LoadReport)) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Defaults to [`DryRunBackend`]
    pub fn backend(mut self, backend: Arc<dyn RemediationBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Defaults to [`LogSink`]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    pub fn auto_remediation(mut self, enabled: bool) -> Self {
        self.config.auto_remediation_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<Engine> {
        let gateway = self
            .gateway
            .ok_or_else(|| anyhow::anyhow!("Metrics gateway is required"))?;
        let config = self.config;
        config.validate().context("Invalid engine configuration")?;

        let (policies, policy_report) = self.policies.unwrap_or_else(PolicyStore::defaults);
        let targets = TargetRegistry::with_targets(self.targets.unwrap_or_else(default_targets));
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(DryRunBackend::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let health = self.health.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new("autoheal-engine"));
        let metrics = EngineMetrics::new();

        metrics.set_remediation_enabled(config.auto_remediation_enabled);
        metrics.set_policies(policies.len(), policy_report.rejected.len());
        logger.log_policies_loaded(
            &policy_report.source,
            policy_report.loaded,
            policy_report.rejected.len(),
        );

        let executor = ActionExecutor::new(
            backend,
            sink,
            Arc::new(ActionHistory::new()),
            config.executor.clone(),
            metrics.clone(),
            logger.clone(),
        );

        Ok(Engine {
            gateway,
            targets,
            windows: WindowStore::new(config.detector.window_size),
            detector: AnomalyDetector::new(config.detector.clone()),
            board: PredictionBoard::new(config.history_limit),
            policies,
            policy_report,
            cooldowns: CooldownTracker::new(),
            executor,
            remediation_enabled: AtomicBool::new(config.auto_remediation_enabled),
            state: RwLock::new(LoopState {
                phase: LoopPhase::Idle,
                last_check: None,
            }),
            config,
            health,
            metrics,
            logger,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
