//! Asynchronous execution of remediation actions
//!
//! Each dispatched action runs in its own task so policy evaluation never
//! waits on a restart. Execution of one policy against one service is
//! mutually exclusive through [`ExecutionClaim`], independently of the
//! cooldown, which only bounds frequency.

use super::{ActionHistory, Notification, NotificationSink, RemediationBackend};
use crate::error::ExecutorError;
use crate::models::{ActionKind, ActionStatus, Anomaly, RemediationAction, Severity};
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::policy::{Policy, ScaleSpec};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Failure reason recorded for actions interrupted at shutdown
pub const CANCELLED_REASON: &str = "cancelled by shutdown";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on waiting for a restarted service to report healthy
    pub restart_timeout: Duration,
    pub health_poll_interval: Duration,
    /// Upper bound on a single alert delivery
    pub alert_timeout: Duration,
    /// Channel used by alert policies that name none
    pub default_channel: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            restart_timeout: Duration::from_secs(60),
            health_poll_interval: Duration::from_secs(1),
            alert_timeout: Duration::from_secs(5),
            default_channel: "#ops".to_string(),
        }
    }
}

/// Fully resolved action derived from a matched policy and anomaly
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub policy_name: String,
    pub service: String,
    pub kind: ActionKind,
    pub reason: String,
    pub severity: Severity,
    pub channel: Option<String>,
    pub scale: Option<ScaleSpec>,
}

impl ActionRequest {
    pub fn from_match(policy: &Policy, anomaly: &Anomaly) -> Self {
        Self {
            policy_name: policy.name.clone(),
            service: policy.resolve_service(anomaly).to_string(),
            kind: policy.action,
            reason: format!(
                "{}.{} = {:.2} (anomaly detected with confidence {:.2})",
                anomaly.service, anomaly.metric, anomaly.current_value, anomaly.confidence
            ),
            severity: anomaly.severity,
            channel: policy.channel.clone(),
            scale: policy.scale,
        }
    }
}

type ClaimKey = (String, String);

/// Exclusive right to execute one policy against one service.
///
/// Released when dropped.
#[derive(Debug)]
pub struct ExecutionClaim {
    key: ClaimKey,
    in_flight: Arc<DashSet<ClaimKey>>,
}

impl ExecutionClaim {
    pub fn policy(&self) -> &str {
        &self.key.0
    }

    pub fn service(&self) -> &str {
        &self.key.1
    }
}

impl Drop for ExecutionClaim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.key);
    }
}

/// State shared with running action tasks
struct ExecutionContext {
    backend: Arc<dyn RemediationBackend>,
    sink: Arc<dyn NotificationSink>,
    history: Arc<ActionHistory>,
    config: ExecutorConfig,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

pub struct ActionExecutor {
    ctx: Arc<ExecutionContext>,
    in_flight: Arc<DashSet<ClaimKey>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: broadcast::Sender<()>,
    closed: AtomicBool,
    sequence: AtomicU64,
}

impl ActionExecutor {
    pub fn new(
        backend: Arc<dyn RemediationBackend>,
        sink: Arc<dyn NotificationSink>,
        history: Arc<ActionHistory>,
        config: ExecutorConfig,
        metrics: EngineMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let (cancel, _) = broadcast::channel(1);
        Self {
            ctx: Arc::new(ExecutionContext {
                backend,
                sink,
                history,
                config,
                metrics,
                logger,
            }),
            in_flight: Arc::new(DashSet::new()),
            tasks: Mutex::new(Vec::new()),
            cancel,
            closed: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn history(&self) -> &Arc<ActionHistory> {
        &self.ctx.history
    }

    pub fn backend_name(&self) -> &'static str {
        self.ctx.backend.name()
    }

    /// Claim `(policy, service)`; `None` while an execution of the pair runs
    pub fn try_claim(&self, policy: &str, service: &str) -> Option<ExecutionClaim> {
        let key = (policy.to_string(), service.to_string());
        if self.in_flight.insert(key.clone()) {
            Some(ExecutionClaim {
                key,
                in_flight: Arc::clone(&self.in_flight),
            })
        } else {
            None
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, policy: &str, service: &str) -> bool {
        self.in_flight
            .contains(&(policy.to_string(), service.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_action_id(&self, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("ACTION-{}-{}", now.timestamp_millis(), seq)
    }

    /// Record a pending action and start executing it in the background.
    ///
    /// The claim is held by the action task until the action is terminal.
    pub async fn dispatch(
        &self,
        claim: ExecutionClaim,
        request: ActionRequest,
        now: DateTime<Utc>,
    ) -> Result<RemediationAction, ExecutorError> {
        debug_assert_eq!(claim.policy(), request.policy_name);
        debug_assert_eq!(claim.service(), request.service);

        // held through the push so a concurrent shutdown either refuses this
        // action or waits for it
        let mut tasks = self.tasks.lock().await;
        let cancel = self.cancel.subscribe();
        if self.is_closed() {
            return Err(ExecutorError::ShuttingDown);
        }

        let action = RemediationAction {
            action_id: self.next_action_id(now),
            policy_name: request.policy_name.clone(),
            service: request.service.clone(),
            action: request.kind,
            reason: request.reason.clone(),
            status: ActionStatus::Pending,
            timestamp: now,
            finished_at: None,
            details: None,
        };

        self.ctx.history.append(action.clone()).await;
        self.ctx.metrics.inc_actions_dispatched(request.kind.as_str());
        self.ctx.logger.log_action_dispatched(&action);

        let handle = tokio::spawn(run_action(
            Arc::clone(&self.ctx),
            action.action_id.clone(),
            request,
            claim,
            cancel,
        ));

        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);

        Ok(action)
    }

    /// Wait until every dispatched action is terminal
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = self.tasks.lock().await;
            tasks.retain(|h| !h.is_finished());
            let Some(handle) = tasks.last_mut() else {
                return;
            };
            if let Err(e) = handle.await {
                warn!(error = %e, "Action task panicked");
            }
        }
    }

    /// Refuse new dispatches, let running actions finish within `grace`,
    /// then cancel the rest. Returns true when nothing had to be cancelled.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);

        if tokio::time::timeout(grace, self.wait_idle()).await.is_ok() {
            return true;
        }

        warn!(
            in_flight = self.in_flight(),
            grace_secs = grace.as_secs_f64(),
            "Grace period elapsed, cancelling in-flight actions"
        );
        // no receivers means nothing left to cancel
        let _ = self.cancel.send(());
        self.wait_idle().await;
        false
    }
}

async fn run_action(
    ctx: Arc<ExecutionContext>,
    action_id: String,
    request: ActionRequest,
    claim: ExecutionClaim,
    mut cancel: broadcast::Receiver<()>,
) {
    let _claim = claim;
    let kind = request.kind.as_str();

    if let Err(e) = ctx
        .history
        .transition(&action_id, ActionStatus::Executing, None, Utc::now())
        .await
    {
        warn!(action_id = %action_id, error = %e, "Could not start action");
        ctx.metrics.record_action_finished(kind, ActionStatus::Failed);
        return;
    }

    let outcome = tokio::select! {
        outcome = ctx.execute(&request) => outcome,
        _ = cancel.recv() => Err(CANCELLED_REASON.to_string()),
    };

    let (status, details) = match outcome {
        Ok(details) => (ActionStatus::Completed, details),
        Err(reason) => (ActionStatus::Failed, reason),
    };

    match ctx
        .history
        .transition(&action_id, status, Some(details), Utc::now())
        .await
    {
        Ok(finished) => {
            ctx.metrics.record_action_finished(kind, finished.status);
            ctx.logger.log_action_finished(&finished);
        }
        Err(e) => {
            warn!(action_id = %action_id, error = %e, "Could not record action outcome");
            ctx.metrics.record_action_finished(kind, ActionStatus::Failed);
        }
    }
}

impl ExecutionContext {
    /// Details on success, failure reason otherwise
    async fn execute(&self, request: &ActionRequest) -> Result<String, String> {
        match request.kind {
            ActionKind::RestartContainer => self.restart(&request.service).await,
            ActionKind::Scale => self.scale(request).await,
            ActionKind::Alert => self.alert(request).await,
        }
    }

    async fn restart(&self, service: &str) -> Result<String, String> {
        self.backend
            .restart(service)
            .await
            .map_err(|e| format!("restart failed: {}", e))?;

        let poll_interval = self.config.health_poll_interval;
        let wait_healthy = async {
            loop {
                match self.backend.is_healthy(service).await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => debug!(service = %service, error = %e, "Health poll failed"),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        match tokio::time::timeout(self.config.restart_timeout, wait_healthy).await {
            Ok(()) => Ok(format!("Container {} restarted and healthy", service)),
            Err(_) => Err(format!(
                "{} did not report healthy within {}s after restart",
                service,
                self.config.restart_timeout.as_secs_f64()
            )),
        }
    }

    async fn scale(&self, request: &ActionRequest) -> Result<String, String> {
        let spec = request
            .scale
            .ok_or_else(|| "scale action has no scale target".to_string())?;
        let service = &request.service;

        let current = self
            .backend
            .replicas(service)
            .await
            .map_err(|e| format!("replica lookup failed: {}", e))?;
        let desired = spec.resolve(current);
        let applied = self
            .backend
            .scale(service, desired)
            .await
            .map_err(|e| format!("scale failed: {}", e))?;

        Ok(format!(
            "Scaled {} from {} to {} replicas",
            service, current, applied
        ))
    }

    async fn alert(&self, request: &ActionRequest) -> Result<String, String> {
        let channel = request
            .channel
            .clone()
            .unwrap_or_else(|| self.config.default_channel.clone());
        let notification = Notification {
            policy: request.policy_name.clone(),
            service: request.service.clone(),
            channel: channel.clone(),
            severity: request.severity,
            message: format!("ALERT: {} - {}", request.service, request.reason),
            timestamp: Utc::now(),
        };

        match tokio::time::timeout(self.config.alert_timeout, self.sink.send(&notification)).await
        {
            Ok(Ok(())) => Ok(format!("Alert sent to {}", channel)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "alert delivery timed out after {}ms",
                self.config.alert_timeout.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, NotifyError};
    use crate::models::{DetectionStatus, ExpectedRange};
    use crate::policy::PolicyRecord;
    use crate::remediation::{DryRunBackend, LogSink};
    use async_trait::async_trait;

    /// Restarts succeed but the service never comes back healthy
    struct NeverHealthy;

    #[async_trait]
    impl RemediationBackend for NeverHealthy {
        fn name(&self) -> &'static str {
            "never_healthy"
        }
        async fn restart(&self, _service: &str) -> Result<(), BackendError> {
            Ok(())
        }
        async fn is_healthy(&self, _service: &str) -> Result<bool, BackendError> {
            Ok(false)
        }
        async fn replicas(&self, _service: &str) -> Result<u32, BackendError> {
            Ok(1)
        }
        async fn scale(&self, _service: &str, replicas: u32) -> Result<u32, BackendError> {
            Ok(replicas)
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            restart_timeout: Duration::from_millis(100),
            health_poll_interval: Duration::from_millis(10),
            alert_timeout: Duration::from_millis(100),
            default_channel: "#ops".to_string(),
        }
    }

    fn executor(
        backend: Arc<dyn RemediationBackend>,
        sink: Arc<dyn NotificationSink>,
        config: ExecutorConfig,
    ) -> ActionExecutor {
        ActionExecutor::new(
            backend,
            sink,
            Arc::new(ActionHistory::new()),
            config,
            EngineMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn anomaly(service: &str, metric: &str, value: f64) -> Anomaly {
        Anomaly {
            service: service.to_string(),
            metric: metric.to_string(),
            current_value: value,
            expected_range: ExpectedRange {
                min: 0.0,
                max: 1.0,
                mean: 0.5,
            },
            is_anomaly: true,
            confidence: 0.95,
            z_score: 4.5,
            severity: Severity::Critical,
            status: DetectionStatus::Evaluated,
            samples: 20,
            timestamp: Utc::now(),
        }
    }

    async fn run(executor: &ActionExecutor, record: PolicyRecord, anomaly: &Anomaly) -> RemediationAction {
        let policy = record.validate().unwrap();
        let request = ActionRequest::from_match(&policy, anomaly);
        let claim = executor
            .try_claim(&request.policy_name, &request.service)
            .unwrap();
        let pending = executor.dispatch(claim, request, Utc::now()).await.unwrap();
        assert_eq!(pending.status, ActionStatus::Pending);

        executor.wait_idle().await;
        executor.history().get(&pending.action_id).await.unwrap()
    }

    #[tokio::test]
    async fn test_restart_completes_when_healthy() {
        let backend = Arc::new(DryRunBackend::new());
        let executor = executor(backend.clone(), Arc::new(LogSink), fast_config());

        let action = run(
            &executor,
            PolicyRecord::new("restart", "latency > 0.5", "restart_container", "orders", 300),
            &anomaly("orders", "latency", 0.9),
        )
        .await;

        assert_eq!(action.status, ActionStatus::Completed);
        assert!(action.finished_at.is_some());
        assert!(action.action_id.starts_with("ACTION-"));
        assert_eq!(
            action.reason,
            "orders.latency = 0.90 (anomaly detected with confidence 0.95)"
        );
        assert_eq!(backend.restart_count(), 1);
        assert!(!executor.is_in_flight("restart", "orders"));
    }

    #[tokio::test]
    async fn test_restart_times_out_without_retry() {
        let executor = executor(Arc::new(NeverHealthy), Arc::new(LogSink), fast_config());

        let action = run(
            &executor,
            PolicyRecord::new("restart", "latency > 0.5", "restart_container", "orders", 300),
            &anomaly("orders", "latency", 0.9),
        )
        .await;

        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action
            .details
            .unwrap()
            .contains("did not report healthy"));
        assert_eq!(executor.history().len().await, 1);
    }

    #[tokio::test]
    async fn test_scale_is_clamped() {
        let backend = Arc::new(DryRunBackend::new());
        let executor = executor(backend.clone(), Arc::new(LogSink), fast_config());

        let mut record = PolicyRecord::new("scale", "cpu_usage > 80", "scale", "orders", 60);
        record.replicas = Some(25);
        record.max_replicas = Some(4);
        let action = run(&executor, record, &anomaly("orders", "cpu_usage", 95.0)).await;

        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(backend.replicas("orders").await.unwrap(), 4);
        assert_eq!(
            action.details.as_deref(),
            Some("Scaled orders from 1 to 4 replicas")
        );
    }

    #[tokio::test]
    async fn test_alert_uses_channel_and_wildcard_service() {
        let sink = Arc::new(RecordingSink::default());
        let executor = executor(Arc::new(DryRunBackend::new()), sink.clone(), fast_config());

        let action = run(
            &executor,
            PolicyRecord::new("errors", "error_rate > 0.1", "alert", "*", 60),
            &anomaly("payments", "error_rate", 0.4),
        )
        .await;

        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.service, "payments");

        let sent = sink.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "#ops");
        assert!(sent[0].message.starts_with("ALERT: payments - payments.error_rate"));
    }

    #[tokio::test]
    async fn test_alert_failure_is_recorded() {
        let executor = executor(Arc::new(DryRunBackend::new()), Arc::new(FailingSink), fast_config());

        let action = run(
            &executor,
            PolicyRecord::new("cpu", "cpu_usage > 85", "alert", "orders", 180),
            &anomaly("orders", "cpu_usage", 97.0),
        )
        .await;

        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.details.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_claims_are_exclusive() {
        let executor = executor(Arc::new(DryRunBackend::new()), Arc::new(LogSink), fast_config());

        let claim = executor.try_claim("p", "orders").unwrap();
        assert!(executor.try_claim("p", "orders").is_none());
        assert!(executor.try_claim("p", "users").is_some());
        assert_eq!(executor.in_flight(), 1);

        drop(claim);
        assert!(executor.try_claim("p", "orders").is_some());
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_after_grace() {
        let mut config = fast_config();
        config.restart_timeout = Duration::from_secs(60);
        let executor = executor(Arc::new(NeverHealthy), Arc::new(LogSink), config);

        let policy = PolicyRecord::new("restart", "latency > 0.5", "restart_container", "orders", 300)
            .validate()
            .unwrap();
        let request = ActionRequest::from_match(&policy, &anomaly("orders", "latency", 0.9));
        let claim = executor.try_claim("restart", "orders").unwrap();
        let pending = executor
            .dispatch(claim, request.clone(), Utc::now())
            .await
            .unwrap();

        let drained = executor.shutdown(Duration::from_millis(50)).await;
        assert!(!drained);

        let action = executor.history().get(&pending.action_id).await.unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.details.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(executor.in_flight(), 0);

        let claim = executor.try_claim("restart", "orders").unwrap();
        assert_eq!(
            executor.dispatch(claim, request, Utc::now()).await.unwrap_err(),
            ExecutorError::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_shutdown_racing_dispatch_tracks_every_action() {
        let executor = Arc::new(executor(
            Arc::new(DryRunBackend::new()),
            Arc::new(LogSink),
            fast_config(),
        ));
        let policy = PolicyRecord::new("cpu", "cpu_usage > 85", "alert", "*", 180)
            .validate()
            .unwrap();

        let mut dispatches = Vec::new();
        for i in 0..20 {
            let executor = Arc::clone(&executor);
            let request =
                ActionRequest::from_match(&policy, &anomaly(&format!("svc-{}", i), "cpu_usage", 97.0));
            dispatches.push(tokio::spawn(async move {
                let claim = executor
                    .try_claim(&request.policy_name, &request.service)
                    .unwrap();
                executor.dispatch(claim, request, Utc::now()).await
            }));
        }
        tokio::task::yield_now().await;

        assert!(executor.shutdown(Duration::from_secs(5)).await);
        let running_at_drain = executor.history().count_with_status(ActionStatus::Pending).await
            + executor.history().count_with_status(ActionStatus::Executing).await;
        assert_eq!(running_at_drain, 0);

        let mut accepted = 0;
        for handle in dispatches {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert_eq!(e, ExecutorError::ShuttingDown),
            }
        }
        assert_eq!(executor.history().len().await, accepted);
        assert_eq!(
            executor
                .history()
                .count_with_status(ActionStatus::Completed)
                .await,
            accepted
        );
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_quick_actions() {
        let executor = executor(Arc::new(DryRunBackend::new()), Arc::new(LogSink), fast_config());
        let policy = PolicyRecord::new("cpu", "cpu_usage > 85", "alert", "orders", 180)
            .validate()
            .unwrap();
        let request = ActionRequest::from_match(&policy, &anomaly("orders", "cpu_usage", 97.0));
        let claim = executor.try_claim("cpu", "orders").unwrap();
        executor.dispatch(claim, request, Utc::now()).await.unwrap();

        assert!(executor.shutdown(Duration::from_secs(5)).await);
        assert_eq!(
            executor
                .history()
                .count_with_status(ActionStatus::Completed)
                .await,
            1
        );
    }
}
