//! Autoheal engine - metric anomaly detection and policy remediation
//!
//! Polls service metrics from Prometheus, flags statistical anomalies and
//! runs the configured remediation policies against the affected services.

use anyhow::Result;
use engine_lib::{
    api,
    collector::{default_targets, PrometheusGateway},
    health::HealthRegistry,
    observability::StructuredLogger,
    policy::PolicyStore,
    remediation::{
        DockerBackend, DryRunBackend, LogSink, NotificationSink, RemediationBackend, WebhookSink,
    },
    Engine, EvaluationLoop,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::{BackendKind, EngineSettings};

const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting autoheal-engine");

    let settings = EngineSettings::load()?;
    info!(
        prometheus_url = %settings.prometheus_url,
        backend = ?settings.backend,
        policies_path = %settings.policies_path.display(),
        "Engine configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_engine_components().await;

    let policies = PolicyStore::from_file(&settings.policies_path);
    let policy_count = policies.0.len();

    let engine_config = settings.engine_config();
    let gateway = Arc::new(PrometheusGateway::new(
        &settings.prometheus_url,
        engine_config.fetch_timeout,
    )?);

    let backend: Arc<dyn RemediationBackend> = match settings.backend {
        BackendKind::Docker => Arc::new(DockerBackend::new(
            &settings.docker_url,
            Duration::from_secs(settings.restart_timeout_secs),
        )?),
        BackendKind::DryRun => Arc::new(DryRunBackend::new()),
    };

    let sink: Arc<dyn NotificationSink> = match &settings.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone(), engine_config.executor.alert_timeout)?),
        None => Arc::new(LogSink),
    };

    let logger = StructuredLogger::new("autoheal-engine");
    let engine = Arc::new(
        Engine::builder()
            .gateway(gateway)
            .targets(default_targets())
            .policies(policies)
            .backend(backend)
            .sink(sink)
            .health(health_registry.clone())
            .logger(logger.clone())
            .config(engine_config)
            .build()?,
    );
    logger.log_startup(ENGINE_VERSION, policy_count, engine.remediation_enabled());

    let (shutdown_tx, _) = broadcast::channel(1);

    // The loop marks the engine ready once it starts ticking
    let loop_handle = tokio::spawn(EvaluationLoop::new(engine.clone()).run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(engine.clone()));
    let api_handle = tokio::spawn(api::serve(settings.api_port, app_state));

    let reason = shutdown_signal().await?;
    info!(reason = reason, "Shutting down");

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Evaluation loop terminated abnormally");
    }

    let drained = engine.shutdown().await;
    if !drained {
        info!("Cancelled running actions after the shutdown grace period");
    }
    api_handle.abort();

    logger.log_shutdown(reason);
    Ok(())
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT received")
        }
        _ = terminate.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("SIGINT received")
}
