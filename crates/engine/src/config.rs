//! Engine process configuration

use anyhow::{Context, Result};
use engine_lib::anomaly::{DetectorConfig, DEFAULT_SENSITIVITY};
use engine_lib::remediation::ExecutorConfig;
use engine_lib::EngineConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Where remediation actions are carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Docker,
    DryRun,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// API server port for health, metrics and control
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prometheus server queried for metric values
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Defaults to the window size
    #[serde(default)]
    pub min_samples: Option<usize>,

    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    #[serde(default)]
    pub warning_z: Option<f64>,

    #[serde(default)]
    pub critical_z: Option<f64>,

    #[serde(default = "default_policies_path")]
    pub policies_path: PathBuf,

    #[serde(default = "default_true")]
    pub auto_remediation_enabled: bool,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_restart_timeout")]
    pub restart_timeout_secs: u64,

    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval_ms: u64,

    #[serde(default = "default_alert_timeout")]
    pub alert_timeout_secs: u64,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Docker Engine API endpoint
    #[serde(default = "default_docker_url")]
    pub docker_url: String,

    /// Alertmanager-compatible webhook; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_alert_channel")]
    pub alert_channel: String,

    #[serde(default = "default_history_limit")]
    pub prediction_history_limit: usize,
}

fn default_api_port() -> u16 {
    8081
}

fn default_prometheus_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_check_interval() -> u64 {
    30
}

fn default_window_size() -> usize {
    engine_lib::anomaly::DEFAULT_WINDOW_SIZE
}

fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY
}

fn default_policies_path() -> PathBuf {
    PathBuf::from("/app/policies.yml")
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_restart_timeout() -> u64 {
    60
}

fn default_health_poll_interval() -> u64 {
    1000
}

fn default_alert_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_backend() -> BackendKind {
    BackendKind::DryRun
}

fn default_docker_url() -> String {
    "http://localhost:2375".to_string()
}

fn default_alert_channel() -> String {
    "#ops".to_string()
}

fn default_history_limit() -> usize {
    engine_lib::anomaly::DEFAULT_HISTORY_LIMIT
}

impl EngineSettings {
    /// Load configuration from environment and the optional config file
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("ENGINE_CONFIG_FILE") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("ENGINE").try_parsing(true))
            .build()
            .context("Failed to read engine configuration")?;

        Self::from_config(config)
    }

    /// Deserialize and check settings from already merged sources
    pub fn from_config(config: config::Config) -> Result<Self> {
        let settings: Self = config
            .try_deserialize()
            .context("Invalid engine configuration")?;
        settings
            .engine_config()
            .validate()
            .context("Invalid engine configuration")?;
        Ok(settings)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            auto_remediation_enabled: self.auto_remediation_enabled,
            detector: DetectorConfig {
                window_size: self.window_size,
                min_samples: self.min_samples.unwrap_or(self.window_size),
                sensitivity: self.sensitivity,
                warning_z: self.warning_z,
                critical_z: self.critical_z,
            },
            history_limit: self.prediction_history_limit,
            executor: ExecutorConfig {
                restart_timeout: Duration::from_secs(self.restart_timeout_secs),
                health_poll_interval: Duration::from_millis(self.health_poll_interval_ms),
                alert_timeout: Duration::from_secs(self.alert_timeout_secs),
                default_channel: self.alert_channel.clone(),
            },
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(overrides: &[(&str, &str)]) -> Result<EngineSettings> {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }
        EngineSettings::from_config(builder.build()?)
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.api_port, 8081);
        assert_eq!(settings.check_interval_secs, 30);
        assert_eq!(settings.backend, BackendKind::DryRun);

        let engine = settings.engine_config();
        assert_eq!(engine.detector.min_samples, engine.detector.window_size);
    }

    #[test]
    fn test_zero_check_interval_is_rejected() {
        let err = settings(&[("check_interval_secs", "0")]).unwrap_err();
        assert!(format!("{:#}", err).contains("check interval"));
    }

    #[test]
    fn test_min_samples_above_window_is_rejected() {
        assert!(settings(&[("window_size", "5"), ("min_samples", "10")]).is_err());
        assert!(settings(&[("window_size", "5"), ("min_samples", "5")]).is_ok());
    }

    #[test]
    fn test_negative_sensitivity_is_rejected() {
        assert!(settings(&[("sensitivity", "-1.0")]).is_err());
    }
}
