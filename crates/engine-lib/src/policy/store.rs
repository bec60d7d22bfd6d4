//! Loading and lookup of validated policies

use super::{Policy, PolicyRecord};
use crate::error::PolicyError;
use crate::models::Anomaly;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of loading a policy set
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Where the policies came from
    pub source: String,
    pub loaded: usize,
    /// One entry per record that was skipped
    pub rejected: Vec<PolicyError>,
}

/// Immutable set of policies loaded at startup
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: Vec<Arc<Policy>>,
}

/// Built-in policy set used when no policy file is present
pub fn default_policies() -> Vec<PolicyRecord> {
    vec![
        PolicyRecord::new(
            "high_latency_restart",
            "latency > 0.5",
            "restart_container",
            "orders",
            300,
        ),
        PolicyRecord::new("high_cpu_alert", "cpu_usage > 85", "alert", "orders", 180),
        PolicyRecord::new(
            "high_error_rate_restart",
            "error_rate > 0.1",
            "restart_container",
            "payments",
            300,
        ),
        PolicyRecord::new(
            "users_latency_restart",
            "latency > 0.5",
            "restart_container",
            "users",
            300,
        ),
    ]
}

impl PolicyStore {
    /// Validate each record independently; invalid records are logged and skipped
    pub fn load(records: impl IntoIterator<Item = PolicyRecord>) -> (Self, LoadReport) {
        Self::ingest("records", records.into_iter().map(Ok))
    }

    /// Deserialize and validate raw configuration values one by one
    pub fn load_values(values: Vec<config::Value>) -> (Self, LoadReport) {
        let records = values.into_iter().enumerate().map(|(index, value)| {
            value
                .try_deserialize::<PolicyRecord>()
                .map_err(|e| PolicyError::Record {
                    index,
                    reason: e.to_string(),
                })
        });
        Self::ingest("records", records)
    }

    /// Load the `policies` list from a YAML/TOML/JSON file.
    ///
    /// A missing file yields the built-in defaults; an unreadable file is
    /// logged and also yields the defaults, so startup never aborts here.
    pub fn from_file(path: &Path) -> (Self, LoadReport) {
        if !path.exists() {
            warn!(path = %path.display(), "Policies file not found, using default policies");
            return Self::defaults();
        }

        let values = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .and_then(|cfg| cfg.get_array("policies"));

        match values {
            Ok(values) => {
                let (store, mut report) = Self::load_values(values);
                report.source = path.display().to_string();
                info!(
                    path = %path.display(),
                    loaded = report.loaded,
                    rejected = report.rejected.len(),
                    "Loaded policies"
                );
                (store, report)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to read policies file, using default policies");
                Self::defaults()
            }
        }
    }

    pub fn defaults() -> (Self, LoadReport) {
        let (store, mut report) = Self::load(default_policies());
        report.source = "defaults".to_string();
        (store, report)
    }

    fn ingest(
        source: &str,
        records: impl Iterator<Item = Result<PolicyRecord, PolicyError>>,
    ) -> (Self, LoadReport) {
        let mut policies = Vec::new();
        let mut names = HashSet::new();
        let mut report = LoadReport {
            source: source.to_string(),
            ..Default::default()
        };

        for record in records {
            let validated = record.and_then(PolicyRecord::validate).and_then(|policy| {
                if names.insert(policy.name.clone()) {
                    Ok(policy)
                } else {
                    Err(PolicyError::Duplicate { name: policy.name })
                }
            });

            match validated {
                Ok(policy) => policies.push(Arc::new(policy)),
                Err(e) => {
                    warn!(
                        event = "policy_rejected",
                        policy = e.policy_name().unwrap_or("<unnamed>"),
                        error = %e,
                        "Skipping invalid policy"
                    );
                    report.rejected.push(e);
                }
            }
        }

        report.loaded = policies.len();
        (Self { policies }, report)
    }

    pub fn list(&self) -> &[Arc<Policy>] {
        &self.policies
    }

    pub fn get(&self, name: &str) -> Option<Arc<Policy>> {
        self.policies.iter().find(|p| p.name == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.policies.iter().filter(|p| p.enabled).count()
    }

    /// Policies matching `anomaly`, in load order
    pub fn matching<'a>(&'a self, anomaly: &'a Anomaly) -> impl Iterator<Item = &'a Arc<Policy>> {
        self.policies.iter().filter(move |p| p.matches(anomaly))
    }
}
