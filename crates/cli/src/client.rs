//! API client for communicating with the engine API

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success response from the engine
#[derive(Debug, Error)]
#[error("API error ({status}): {body}")]
pub struct ApiError {
    pub status: StatusCode,
    pub body: String,
}

/// API client for the engine
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Full URL for `path` with the given query pairs; empty values are skipped
    pub fn url(&self, path: &str, query: &[(&str, Option<String>)]) -> Result<Url> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        let pairs: Vec<(&str, &String)> = query
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (*k, v)))
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// GET that also accepts 503, for health endpoints reporting a failure
    pub async fn get_health<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::SERVICE_UNAVAILABLE {
            return response.json().await.context("Failed to parse response");
        }
        Self::parse(response).await
    }

    /// Make a POST request without a body
    pub async fn post<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError { status, body }.into());
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub auto_remediation_enabled: bool,
    pub policies_loaded: usize,
    pub policies_enabled: usize,
    pub policies_rejected: usize,
    pub policy_source: String,
    pub actions_executed: usize,
    pub actions_in_flight: usize,
    pub tracked_keys: usize,
    pub phase: String,
    pub last_check: Option<DateTime<Utc>>,
    pub check_interval_secs: u64,
    pub backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

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
    pub severity: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyList {
    pub count: usize,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionList {
    pub count: usize,
    pub predictions: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePredictions {
    pub service: String,
    pub predictions: Vec<Anomaly>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub detected_at: DateTime<Utc>,
    pub records: Vec<Anomaly>,
    pub anomalies: usize,
    pub unavailable: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub condition: String,
    pub action: String,
    pub service: String,
    pub cooldown: u64,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyList {
    pub source: String,
    pub count: usize,
    pub enabled: usize,
    pub policies: Vec<Policy>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub policy_name: String,
    pub service: String,
    pub action: String,
    pub reason: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionList {
    pub count: usize,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMatch {
    pub policy: String,
    pub service: String,
    pub metric: String,
    pub action: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluated_at: DateTime<Utc>,
    pub remediation_enabled: bool,
    pub anomalies: usize,
    pub matches: Vec<PolicyMatch>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub auto_remediation_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_skips_missing_query_values() {
        let client = ApiClient::new("http://localhost:8081").unwrap();

        let url = client
            .url("actions", &[("service", Some("orders".to_string())), ("limit", None)])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8081/actions?service=orders");

        let url = client.url("status", &[]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8081/status");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }

    #[test]
    fn test_match_decision_fields() {
        let json = r#"{"policy":"high_latency_restart","service":"orders","metric":"latency",
            "action":"restart_container","decision":"cooling_down","remaining_secs":120}"#;
        let parsed: PolicyMatch = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.decision, "cooling_down");
        assert_eq!(parsed.remaining_secs, Some(120));
        assert!(parsed.action_id.is_none());
    }
}
