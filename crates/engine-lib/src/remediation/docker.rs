//! Docker Engine HTTP API backend

use super::RemediationBackend;
use crate::error::BackendError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Seconds Docker waits for a container to stop before killing it
const STOP_TIMEOUT_SECS: u32 = 10;

/// Restarts containers through a Docker daemon reachable over TCP.
///
/// A service maps to the first container whose name matches it. Plain
/// Docker has no replica concept, so scaling is unsupported.
pub struct DockerBackend {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    state: ContainerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

impl ContainerState {
    /// Healthcheck status when the image defines one, running state otherwise
    fn is_healthy(&self) -> bool {
        match &self.health {
            Some(health) => health.status == "healthy",
            None => self.running,
        }
    }
}

impl DockerBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let base_url = Url::parse(base_url).context("Invalid Docker URL")?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Request(e.to_string()))
    }

    async fn container_id(&self, service: &str) -> Result<String, BackendError> {
        let filters = serde_json::json!({ "name": [service] }).to_string();
        let response = self
            .client
            .get(self.endpoint("containers/json")?)
            .query(&[("filters", filters.as_str())])
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let containers: Vec<ContainerSummary> =
            response.json().await.map_err(request_error)?;
        containers
            .into_iter()
            .next()
            .map(|c| c.id)
            .ok_or_else(|| BackendError::NotFound(service.to_string()))
    }
}

fn request_error(e: reqwest::Error) -> BackendError {
    BackendError::Request(e.to_string())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemediationBackend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn restart(&self, service: &str) -> Result<(), BackendError> {
        let id = self.container_id(service).await?;
        let response = self
            .client
            .post(self.endpoint(&format!("containers/{}/restart", id))?)
            .query(&[("t", STOP_TIMEOUT_SECS)])
            .send()
            .await
            .map_err(request_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(service.to_string()));
        }
        check_status(response).await?;

        info!(service = %service, container_id = %id, "Restarted container");
        Ok(())
    }

    async fn is_healthy(&self, service: &str) -> Result<bool, BackendError> {
        let id = self.container_id(service).await?;
        let response = self
            .client
            .get(self.endpoint(&format!("containers/{}/json", id))?)
            .send()
            .await
            .map_err(request_error)?;
        let inspect: ContainerInspect = check_status(response)
            .await?
            .json()
            .await
            .map_err(request_error)?;

        let healthy = inspect.state.is_healthy();
        debug!(service = %service, healthy = healthy, "Polled container health");
        Ok(healthy)
    }

    async fn replicas(&self, _service: &str) -> Result<u32, BackendError> {
        Err(BackendError::Unsupported {
            operation: "replica lookup",
            backend: "docker",
        })
    }

    async fn scale(&self, _service: &str, _replicas: u32) -> Result<u32, BackendError> {
        Err(BackendError::Unsupported {
            operation: "scaling",
            backend: "docker",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_from_inspect() {
        let with_check: ContainerInspect = serde_json::from_str(
            r#"{"State":{"Running":true,"Health":{"Status":"starting"}}}"#,
        )
        .unwrap();
        assert!(!with_check.state.is_healthy());

        let healthy: ContainerInspect = serde_json::from_str(
            r#"{"State":{"Running":true,"Health":{"Status":"healthy"}}}"#,
        )
        .unwrap();
        assert!(healthy.state.is_healthy());

        let no_check: ContainerInspect =
            serde_json::from_str(r#"{"State":{"Running":true}}"#).unwrap();
        assert!(no_check.state.is_healthy());

        let stopped: ContainerInspect =
            serde_json::from_str(r#"{"State":{"Running":false}}"#).unwrap();
        assert!(!stopped.state.is_healthy());
    }

    #[tokio::test]
    async fn test_scaling_unsupported() {
        let backend = DockerBackend::new("http://localhost:2375", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            backend.scale("orders", 2).await,
            Err(BackendError::Unsupported { .. })
        ));
        assert_eq!(
            backend.endpoint("containers/json").unwrap().as_str(),
            "http://localhost:2375/containers/json"
        );
    }

    #[test]
    fn test_invalid_url() {
        assert!(DockerBackend::new("not a url", Duration::from_secs(1)).is_err());
    }
}
