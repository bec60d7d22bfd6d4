//! Prometheus instant-query gateway

use super::{async_trait, MetricTarget, MetricsGateway};
use crate::error::GatewayError;
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Pulls current values through `GET /api/v1/query`
pub struct PrometheusGateway {
    client: Client,
    query_url: Url,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    /// `[unix_timestamp, "value"]`
    value: (f64, String),
}

impl PrometheusGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let query_url = Url::parse(base_url)
            .and_then(|base| base.join("api/v1/query"))
            .context("Invalid Prometheus URL")?;

        Ok(Self { client, query_url })
    }

    pub fn query_url(&self) -> &Url {
        &self.query_url
    }

    fn parse_value(target: &MetricTarget, body: QueryResponse) -> Result<f64, GatewayError> {
        let unavailable = || GatewayError::Unavailable {
            key: target.key().to_string(),
        };

        if body.status != "success" {
            return Err(unavailable());
        }

        let first = body
            .data
            .and_then(|data| data.result.into_iter().next())
            .ok_or_else(unavailable)?;

        let value: f64 = first.value.1.parse().map_err(|_| unavailable())?;
        // NaN is how Prometheus reports e.g. a rate over an empty range
        if value.is_finite() {
            Ok(value)
        } else {
            Err(unavailable())
        }
    }
}

#[async_trait]
impl MetricsGateway for PrometheusGateway {
    async fn fetch(&self, target: &MetricTarget) -> Result<f64, GatewayError> {
        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", target.query.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout {
                        key: target.key().to_string(),
                    }
                } else {
                    GatewayError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(GatewayError::Request(format!(
                "Prometheus returned {}",
                response.status()
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Self::parse_value(target, body)
    }
}
