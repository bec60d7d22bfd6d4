//! Anomaly and prediction listing

use anyhow::Result;
use reqwest::StatusCode;
use tabled::Tabled;

use crate::client::{Anomaly, AnomalyList, ApiClient, ApiError, PredictionList, ServicePredictions};
use crate::output::{
    color_status, format_confidence, format_timestamp, format_value, print_info, print_json,
    print_rows, OutputFormat,
};

/// Row for the anomalies table
#[derive(Tabled)]
pub struct AnomalyRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Z")]
    z_score: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Time")]
    timestamp: String,
}

impl From<&Anomaly> for AnomalyRow {
    fn from(a: &Anomaly) -> Self {
        let expected = if a.status == "insufficient_history" {
            "warming up".to_string()
        } else {
            format!(
                "{} .. {}",
                format_value(a.expected_range.min),
                format_value(a.expected_range.max)
            )
        };
        Self {
            service: a.service.clone(),
            metric: a.metric.clone(),
            value: format_value(a.current_value),
            expected,
            z_score: format!("{:.2}", a.z_score),
            severity: color_status(&a.severity),
            confidence: format_confidence(a.confidence),
            timestamp: format_timestamp(&a.timestamp),
        }
    }
}

/// Print detection records as a table
pub fn print_anomalies(records: &[Anomaly], empty_message: &str) {
    let rows: Vec<AnomalyRow> = records.iter().map(AnomalyRow::from).collect();
    print_rows(rows, empty_message);
}

/// List current anomalies, or every latest record with `all`
pub async fn list_anomalies(
    client: &ApiClient,
    all: bool,
    service: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let mut records = match &service {
        Some(service) => {
            let url = client.url(&format!("predictions/{}", service), &[])?;
            match client.get::<ServicePredictions>(url).await {
                Ok(result) => result.predictions,
                Err(e) => match e.downcast_ref::<ApiError>() {
                    Some(api) if api.status == StatusCode::NOT_FOUND => Vec::new(),
                    _ => return Err(e),
                },
            }
        }
        None if all => {
            let result: PredictionList = client.get(client.url("predictions", &[])?).await?;
            result.predictions
        }
        None => {
            let result: AnomalyList = client.get(client.url("anomalies", &[])?).await?;
            result.anomalies
        }
    };

    if !all {
        records.retain(|a| a.is_anomaly);
    }

    match format {
        OutputFormat::Json => print_json(&records)?,
        OutputFormat::Table => {
            let empty = match &service {
                Some(service) => format!("No anomalies for {}", service),
                None => "No anomalies detected".to_string(),
            };
            print_anomalies(&records, &empty);
            if !records.is_empty() {
                print_info(&format!("Total: {} records", records.len()));
            }
        }
    }

    Ok(())
}
