//! Manual detection command

use anyhow::Result;

use super::anomalies::print_anomalies;
use crate::client::{ApiClient, DetectionReport};
use crate::output::{print_json, print_success, print_warning, OutputFormat};

/// Run detection now, optionally restricted to a service or metric
pub async fn run_detection(
    client: &ApiClient,
    service: Option<String>,
    metric: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let url = client.url("detect/manual", &[("service", service), ("metric", metric)])?;
    let report: DetectionReport = client.post(url).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_anomalies(&report.records, "No metric values available");
            if !report.unavailable.is_empty() {
                print_warning(&format!("Unavailable: {}", report.unavailable.join(", ")));
            }
            print_success(&format!(
                "Checked {} keys, {} anomalies",
                report.records.len(),
                report.anomalies
            ));
        }
    }

    Ok(())
}
