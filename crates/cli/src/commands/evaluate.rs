//! Manual policy evaluation

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, EvaluationReport, PolicyMatch};
use crate::output::{color_status, print_json, print_rows, print_success, print_warning, OutputFormat};

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Note")]
    note: String,
}

fn note(m: &PolicyMatch) -> String {
    if let Some(id) = &m.action_id {
        id.clone()
    } else if let Some(secs) = m.remaining_secs {
        format!("{}s left", secs)
    } else {
        m.reason.clone().unwrap_or_default()
    }
}

/// Evaluate the current anomalies against the policies now
pub async fn run_evaluation(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: EvaluationReport = client.post(client.url("evaluate", &[])?).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if !report.remediation_enabled {
                print_warning("Auto-remediation is disabled; matches were not executed");
            }
            let rows: Vec<MatchRow> = report
                .matches
                .iter()
                .map(|m| MatchRow {
                    policy: m.policy.clone(),
                    service: m.service.clone(),
                    metric: m.metric.clone(),
                    action: m.action.clone(),
                    decision: color_status(&m.decision),
                    note: note(m),
                })
                .collect();
            print_rows(rows, "No policy matched the current anomalies");
            print_success(&format!(
                "{} anomalies evaluated, {} actions dispatched",
                report.anomalies,
                report.actions.len()
            ));
        }
    }

    Ok(())
}
