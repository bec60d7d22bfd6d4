//! Remediation action history

use anyhow::Result;
use tabled::Tabled;

use crate::client::{Action, ActionList, ApiClient};
use crate::output::{color_status, format_timestamp, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
pub struct ActionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Details")]
    details: String,
}

impl From<&Action> for ActionRow {
    fn from(a: &Action) -> Self {
        Self {
            id: a.action_id.clone(),
            policy: a.policy_name.clone(),
            service: a.service.clone(),
            action: a.action.clone(),
            status: color_status(&a.status),
            timestamp: format_timestamp(&a.timestamp),
            details: a.details.clone().unwrap_or_default(),
        }
    }
}

/// List actions, newest first
pub async fn list_actions(
    client: &ApiClient,
    service: Option<String>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let url = client.url(
        "actions",
        &[("service", service), ("limit", limit.map(|l| l.to_string()))],
    )?;
    let result: ActionList = client.get(url).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let rows: Vec<ActionRow> = result.actions.iter().map(ActionRow::from).collect();
            print_rows(rows, "No actions recorded");
        }
    }

    Ok(())
}
