//! Policy listing

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, PolicyList};
use crate::output::{color_status, print_info, print_json, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct PolicyRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Condition")]
    condition: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Cooldown")]
    cooldown: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
}

pub async fn list_policies(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result: PolicyList = client.get(client.url("policies", &[])?).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let rows: Vec<PolicyRow> = result
                .policies
                .iter()
                .map(|p| PolicyRow {
                    name: p.name.clone(),
                    condition: p.condition.clone(),
                    action: p.action.clone(),
                    service: p.service.clone(),
                    cooldown: format!("{}s", p.cooldown),
                    enabled: color_status(if p.enabled { "enabled" } else { "disabled" }),
                })
                .collect();
            print_rows(rows, "No policies loaded");

            for rejected in &result.rejected {
                print_warning(&format!("Rejected: {}", rejected));
            }
            print_info(&format!(
                "{} policies ({} enabled) from {}",
                result.count, result.enabled, result.source
            ));
        }
    }

    Ok(())
}
