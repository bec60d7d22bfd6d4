//! Remediation switch

use anyhow::Result;

use crate::client::{ApiClient, ToggleResponse};
use crate::output::{print_json, print_success, print_warning, OutputFormat};

pub async fn toggle_remediation(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result: ToggleResponse = client.post(client.url("toggle", &[])?).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table if result.auto_remediation_enabled => {
            print_success("Auto-remediation enabled")
        }
        OutputFormat::Table => print_warning("Auto-remediation disabled; matches are only reported"),
    }

    Ok(())
}
