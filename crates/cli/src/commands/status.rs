//! Engine status command

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, EngineStatus};
use crate::output::{color_status, format_timestamp, print_header, print_json, OutputFormat};

/// Show the engine's remediation switch, policy counts and loop state
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: EngineStatus = client.get(client.url("status", &[])?).await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            let remediation = if status.auto_remediation_enabled {
                "enabled"
            } else {
                "disabled"
            };
            let last_check = status
                .last_check
                .as_ref()
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string());

            print_header("Engine Status");
            println!("Auto-remediation:   {}", color_status(remediation));
            println!("Backend:            {}", status.backend.cyan());
            println!("Phase:              {}", status.phase);
            println!("Last check:         {}", last_check);
            println!("Check interval:     {}s", status.check_interval_secs);
            println!("Tracked keys:       {}", status.tracked_keys);
            println!();
            println!("{}", "Policies".bold());
            println!("{}", "-".repeat(50));
            println!(
                "Loaded:             {} ({} enabled) from {}",
                status.policies_loaded, status.policies_enabled, status.policy_source
            );
            if status.policies_rejected > 0 {
                println!(
                    "Rejected:           {}",
                    status.policies_rejected.to_string().red()
                );
            }
            println!();
            println!("{}", "Actions".bold());
            println!("{}", "-".repeat(50));
            println!("Executed:           {}", status.actions_executed);
            println!("In flight:          {}", status.actions_in_flight);
        }
    }

    Ok(())
}
