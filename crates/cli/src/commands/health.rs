//! Engine health and readiness

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use crate::client::{ApiClient, HealthResponse, ReadinessResponse};
use crate::output::{color_status, print_header, print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get_health(client.url("healthz", &[])?).await?;
    let readiness: ReadinessResponse = client.get_health(client.url("readyz", &[])?).await?;

    match format {
        OutputFormat::Json => print_json(&json!({
            "health": health,
            "readiness": readiness,
        }))?,
        OutputFormat::Table => {
            print_header("Engine Health");
            println!("Overall:  {}", color_status(&health.status));
            let ready = if readiness.ready { "true" } else { "false" };
            match &readiness.reason {
                Some(reason) => println!("Ready:    {} ({})", color_status(ready), reason),
                None => println!("Ready:    {}", color_status(ready)),
            }
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, c)| ComponentRow {
                    name: name.clone(),
                    status: color_status(&c.status),
                    message: c.message.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows, "No components registered");
        }
    }

    Ok(())
}
