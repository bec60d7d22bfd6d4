//! Autoheal CLI
//!
//! A command-line tool for inspecting anomalies, policies and remediation
//! actions of a running autoheal engine, and for triggering detection and
//! evaluation by hand.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{actions, anomalies, detect, evaluate, health, policies, status, toggle};

/// Autoheal CLI
#[derive(Parser)]
#[command(name = "healctl")]
#[command(author, version, about = "CLI for the Autoheal remediation engine", long_about = None)]
pub struct Cli {
    /// Engine API URL (can also be set via HEALCTL_API_URL env var)
    #[arg(long, env = "HEALCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show engine status
    Status,

    /// List detected anomalies
    Anomalies {
        /// Include records that are not anomalous
        #[arg(long)]
        all: bool,

        /// Filter by service
        #[arg(long, short)]
        service: Option<String>,
    },

    /// Run anomaly detection now
    Detect {
        /// Only check this service
        #[arg(long, short)]
        service: Option<String>,

        /// Only check this metric
        #[arg(long, short)]
        metric: Option<String>,
    },

    /// List loaded remediation policies
    Policies,

    /// Show remediation action history
    Actions {
        /// Filter by service
        #[arg(long, short)]
        service: Option<String>,

        /// Maximum number of actions to show
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Evaluate current anomalies against the policies now
    Evaluate,

    /// Toggle automatic remediation on or off
    Toggle,

    /// Show engine health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = config::Config::load()?;
    let api_url = config::resolve_api_url(cli.api_url, &file_config);
    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Anomalies { all, service } => {
            anomalies::list_anomalies(&client, all, service, cli.format).await?;
        }
        Commands::Detect { service, metric } => {
            detect::run_detection(&client, service, metric, cli.format).await?;
        }
        Commands::Policies => policies::list_policies(&client, cli.format).await?,
        Commands::Actions { service, limit } => {
            actions::list_actions(&client, service, limit, cli.format).await?;
        }
        Commands::Evaluate => evaluate::run_evaluation(&client, cli.format).await?,
        Commands::Toggle => toggle::toggle_remediation(&client, cli.format).await?,
        Commands::Health => health::show_health(&client, cli.format).await?,
    }

    Ok(())
}
