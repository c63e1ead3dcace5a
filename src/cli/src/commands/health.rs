//! Health check command.
//!
//! Queries the `/health` endpoint and displays store reachability.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include store details
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: serde_json::Value = client.get_raw("/health").await?;
    let health = response.get("data").cloned().unwrap_or(serde_json::Value::Null);

    match format {
        OutputFormat::Table => {
            let status = health
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");

            output::print_header("System Health");
            output::print_detail("Status", status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }

            if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
                output::print_detail("Timestamp", ts);
            }

            if args.detailed {
                if let Some(store) = health.get("store") {
                    output::print_header("Store");
                    let backend = store.get("backend").and_then(|v| v.as_str()).unwrap_or("?");
                    let reachable = store
                        .get("reachable")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    output::print_detail("Backend", backend);
                    output::print_detail("Reachable", if reachable { "yes" } else { "no" });
                    if let Some(error) = store.get("error").and_then(|v| v.as_str()) {
                        output::print_detail("Error", error);
                    }
                }
            }

            if status == "healthy" {
                output::print_success("All systems operational");
            } else {
                output::print_error(&format!("System status: {}", status));
            }
        }
        _ => output::print_item(&health, format)?,
    }

    Ok(())
}
