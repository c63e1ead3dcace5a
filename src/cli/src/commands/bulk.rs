//! Bulk operation commands.
//!
//! `submit --watch` polls the bulk record and renders a progress bar until
//! every member has been counted.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkKind {
    /// Members run one after another
    Download,
    /// Members run in parallel
    Transcribe,
}

#[derive(Subcommand)]
pub enum BulkCommands {
    /// Submit a bulk operation
    Submit {
        /// Bulk type
        #[arg(short = 't', long = "type", value_enum)]
        kind: BulkKind,

        /// Job IDs to include
        #[arg(required = true)]
        job_ids: Vec<String>,

        /// Follow progress until the bulk completes
        #[arg(short, long)]
        watch: bool,

        /// Polling interval in seconds when watching
        #[arg(long, default_value = "2")]
        interval: u64,
    },

    /// Get bulk operation status
    Status {
        /// Bulk ID
        bulk_id: String,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SubmitBulkRequest {
    job_ids: Vec<String>,
    #[serde(rename = "type")]
    kind: BulkKind,
}

#[derive(Debug, Deserialize, Serialize)]
struct SubmitBulkResponse {
    bulk_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct BulkOperation {
    bulk_id: String,
    #[serde(rename = "type")]
    kind: String,
    job_ids: Vec<String>,
    total: usize,
    completed: usize,
    failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_job_id: Option<String>,
    status: String,
    #[serde(default)]
    errors: BTreeMap<String, String>,
    started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
}

impl BulkOperation {
    fn is_done(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ErrorRow {
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Error")]
    error: String,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: BulkCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        BulkCommands::Submit {
            kind,
            job_ids,
            watch,
            interval,
        } => {
            let body = SubmitBulkRequest { job_ids, kind };
            let resp: SubmitBulkResponse = client.post("/api/v1/bulk", &body).await?;

            if !watch {
                match format {
                    OutputFormat::Table => {
                        output::print_success("Bulk operation submitted");
                        output::print_detail("Bulk ID", &resp.bulk_id);
                    }
                    _ => output::print_item(&resp, format)?,
                }
                return Ok(());
            }

            let bulk = watch_bulk(client, &resp.bulk_id, Duration::from_secs(interval.max(1))).await?;
            print_bulk(&bulk, format)?;
        }

        BulkCommands::Status { bulk_id } => {
            let bulk: BulkOperation = client.get(&format!("/api/v1/bulk/{}", bulk_id)).await?;
            print_bulk(&bulk, format)?;
        }
    }

    Ok(())
}

async fn watch_bulk(client: &ApiClient, bulk_id: &str, interval: Duration) -> Result<BulkOperation> {
    let path = format!("/api/v1/bulk/{}", bulk_id);
    let mut bulk: BulkOperation = client.get(&path).await?;

    let bar = ProgressBar::new(bulk.total as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    loop {
        bar.set_position((bulk.completed + bulk.failed) as u64);
        bar.set_message(match &bulk.current_job_id {
            Some(current) => format!("{} failed, current {}", bulk.failed, current),
            None => format!("{} failed", bulk.failed),
        });

        if bulk.is_done() {
            break;
        }

        tokio::time::sleep(interval).await;
        bulk = client.get(&path).await?;
    }

    bar.finish_and_clear();
    Ok(bulk)
}

fn print_bulk(bulk: &BulkOperation, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            output::print_header(&format!("Bulk: {}", bulk.bulk_id));
            output::print_detail("Type", &bulk.kind);
            output::print_detail("Status", &output::colored_state(&bulk.status).to_string());
            output::print_detail(
                "Progress",
                &format!(
                    "{} completed, {} failed of {}",
                    bulk.completed, bulk.failed, bulk.total
                ),
            );
            if let Some(current) = &bulk.current_job_id {
                output::print_detail("Current", current);
            }
            output::print_detail("Started", &output::format_timestamp(&bulk.started_at));
            if let Some(completed) = &bulk.completed_at {
                output::print_detail("Completed", &output::format_timestamp(completed));
            }

            if !bulk.errors.is_empty() {
                output::print_header("Errors");
                let rows: Vec<ErrorRow> = bulk
                    .errors
                    .iter()
                    .map(|(job_id, error)| ErrorRow {
                        job_id: job_id.clone(),
                        error: error.clone(),
                    })
                    .collect();
                output::print_list(&rows, format)?;
            }
            Ok(())
        }
        _ => output::print_item(bulk, format),
    }
}
