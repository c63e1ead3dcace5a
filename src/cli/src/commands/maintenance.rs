//! Maintenance commands.
//!
//! Clearing stuck jobs, inspecting dead letters, and server statistics.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum MaintenanceCommands {
    /// Delete every job record still marked as processing
    ClearStuck {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List jobs the stuck-job monitor gave up on
    DeadLetters,

    /// Show worker, queue, and channel statistics
    Stats,
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct ClearStuckResponse {
    cleared: usize,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueuedJob {
    job_id: String,
    channel: String,
    enqueued_at: String,
}

#[derive(Debug, Serialize, Tabled)]
struct DeadLetterRow {
    #[tabled(rename = "Job")]
    job_id: String,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Enqueued")]
    enqueued_at: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueueStats {
    pending: usize,
    enqueued: u64,
    dequeued: u64,
    dead_letter: usize,
}

#[derive(Debug, Deserialize, Serialize)]
struct SystemStats {
    store_backend: String,
    queue_backend: String,
    queue: QueueStats,
    channels: Vec<String>,
    worker_running: bool,
    jobs_processed: u64,
    jobs_succeeded: u64,
    jobs_failed: u64,
    jobs_skipped: u64,
    jobs_active: u64,
    scheduled_deliveries: usize,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(
    cmd: MaintenanceCommands,
    client: &ApiClient,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        MaintenanceCommands::ClearStuck { force } => {
            if !force {
                output::print_info(
                    "This deletes every job still marked as processing, including running ones. Use --force to confirm.",
                );
                return Ok(());
            }

            let resp: ClearStuckResponse = client
                .post("/api/v1/maintenance/clear-stuck", &serde_json::json!({}))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Cleared {} stuck job(s)", resp.cleared));
                }
                _ => output::print_item(&resp, format)?,
            }
        }

        MaintenanceCommands::DeadLetters => {
            let jobs: Vec<QueuedJob> = client.get("/api/v1/maintenance/dead-letters").await?;

            match format {
                OutputFormat::Table => {
                    let rows: Vec<DeadLetterRow> = jobs
                        .into_iter()
                        .map(|j| DeadLetterRow {
                            job_id: j.job_id,
                            channel: j.channel,
                            enqueued_at: output::format_timestamp(&j.enqueued_at),
                        })
                        .collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&jobs, format)?,
            }
        }

        MaintenanceCommands::Stats => {
            let stats: SystemStats = client.get("/api/v1/stats").await?;

            match format {
                OutputFormat::Table => {
                    output::print_header("System Statistics");
                    output::print_detail("Store", &stats.store_backend);
                    output::print_detail("Queue", &stats.queue_backend);
                    output::print_detail("Channels", &stats.channels.join(", "));
                    output::print_detail(
                        "Worker",
                        if stats.worker_running { "running" } else { "stopped" },
                    );
                    output::print_detail(
                        "Jobs",
                        &format!(
                            "{} processed, {} succeeded, {} failed, {} skipped, {} active",
                            stats.jobs_processed,
                            stats.jobs_succeeded,
                            stats.jobs_failed,
                            stats.jobs_skipped,
                            stats.jobs_active
                        ),
                    );
                    output::print_detail(
                        "Queue Depth",
                        &format!(
                            "{} pending, {} dead-lettered",
                            stats.queue.pending, stats.queue.dead_letter
                        ),
                    );
                    output::print_detail(
                        "Deliveries",
                        &format!(
                            "{} enqueued, {} dequeued, {} scheduled",
                            stats.queue.enqueued,
                            stats.queue.dequeued,
                            stats.scheduled_deliveries
                        ),
                    );
                }
                _ => output::print_item(&stats, format)?,
            }
        }
    }

    Ok(())
}
