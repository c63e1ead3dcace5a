//! Single job commands.
//!
//! Provides dispatch and status operations for transcription jobs.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Dispatch a job for background transcription
    Dispatch {
        /// Job ID (the video identifier)
        job_id: String,
    },

    /// Get job status
    Status {
        /// Job ID
        job_id: String,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct DispatchReceipt {
    job_id: String,
    accepted: bool,
    #[serde(default)]
    channels_fired: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobStatus {
    job_id: String,
    state: String,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bulk_id: Option<String>,
    #[serde(default)]
    attempt: u32,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Dispatch { job_id } => {
            let receipt: DispatchReceipt = client
                .post(
                    &format!("/api/v1/jobs/{}/dispatch", job_id),
                    &serde_json::json!({}),
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    if receipt.accepted {
                        output::print_success(&format!("Job {} dispatched", receipt.job_id));
                        output::print_detail("Channels", &receipt.channels_fired.join(", "));
                    } else {
                        output::print_error(&format!(
                            "Job {} rejected: no video source found",
                            receipt.job_id
                        ));
                    }
                }
                _ => output::print_item(&receipt, format)?,
            }
        }

        JobCommands::Status { job_id } => {
            let status: JobStatus = client.get(&format!("/api/v1/jobs/{}", job_id)).await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Job: {}", status.job_id));
                    output::print_detail("State", &output::colored_state(&status.state).to_string());
                    output::print_detail("Message", &status.message);
                    if let Some(started) = &status.started_at {
                        output::print_detail("Started", &output::format_timestamp(started));
                    }
                    if let Some(completed) = &status.completed_at {
                        output::print_detail("Completed", &output::format_timestamp(completed));
                    }
                    if let Some(failed) = &status.failed_at {
                        output::print_detail("Failed", &output::format_timestamp(failed));
                    }
                    if let Some(bulk) = &status.bulk_id {
                        output::print_detail("Bulk", bulk);
                    }
                    output::print_detail("Attempts", &status.attempt.to_string());
                }
                _ => output::print_item(&status, format)?,
            }
        }
    }

    Ok(())
}
