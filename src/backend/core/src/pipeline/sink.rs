//! Transcript persistence.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::jobs::JobId;

/// Stores a finished transcript and its subtitles.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn save(&self, job_id: &JobId, text: &str, vtt: &str) -> std::io::Result<()>;
}

/// Writes `<job_id>.txt` and `<job_id>.vtt` into a directory.
#[derive(Debug, Clone)]
pub struct FsTranscriptSink {
    dir: PathBuf,
}

impl FsTranscriptSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn text_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.txt", job_id))
    }

    pub fn vtt_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.vtt", job_id))
    }
}

#[async_trait]
impl TranscriptSink for FsTranscriptSink {
    async fn save(&self, job_id: &JobId, text: &str, vtt: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.text_path(job_id), text).await?;
        tokio::fs::write(self.vtt_path(job_id), vtt).await?;
        Ok(())
    }
}
