//! Audio extraction.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Error type for audio conversion.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts an audio track from a video.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    /// Write the audio of `video` to `output`.
    async fn convert(&self, video: &Path, output: &Path) -> Result<(), ConvertError>;
}

/// Runs `ffmpeg` to produce 16 kHz mono MP3.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    binary: PathBuf,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegConverter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, video: &Path, output: &Path) -> Result<(), ConvertError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let result = tokio::process::Command::new(&self.binary)
            .args(["-nostdin", "-loglevel", "error", "-y", "-i"])
            .arg(video)
            .args(["-vn", "-ac", "1", "-ar", "16000", "-b:a", "64k"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ConvertError::NotFound)?;

        if !result.status.success() {
            return Err(ConvertError::ExecutionFailed {
                exit_code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        tracing::debug!(video = %video.display(), audio = %output.display(), "Audio extracted");
        Ok(())
    }
}

/// Check a converted file exists and is not empty.
pub async fn validate_audio(path: &Path) -> Result<u64, String> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        Ok(_) => Err(format!("Audio file validation failed: {} is empty", path.display())),
        Err(e) => Err(format!(
            "Audio file validation failed: {} is unreadable ({})",
            path.display(),
            e
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let converter = FfmpegConverter::new(dir.path().join("no-such-ffmpeg"));
        let error = converter
            .convert(&dir.path().join("in.mp4"), &dir.path().join("out.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(error, ConvertError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_validate_audio() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.mp3");
        let full = dir.path().join("full.mp3");
        std::fs::write(&empty, b"").unwrap();
        std::fs::write(&full, b"ID3").unwrap();

        assert_eq!(validate_audio(&full).await, Ok(3));
        assert!(validate_audio(&empty)
            .await
            .unwrap_err()
            .starts_with("Audio file validation failed"));
        assert!(validate_audio(&dir.path().join("absent.mp3")).await.is_err());
    }
}
