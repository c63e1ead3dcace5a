//! Locating source videos.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::jobs::JobId;

/// Extensions tried, in order, when looking for a job's video.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm"];

/// Finds the source video for a job.
#[async_trait]
pub trait VideoSource: Send + Sync {
    async fn locate(&self, job_id: &JobId) -> Option<PathBuf>;
}

/// Looks for `<dir>/<job_id>.<ext>`.
#[derive(Debug, Clone)]
pub struct DirectoryVideoSource {
    dir: PathBuf,
}

impl DirectoryVideoSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl VideoSource for DirectoryVideoSource {
    async fn locate(&self, job_id: &JobId) -> Option<PathBuf> {
        for ext in VIDEO_EXTENSIONS {
            let candidate = self.dir.join(format!("{}.{}", job_id, ext));
            if let Ok(meta) = tokio::fs::metadata(&candidate).await {
                if meta.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_locate_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("talk.mkv"), b"video").unwrap();
        std::fs::create_dir(dir.path().join("folder.mp4")).unwrap();

        let source = DirectoryVideoSource::new(dir.path());
        assert_eq!(
            source.locate(&JobId::parse("talk").unwrap()).await,
            Some(dir.path().join("talk.mkv"))
        );
        assert_eq!(source.locate(&JobId::parse("missing").unwrap()).await, None);
        assert_eq!(source.locate(&JobId::parse("folder").unwrap()).await, None);
    }
}
