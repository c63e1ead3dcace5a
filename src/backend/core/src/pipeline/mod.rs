//! Media pipeline - the work done for one job.
//!
//! Locate the video, extract audio, validate it, transcribe it, render
//! subtitles and persist both. Each step is a trait so the pipeline can be
//! assembled from real or fake parts.

pub mod convert;
pub mod sink;
pub mod source;
pub mod subtitle;
pub mod transcribe;

pub use convert::{validate_audio, AudioConverter, ConvertError, FfmpegConverter};
pub use sink::{FsTranscriptSink, TranscriptSink};
pub use source::{DirectoryVideoSource, VideoSource, VIDEO_EXTENSIONS};
pub use subtitle::to_vtt;
pub use transcribe::{HttpTranscriber, Segment, TranscribeError, Transcriber, Transcript};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::{MediascribeError, Result};
use crate::jobs::{BackoffStrategy, JobId, JobProcessor, ProcessError, ProgressReporter, RetryPolicy};

/// [`JobProcessor`] that transcribes a job's video.
pub struct MediaPipeline {
    source: Arc<dyn VideoSource>,
    converter: Arc<dyn AudioConverter>,
    transcriber: Arc<dyn Transcriber>,
    sink: Arc<dyn TranscriptSink>,
    work_dir: PathBuf,
}

impl MediaPipeline {
    pub fn new(
        source: Arc<dyn VideoSource>,
        converter: Arc<dyn AudioConverter>,
        transcriber: Arc<dyn Transcriber>,
        sink: Arc<dyn TranscriptSink>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            converter,
            transcriber,
            sink,
            work_dir: work_dir.into(),
        }
    }

    /// Assemble the production pipeline: directory source, ffmpeg, HTTP
    /// transcription and filesystem output.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        if config.transcription_api_key.is_none() {
            tracing::warn!("No transcription API key configured; requests will be unauthenticated");
        }

        let transcriber = HttpTranscriber::new(
            config.transcription_url.clone(),
            config.transcription_api_key.clone(),
            config.transcription_model.clone(),
            config.transcription_timeout,
        )
        .map_err(|e| MediascribeError::configuration(format!("transcription client: {}", e)))?
        .with_retry(
            RetryPolicy::with_attempts(config.retry_attempts)
                .with_backoff(BackoffStrategy::exponential_with_jitter()),
        );

        Ok(Self::new(
            Arc::new(DirectoryVideoSource::new(&config.video_dir)),
            Arc::new(FfmpegConverter::new(&config.ffmpeg_path)),
            Arc::new(transcriber),
            Arc::new(FsTranscriptSink::new(&config.output_dir)),
            &config.work_dir,
        ))
    }

    fn audio_path(&self, job_id: &JobId) -> PathBuf {
        self.work_dir.join(format!("{}.mp3", job_id))
    }
}

#[async_trait]
impl JobProcessor for MediaPipeline {
    async fn has_video_source(&self, job_id: &JobId) -> bool {
        self.source.locate(job_id).await.is_some()
    }

    async fn process_job(
        &self,
        job_id: &JobId,
        progress: &ProgressReporter,
    ) -> std::result::Result<String, ProcessError> {
        let video = self
            .source
            .locate(job_id)
            .await
            .ok_or_else(|| ProcessError::NotFound(format!("no video source found for {}", job_id)))?;

        let audio = self.audio_path(job_id);
        let result = self.transcribe_video(job_id, &video, &audio, progress).await;

        if let Err(e) = tokio::fs::remove_file(&audio).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(job_id = %job_id, error = %e, "Could not remove converted audio");
            }
        }
        result
    }
}

impl MediaPipeline {
    async fn transcribe_video(
        &self,
        job_id: &JobId,
        video: &std::path::Path,
        audio: &std::path::Path,
        progress: &ProgressReporter,
    ) -> std::result::Result<String, ProcessError> {
        progress.report("Converting to audio...").await;
        self.converter
            .convert(video, audio)
            .await
            .map_err(|e| ProcessError::ConversionFailed(format!("Audio conversion failed: {}", e)))?;

        progress.report("Validating audio file...").await;
        let size = validate_audio(audio).await.map_err(ProcessError::ValidationFailed)?;
        tracing::debug!(job_id = %job_id, audio_bytes = size, "Audio validated");

        progress.report("Uploading file to transcription API...").await;
        let transcript = self
            .transcriber
            .transcribe(audio, progress)
            .await
            .map_err(|e| ProcessError::UploadFailed(format!("Transcription failed: {}", e)))?;

        progress.report("Generating subtitle file...").await;
        let vtt = to_vtt(&transcript);

        progress.report("Saving to database...").await;
        self.sink
            .save(job_id, &transcript.text, &vtt)
            .await
            .map_err(|e| ProcessError::PersistenceFailed(format!("Could not save transcript: {}", e)))?;

        Ok(format!(
            "Transcription completed ({} characters)",
            transcript.text.chars().count()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct CopyConverter {
        empty: bool,
    }

    #[async_trait]
    impl AudioConverter for CopyConverter {
        async fn convert(&self, _video: &Path, output: &Path) -> std::result::Result<(), ConvertError> {
            tokio::fs::create_dir_all(output.parent().unwrap()).await?;
            let bytes: &[u8] = if self.empty { b"" } else { b"ID3 audio" };
            tokio::fs::write(output, bytes).await?;
            Ok(())
        }
    }

    /// Answers with a fixed transcript, or rejects the upload before it is sent.
    struct FixedTranscriber {
        reject: bool,
    }

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(
            &self,
            _audio: &Path,
            progress: &ProgressReporter,
        ) -> std::result::Result<Transcript, TranscribeError> {
            if self.reject {
                return Err(TranscribeError::Network("connection refused".to_string()));
            }
            progress.report("Waiting for transcription...").await;
            Ok(Transcript {
                text: "hello world".to_string(),
                segments: vec![Segment {
                    start: 0.0,
                    end: 1.0,
                    text: "hello world".to_string(),
                }],
            })
        }
    }

    fn pipeline(root: &Path, empty_audio: bool) -> MediaPipeline {
        pipeline_with(root, empty_audio, false)
    }

    fn pipeline_with(root: &Path, empty_audio: bool, reject_upload: bool) -> MediaPipeline {
        MediaPipeline::new(
            Arc::new(DirectoryVideoSource::new(root.join("videos"))),
            Arc::new(CopyConverter { empty: empty_audio }),
            Arc::new(FixedTranscriber { reject: reject_upload }),
            Arc::new(FsTranscriptSink::new(root.join("out"))),
            root.join("work"),
        )
    }

    fn with_video(root: &Path, name: &str) {
        std::fs::create_dir_all(root.join("videos")).unwrap();
        std::fs::write(root.join("videos").join(format!("{}.mp4", name)), b"video").unwrap();
    }

    #[tokio::test]
    async fn test_full_run_reports_each_step() {
        let dir = tempfile::tempdir().unwrap();
        with_video(dir.path(), "talk");
        let pipeline = pipeline(dir.path(), false);
        let job_id = JobId::parse("talk").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let reporter = ProgressReporter::new(job_id.clone(), tx);
        let message = pipeline.process_job(&job_id, &reporter).await.unwrap();
        drop(reporter);

        assert_eq!(message, "Transcription completed (11 characters)");

        let mut steps = Vec::new();
        while let Some(step) = rx.recv().await {
            steps.push(step);
        }
        assert_eq!(
            steps,
            vec![
                "Converting to audio...",
                "Validating audio file...",
                "Uploading file to transcription API...",
                "Waiting for transcription...",
                "Generating subtitle file...",
                "Saving to database...",
            ]
        );

        assert!(dir.path().join("out/talk.vtt").exists());
        assert!(!dir.path().join("work/talk.mp3").exists());
    }

    #[tokio::test]
    async fn test_failed_upload_never_reports_waiting() {
        let dir = tempfile::tempdir().unwrap();
        with_video(dir.path(), "talk");
        let pipeline = pipeline_with(dir.path(), false, true);
        let job_id = JobId::parse("talk").unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let reporter = ProgressReporter::new(job_id.clone(), tx);
        let error = pipeline.process_job(&job_id, &reporter).await.unwrap_err();
        drop(reporter);
        assert_eq!(error.kind(), "upload_failed");

        let mut steps = Vec::new();
        while let Some(step) = rx.recv().await {
            steps.push(step);
        }
        assert_eq!(steps.last().map(String::as_str), Some("Uploading file to transcription API..."));
        assert!(!steps.iter().any(|step| step == "Waiting for transcription..."));
    }

    #[tokio::test]
    async fn test_empty_audio_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        with_video(dir.path(), "talk");
        let pipeline = pipeline(dir.path(), true);
        let job_id = JobId::parse("talk").unwrap();

        let error = pipeline
            .process_job(&job_id, &ProgressReporter::detached(job_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), "validation_failed");
        assert!(error.to_string().starts_with("Audio file validation failed"));
    }

    #[tokio::test]
    async fn test_has_video_source() {
        let dir = tempfile::tempdir().unwrap();
        with_video(dir.path(), "talk");
        let pipeline = pipeline(dir.path(), false);

        assert!(pipeline.has_video_source(&JobId::parse("talk").unwrap()).await);
        assert!(!pipeline.has_video_source(&JobId::parse("other").unwrap()).await);
    }
}
