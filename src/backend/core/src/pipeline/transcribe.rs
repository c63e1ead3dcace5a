//! Speech-to-text over HTTP.
//!
//! [`HttpTranscriber`] speaks the OpenAI-compatible audio transcription
//! protocol: a multipart upload of the audio file with a bearer token,
//! answered by `{text, segments: [{start, end, text}]}`.
//!
//! The upload is streamed so the job can report when the file has been
//! handed off and the API is working on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::jobs::{ProgressReporter, RetryPolicy};

const UPLOAD_CHUNK: usize = 64 * 1024;

/// A transcription result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// One timed span of a transcript, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    #[error("transcription API returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transcription request failed: {0}")]
    Network(String),

    #[error("unexpected transcription response: {0}")]
    InvalidResponse(String),

    #[error("could not read audio file: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscribeError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::InvalidResponse(_) | Self::Io(_) => false,
        }
    }
}

impl From<reqwest::Error> for TranscribeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Turns an audio file into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio`, reporting "Waiting for transcription..." once the
    /// upload has been sent.
    async fn transcribe(
        &self,
        audio: &Path,
        progress: &ProgressReporter,
    ) -> Result<Transcript, TranscribeError>;
}

/// Request body over `bytes` that fires `sent` after the last chunk is taken.
fn upload_body(bytes: Vec<u8>, sent: oneshot::Sender<()>) -> reqwest::Body {
    let chunks: VecDeque<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK).map(<[u8]>::to_vec).collect();
    let stream = futures::stream::unfold((chunks, Some(sent)), |(mut chunks, mut sent)| async move {
        match chunks.pop_front() {
            Some(chunk) => Some((Ok::<_, std::io::Error>(chunk), (chunks, sent))),
            None => {
                if let Some(sent) = sent.take() {
                    let _ = sent.send(());
                }
                None
            }
        }
    });
    reqwest::Body::wrap_stream(stream)
}

/// Transcriber backed by an HTTP API.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl HttpTranscriber {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranscribeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
            model: model.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn attempt(
        &self,
        audio: &Path,
        bytes: Vec<u8>,
        progress: &ProgressReporter,
    ) -> Result<Transcript, TranscribeError> {
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let (sent_tx, mut sent_rx) = oneshot::channel();
        let length = bytes.len() as u64;
        let part = reqwest::multipart::Part::stream_with_length(upload_body(bytes, sent_tx), length)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let send = request.send();
        tokio::pin!(send);
        let response = tokio::select! {
            biased;
            Ok(()) = &mut sent_rx => {
                progress.report("Waiting for transcription...").await;
                send.await?
            }
            response = &mut send => response?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Transcript>().await?)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        progress: &ProgressReporter,
    ) -> Result<Transcript, TranscribeError> {
        let bytes = tokio::fs::read(audio).await?;
        let mut attempt = 1;

        loop {
            match self.attempt(audio, bytes.clone(), progress).await {
                Ok(transcript) => return Ok(transcript),
                Err(e) if self.retry.should_retry(attempt, e.is_retryable()) => {
                    let delay = self.retry.next_retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transcription attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    progress.report("Retrying upload to transcription API...").await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
