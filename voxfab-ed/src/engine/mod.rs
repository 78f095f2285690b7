//! External collaborators
//!
//! Speech synthesis, signal transforms, CSV validation and feature extraction
//! are black boxes to the editor. Each is reached through a trait here;
//! `bridge::HttpBridge` forwards to the voice worker process and
//! `mock::MockEngine` runs everything locally for tests and offline demos.
//!
//! File arguments are paths on a filesystem shared with the collaborator.
//! Implementations write their output to exactly the `dst`/`out` path given.

pub mod bridge;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::{EditorError, EditorResult};

/// A model loaded by the TTS engine
///
/// Owned by the model cache; the session borrows it while it is active.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelHandle {
    /// Folder name the model was activated by
    pub folder_name: String,
    /// Resolved model folder
    pub folder_path: PathBuf,
    /// Engine-assigned reference to the loaded model
    pub engine_ref: String,
    pub loaded_at: DateTime<Utc>,
}

/// Collaborator failure; the message is surfaced to clients verbatim
#[derive(Debug, Error)]
pub enum EngineError {
    /// The collaborator could not be reached
    #[error("voice worker unreachable: {0}")]
    Unavailable(String),

    /// The collaborator ran and reported a failure
    #[error("{0}")]
    Failed(String),

    /// Local audio file handling failed
    #[error("audio file error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        EngineError::Audio(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Progress reporting handle passed into long-running collaborator calls
///
/// Percentages go to whoever holds the receiving side; reports after the
/// receiver is gone are dropped silently.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<u8>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards every report
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, percent: f64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(percent.clamp(0.0, 100.0).round() as u8);
        }
    }
}

/// Text-to-speech inference
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Load the model stored in `folder`
    async fn load_model(&self, folder_name: &str, folder: &Path) -> EngineResult<ModelHandle>;

    /// Synthesize `text` with `model` into a WAV file at `out`
    async fn synthesize(&self, model: &ModelHandle, text: &str, out: &Path) -> EngineResult<()>;
}

/// Signal transforms over WAV files
#[async_trait]
pub trait AudioTransform: Send + Sync {
    /// Keep `[start, end)` seconds of `src`
    async fn crop(&self, src: &Path, dst: &Path, start: f64, end: f64) -> EngineResult<()>;

    /// Time-scale `src` by `factor` (> 0, 1.0 = unchanged)
    async fn change_speed(
        &self,
        src: &Path,
        dst: &Path,
        factor: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()>;

    /// Shift the pitch of `src` by `semitones`
    async fn shift_pitch(
        &self,
        src: &Path,
        dst: &Path,
        semitones: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()>;
}

/// Result of validating the uploaded dataset CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// HTTP status the validator chose for its verdict
    pub status_code: u16,
    /// Validator's structured report, passed through untouched
    pub body: serde_json::Value,
}

/// Dataset CSV validation
#[async_trait]
pub trait DatasetValidator: Send + Sync {
    async fn validate_csv(&self, upload_dir: &Path) -> EngineResult<ValidationReport>;
}

/// Parameters sent by the dataset builder when starting feature extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionParams {
    pub squim: bool,
    pub pitch: bool,
    pub snr: bool,
    pub rate: bool,
    pub stage: Option<String>,
    pub output_folder_name: Option<String>,
    pub epoch: Option<serde_json::Value>,
    pub learning_rate: Option<serde_json::Value>,
    pub uses_incremental_training: bool,
    pub checkpoint_folder: Option<String>,
    pub model_prefix: Option<String>,
}

/// Final verdict of a feature extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub success: bool,
    pub message: String,
}

/// Dataset feature extraction
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(
        &self,
        params: &ExtractionParams,
        progress: &ProgressSink,
    ) -> EngineResult<ExtractionOutcome>;
}

/// The full set of collaborators the service talks to
#[derive(Clone)]
pub struct Collaborators {
    pub tts: Arc<dyn TtsEngine>,
    pub dsp: Arc<dyn AudioTransform>,
    pub validator: Arc<dyn DatasetValidator>,
    pub extractor: Arc<dyn FeatureExtractor>,
}

impl Collaborators {
    /// Every seam served by the same implementation
    pub fn uniform<E>(engine: Arc<E>) -> Self
    where
        E: TtsEngine + AudioTransform + DatasetValidator + FeatureExtractor + 'static,
    {
        Self {
            tts: engine.clone(),
            dsp: engine.clone(),
            validator: engine.clone(),
            extractor: engine,
        }
    }
}

/// Run a collaborator call under a deadline
///
/// Collaborator failures are wrapped by `wrap` (which keeps the message
/// verbatim); expiry becomes `EditorError::Timeout`. Dropping the future on
/// expiry cancels the call.
pub async fn call_bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
    wrap: fn(String) -> EditorError,
) -> EditorResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            tracing::error!(operation, error = %err, "Collaborator call failed");
            Err(wrap(err.to_string()))
        }
        Err(_) => {
            tracing::error!(operation, limit_secs = limit.as_secs(), "Collaborator call timed out");
            Err(EditorError::Timeout {
                operation,
                secs: limit.as_secs(),
            })
        }
    }
}
