//! Offline collaborator implementation
//!
//! Produces real WAV files with `hound` so every editor operation can run
//! without the voice worker. Synthesis writes a sine tone whose length follows
//! the text; speed and pitch resample the source. Output lengths are
//! predictable, which lets tests tell which source a transform read from.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::{
    AudioTransform, DatasetValidator, EngineError, EngineResult, ExtractionOutcome,
    ExtractionParams, FeatureExtractor, ModelHandle, ProgressSink, TtsEngine, ValidationReport,
};

/// Sample rate of every file the mock writes
pub const MOCK_SAMPLE_RATE: u32 = 16_000;

const BASE_SECONDS: f64 = 0.5;
const SECONDS_PER_CHAR: f64 = 0.08;

/// A recorded collaborator call
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    LoadModel(String),
    Synthesize { model: String, text: String },
    Crop { src: PathBuf, start: f64, end: f64 },
    ChangeSpeed { src: PathBuf, factor: f64 },
    ShiftPitch { src: PathBuf, semitones: f64 },
    ValidateCsv(PathBuf),
    Extract,
}

/// Deterministic local engine
#[derive(Debug, Default)]
pub struct MockEngine {
    calls: Mutex<Vec<MockCall>>,
    fail_synthesis: AtomicBool,
    fail_transforms: AtomicBool,
    transform_delay: Mutex<Option<Duration>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent synthesis calls fail
    pub fn set_fail_synthesis(&self, fail: bool) {
        self.fail_synthesis.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent crop/speed/pitch calls fail
    pub fn set_fail_transforms(&self, fail: bool) {
        self.fail_transforms.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every speed/pitch call
    pub fn set_transform_delay(&self, delay: Option<Duration>) {
        *self.transform_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of speed and pitch transforms invoked so far
    pub fn transform_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::ChangeSpeed { .. } | MockCall::ShiftPitch { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, call: MockCall) {
        debug!(?call, "Mock engine call");
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn check_transform(&self) -> EngineResult<()> {
        if self.fail_transforms.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("mock transform failure".to_string()));
        }
        Ok(())
    }

    async fn resample_with_progress(
        &self,
        src: &Path,
        dst: &Path,
        ratio: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        let delay = *self.transform_delay.lock().unwrap_or_else(|e| e.into_inner());
        for step in [0.0, 25.0, 50.0, 75.0] {
            progress.report(step);
            if let Some(delay) = delay {
                tokio::time::sleep(delay / 4).await;
            }
        }

        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        tokio::task::spawn_blocking(move || {
            let samples = read_samples(&src)?;
            write_samples(&dst, &resample(&samples, ratio))
        })
        .await
        .map_err(|e| EngineError::Failed(format!("mock worker task failed: {e}")))??;

        progress.report(100.0);
        Ok(())
    }
}

fn wav_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: MOCK_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Read every sample of a mono 16-bit WAV
pub fn read_samples(path: &Path) -> EngineResult<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)?;
    reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(EngineError::from)
}

/// Write mono 16-bit samples at the mock sample rate
pub fn write_samples(path: &Path, samples: &[i16]) -> EngineResult<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec())?;
    for s in samples {
        writer.write_sample(*s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Duration in seconds of a mock WAV
pub fn duration_secs(path: &Path) -> EngineResult<f64> {
    let reader = hound::WavReader::open(path)?;
    Ok(reader.duration() as f64 / reader.spec().sample_rate as f64)
}

/// Nearest-neighbour resample; output length is `len / ratio`
fn resample(samples: &[i16], ratio: f64) -> Vec<i16> {
    if samples.is_empty() || ratio <= 0.0 {
        return Vec::new();
    }
    let out_len = (samples.len() as f64 / ratio).round() as usize;
    (0..out_len)
        .map(|i| {
            let idx = ((i as f64) * ratio) as usize;
            samples[idx.min(samples.len() - 1)]
        })
        .collect()
}

fn tone(seconds: f64) -> Vec<i16> {
    let n = (seconds * MOCK_SAMPLE_RATE as f64).round() as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / MOCK_SAMPLE_RATE as f64;
            ((t * 220.0 * std::f64::consts::TAU).sin() * 8000.0) as i16
        })
        .collect()
}

#[async_trait]
impl TtsEngine for MockEngine {
    async fn load_model(&self, folder_name: &str, folder: &Path) -> EngineResult<ModelHandle> {
        self.record(MockCall::LoadModel(folder_name.to_string()));
        if !tokio::fs::metadata(folder).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(EngineError::Failed(format!(
                "Model folder not found: {}",
                folder.display()
            )));
        }
        Ok(ModelHandle {
            folder_name: folder_name.to_string(),
            folder_path: folder.to_path_buf(),
            engine_ref: format!("mock:{folder_name}"),
            loaded_at: Utc::now(),
        })
    }

    async fn synthesize(&self, model: &ModelHandle, text: &str, out: &Path) -> EngineResult<()> {
        self.record(MockCall::Synthesize {
            model: model.folder_name.clone(),
            text: text.to_string(),
        });
        if self.fail_synthesis.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("mock synthesis failure".to_string()));
        }

        let seconds = BASE_SECONDS + SECONDS_PER_CHAR * text.chars().count() as f64;
        let out = out.to_path_buf();
        tokio::task::spawn_blocking(move || write_samples(&out, &tone(seconds)))
            .await
            .map_err(|e| EngineError::Failed(format!("mock worker task failed: {e}")))?
    }
}

#[async_trait]
impl AudioTransform for MockEngine {
    async fn crop(&self, src: &Path, dst: &Path, start: f64, end: f64) -> EngineResult<()> {
        self.record(MockCall::Crop {
            src: src.to_path_buf(),
            start,
            end,
        });
        self.check_transform()?;

        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        tokio::task::spawn_blocking(move || {
            let samples = read_samples(&src)?;
            let rate = MOCK_SAMPLE_RATE as f64;
            let from = ((start * rate) as usize).min(samples.len());
            let to = ((end * rate) as usize).clamp(from, samples.len());
            write_samples(&dst, &samples[from..to])
        })
        .await
        .map_err(|e| EngineError::Failed(format!("mock worker task failed: {e}")))?
    }

    async fn change_speed(
        &self,
        src: &Path,
        dst: &Path,
        factor: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        self.record(MockCall::ChangeSpeed {
            src: src.to_path_buf(),
            factor,
        });
        self.check_transform()?;
        self.resample_with_progress(src, dst, factor, progress).await
    }

    async fn shift_pitch(
        &self,
        src: &Path,
        dst: &Path,
        semitones: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        self.record(MockCall::ShiftPitch {
            src: src.to_path_buf(),
            semitones,
        });
        self.check_transform()?;
        let ratio = 2f64.powf(semitones / 12.0);
        self.resample_with_progress(src, dst, ratio, progress).await
    }
}

#[async_trait]
impl DatasetValidator for MockEngine {
    async fn validate_csv(&self, upload_dir: &Path) -> EngineResult<ValidationReport> {
        self.record(MockCall::ValidateCsv(upload_dir.to_path_buf()));

        let mut has_csv = false;
        if let Ok(mut dir) = tokio::fs::read_dir(upload_dir).await {
            while let Some(entry) = dir.next_entry().await? {
                if entry.path().extension().is_some_and(|ext| ext == "csv") {
                    has_csv = true;
                    break;
                }
            }
        }

        Ok(if has_csv {
            ValidationReport {
                status_code: 200,
                body: serde_json::json!({ "status": "success", "message": "CSV file is valid" }),
            }
        } else {
            ValidationReport {
                status_code: 400,
                body: serde_json::json!({ "status": "error", "message": "No CSV file found" }),
            }
        })
    }
}

#[async_trait]
impl FeatureExtractor for MockEngine {
    async fn extract(
        &self,
        params: &ExtractionParams,
        progress: &ProgressSink,
    ) -> EngineResult<ExtractionOutcome> {
        self.record(MockCall::Extract);
        for step in [20.0, 40.0, 60.0, 80.0, 100.0] {
            progress.report(step);
        }
        let target = params.output_folder_name.as_deref().unwrap_or("dataset");
        Ok(ExtractionOutcome {
            success: true,
            message: format!("Feature extraction completed for {target}"),
        })
    }
}
