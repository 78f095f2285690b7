//! HTTP bridge to the voice worker
//!
//! The worker process hosts TTS inference, the DSP routines and the dataset
//! tooling. Short calls are JSON request/response. Long-running calls answer
//! with a newline-delimited JSON stream:
//!
//! ```text
//! {"progress": 12.5}
//! {"progress": 60}
//! {"status": "success", "message": "done"}
//! ```
//!
//! The last line carries the verdict; a stream that ends without one is a
//! failure. Worker error bodies (`{"detail": ...}` or plain text) are passed
//! through verbatim.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    AudioTransform, DatasetValidator, EngineError, EngineResult, ExtractionOutcome,
    ExtractionParams, FeatureExtractor, ModelHandle, ProgressSink, TtsEngine, ValidationReport,
};

/// One line of a worker progress stream
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
struct StreamLine {
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Terminal line of a progress stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamVerdict {
    pub success: bool,
    pub message: String,
}

/// Incremental parser for newline-delimited progress streams
///
/// Feed raw body chunks in any split; progress lines are forwarded to the
/// sink, the verdict line is kept.
#[derive(Debug, Default)]
pub struct ProgressStreamParser {
    pending: Vec<u8>,
    verdict: Option<StreamVerdict>,
}

impl ProgressStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8], progress: &ProgressSink) -> EngineResult<()> {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.handle_line(&line, progress)?;
        }
        Ok(())
    }

    /// Flush a trailing unterminated line and return the verdict
    pub fn finish(mut self, progress: &ProgressSink) -> EngineResult<StreamVerdict> {
        let rest = std::mem::take(&mut self.pending);
        self.handle_line(&rest, progress)?;
        self.verdict.ok_or_else(|| {
            EngineError::Failed("voice worker closed the stream without a final status".to_string())
        })
    }

    fn handle_line(&mut self, raw: &[u8], progress: &ProgressSink) -> EngineResult<()> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let line: StreamLine = serde_json::from_str(text).map_err(|e| {
            EngineError::Failed(format!("malformed worker stream line {text:?}: {e}"))
        })?;

        if let Some(p) = line.progress {
            progress.report(p);
        }
        if let Some(status) = line.status {
            self.verdict = Some(StreamVerdict {
                success: status == "success",
                message: line.message.unwrap_or(status),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LoadModelResponse {
    model_id: String,
}

#[derive(Debug, Serialize)]
struct TransformRequest<'a> {
    input_path: &'a Path,
    output_path: &'a Path,
    #[serde(flatten)]
    args: serde_json::Value,
}

/// Voice worker client
#[derive(Debug, Clone)]
pub struct HttpBridge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBridge {
    pub fn new(base_url: impl Into<String>) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> EngineResult<reqwest::Response> {
        let url = self.url(path);
        debug!(%url, "POST to voice worker");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    EngineError::Unavailable(format!("cannot connect to {}: {}", self.base_url, e))
                } else {
                    EngineError::Unavailable(e.to_string())
                }
            })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(EngineError::Failed(error_detail(response).await))
        }
    }

    /// POST and consume a progress stream
    async fn post_streaming(
        &self,
        path: &str,
        body: &impl Serialize,
        progress: &ProgressSink,
    ) -> EngineResult<StreamVerdict> {
        let mut response = self.post(path, body).await?;
        let mut parser = ProgressStreamParser::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?
        {
            parser.feed(&chunk, progress)?;
        }
        parser.finish(progress)
    }

    async fn transform(
        &self,
        path: &str,
        src: &Path,
        dst: &Path,
        args: serde_json::Value,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        let request = TransformRequest {
            input_path: src,
            output_path: dst,
            args,
        };
        let verdict = self.post_streaming(path, &request, progress).await?;
        if verdict.success {
            Ok(())
        } else {
            Err(EngineError::Failed(verdict.message))
        }
    }
}

/// Extract the worker's diagnostic from an error response
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => value
            .get("detail")
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(text),
        Err(_) if !text.trim().is_empty() => text,
        Err(_) => format!("voice worker returned {}", status),
    }
}

#[async_trait]
impl TtsEngine for HttpBridge {
    async fn load_model(&self, folder_name: &str, folder: &Path) -> EngineResult<ModelHandle> {
        let response = self
            .post(
                "/models/load",
                &json!({ "folder_name": folder_name, "folder_path": folder }),
            )
            .await?;
        let loaded: LoadModelResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Failed(format!("invalid load response: {e}")))?;

        info!(folder = %folder_name, model_id = %loaded.model_id, "Voice worker loaded model");
        Ok(ModelHandle {
            folder_name: folder_name.to_string(),
            folder_path: folder.to_path_buf(),
            engine_ref: loaded.model_id,
            loaded_at: Utc::now(),
        })
    }

    async fn synthesize(&self, model: &ModelHandle, text: &str, out: &Path) -> EngineResult<()> {
        self.post(
            "/synthesize",
            &json!({
                "model_id": model.engine_ref,
                "text": text,
                "output_path": out,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AudioTransform for HttpBridge {
    async fn crop(&self, src: &Path, dst: &Path, start: f64, end: f64) -> EngineResult<()> {
        self.transform(
            "/audio/crop",
            src,
            dst,
            json!({ "start": start, "end": end }),
            &ProgressSink::discard(),
        )
        .await
    }

    async fn change_speed(
        &self,
        src: &Path,
        dst: &Path,
        factor: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        self.transform("/audio/speed", src, dst, json!({ "factor": factor }), progress)
            .await
    }

    async fn shift_pitch(
        &self,
        src: &Path,
        dst: &Path,
        semitones: f64,
        progress: &ProgressSink,
    ) -> EngineResult<()> {
        self.transform("/audio/pitch", src, dst, json!({ "semitones": semitones }), progress)
            .await
    }
}

#[async_trait]
impl DatasetValidator for HttpBridge {
    async fn validate_csv(&self, upload_dir: &Path) -> EngineResult<ValidationReport> {
        let url = self.url("/datasets/validate_csv");
        let response = self
            .client
            .post(&url)
            .json(&json!({ "upload_folder": upload_dir }))
            .send()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        // The validator encodes its verdict in the status code, so non-2xx is not an error here
        let status_code = response.status().as_u16();
        let body = response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| EngineError::Failed(format!("invalid validation report: {e}")))?;

        Ok(ValidationReport { status_code, body })
    }
}

#[async_trait]
impl FeatureExtractor for HttpBridge {
    async fn extract(
        &self,
        params: &ExtractionParams,
        progress: &ProgressSink,
    ) -> EngineResult<ExtractionOutcome> {
        let verdict = self
            .post_streaming("/datasets/feature_extraction", params, progress)
            .await?;
        Ok(ExtractionOutcome {
            success: verdict.success,
            message: verdict.message,
        })
    }
}
