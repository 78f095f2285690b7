//! Streamed edit operations
//!
//! An edit is one request, zero or more progress frames and one final frame.
//! This module runs edits against the session and produces `EditFrame`s into
//! an mpsc channel; serializing the frames onto a socket is the transport's
//! job (`api::channel`).
//!
//! A closed frame channel never stops an edit: frames are dropped and the
//! transition still commits.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{call_bounded, ExtractionParams, FeatureExtractor, ProgressSink};
use crate::error::{EditorError, EditorResult};
use crate::session::{AdjustOutcome, SessionHandle};

/// Greeting sent when a channel opens
pub const CONNECTED_MESSAGE: &str = "Connection established";

/// Which adjustment a channel performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Speed,
    Pitch,
}

impl EditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditKind::Speed => "speed",
            EditKind::Pitch => "pitch",
        }
    }
}

/// A validated adjustment request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditRequest {
    pub kind: EditKind,
    pub delta: f64,
}

impl EditRequest {
    /// Parse a `{"delta": <number>}` message
    pub fn parse(kind: EditKind, message: &str) -> EditorResult<Self> {
        let value: serde_json::Value = serde_json::from_str(message)
            .map_err(|e| EditorError::Protocol(format!("Invalid JSON message: {}", e)))?;
        let delta = value
            .get("delta")
            .ok_or_else(|| EditorError::Protocol("Missing 'delta' field".to_string()))?;
        let delta = delta
            .as_f64()
            .ok_or_else(|| EditorError::Protocol("'delta' must be a number".to_string()))?;
        Ok(Self { kind, delta })
    }
}

/// Parse the feature extraction parameter object
pub fn parse_extraction_params(message: &str) -> EditorResult<ExtractionParams> {
    serde_json::from_str(message)
        .map_err(|e| EditorError::Protocol(format!("Invalid extraction parameters: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStatus {
    Success,
    Noop,
    Error,
}

/// Frame sent to channel clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditFrame {
    Connected {
        message: String,
    },
    Progress {
        progress: u8,
    },
    Status {
        status: EditStatus,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pitch_offset: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed_factor: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        generation: Option<u64>,
    },
    Error {
        message: String,
    },
}

impl EditFrame {
    pub fn connected() -> Self {
        EditFrame::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, EditFrame::Status { .. } | EditFrame::Error { .. })
    }
}

fn outcome_frame(kind: EditKind, outcome: &AdjustOutcome) -> EditFrame {
    let snap = &outcome.snapshot;
    let (status, message) = match (kind, outcome.applied) {
        (EditKind::Speed, true) => (
            EditStatus::Success,
            format!("Speed adjusted to {}", snap.speed_factor),
        ),
        (EditKind::Speed, false) => (
            EditStatus::Noop,
            format!(
                "Speed factor must stay positive, keeping {}",
                snap.speed_factor
            ),
        ),
        (EditKind::Pitch, _) => (
            EditStatus::Success,
            format!("Pitch adjusted to {} semitones", snap.pitch_offset),
        ),
    };
    EditFrame::Status {
        status,
        message,
        pitch_offset: Some(snap.pitch_offset),
        speed_factor: Some(snap.speed_factor),
        generation: Some(snap.generation),
    }
}

/// Forward progress percentages as frames until the sink is dropped
async fn forward_progress(
    mut rx: mpsc::UnboundedReceiver<u8>,
    frames: &mpsc::Sender<EditFrame>,
) {
    while let Some(progress) = rx.recv().await {
        // Keep draining after the client is gone so the sink never backs up
        let _ = frames.send(EditFrame::Progress { progress }).await;
    }
}

/// Run one adjustment, streaming progress and the final frame into `frames`
///
/// Returns the final frame.
pub async fn run_edit(
    session: &SessionHandle,
    request: EditRequest,
    frames: mpsc::Sender<EditFrame>,
) -> EditFrame {
    let (sink, rx) = ProgressSink::channel();
    debug!(kind = request.kind.as_str(), delta = request.delta, "Running edit");

    let edit = async {
        match request.kind {
            EditKind::Speed => session.adjust_speed(request.delta, sink).await,
            EditKind::Pitch => session.adjust_pitch(request.delta, sink).await,
        }
    };
    let (result, ()) = tokio::join!(edit, forward_progress(rx, &frames));

    let frame = match result {
        Ok(outcome) => outcome_frame(request.kind, &outcome),
        Err(err) => {
            warn!(kind = request.kind.as_str(), error = %err, "Edit failed");
            let snap = session.snapshot().await;
            EditFrame::Status {
                status: EditStatus::Error,
                message: err.to_string(),
                pitch_offset: Some(snap.pitch_offset),
                speed_factor: Some(snap.speed_factor),
                generation: Some(snap.generation),
            }
        }
    };

    if frames.send(frame.clone()).await.is_err() {
        debug!(kind = request.kind.as_str(), "Client gone before final frame");
    }
    frame
}

/// Run feature extraction, streaming progress and the final frame into `frames`
pub async fn run_feature_extraction(
    extractor: Arc<dyn FeatureExtractor>,
    params: ExtractionParams,
    limit: Duration,
    frames: mpsc::Sender<EditFrame>,
) -> EditFrame {
    let (sink, rx) = ProgressSink::channel();
    info!(
        output = ?params.output_folder_name,
        stage = ?params.stage,
        "Starting feature extraction"
    );

    let extract = async {
        let result = call_bounded(
            "feature extraction",
            limit,
            extractor.extract(&params, &sink),
            EditorError::Transform,
        )
        .await;
        drop(sink);
        result
    };
    let (result, ()) = tokio::join!(extract, forward_progress(rx, &frames));

    let (status, message) = match result {
        Ok(outcome) if outcome.success => (EditStatus::Success, outcome.message),
        Ok(outcome) => (EditStatus::Error, outcome.message),
        Err(err) => (EditStatus::Error, err.to_string()),
    };
    let frame = EditFrame::Status {
        status,
        message,
        pitch_offset: None,
        speed_factor: None,
        generation: None,
    };
    let _ = frames.send(frame.clone()).await;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_numbers() {
        let req = EditRequest::parse(EditKind::Pitch, r#"{"delta": -2.5}"#).unwrap();
        assert_eq!(req.delta, -2.5);
        let req = EditRequest::parse(EditKind::Speed, r#"{"delta": 1}"#).unwrap();
        assert_eq!(req.delta, 1.0);
    }

    #[test]
    fn test_parse_rejects_missing_or_bad_delta() {
        for msg in [r#"{}"#, r#"{"value": 1}"#, r#"{"delta": "fast"}"#, "delta=1", ""] {
            let err = EditRequest::parse(EditKind::Speed, msg).unwrap_err();
            assert!(matches!(err, EditorError::Protocol(_)), "{msg:?}");
        }
        let err = EditRequest::parse(EditKind::Speed, "{}").unwrap_err();
        assert_eq!(err.to_string(), "Missing 'delta' field");
    }

    #[test]
    fn test_frame_wire_format() {
        let progress = serde_json::to_value(EditFrame::Progress { progress: 40 }).unwrap();
        assert_eq!(progress, serde_json::json!({"type": "progress", "progress": 40}));

        let status = serde_json::to_value(EditFrame::Status {
            status: EditStatus::Success,
            message: "done".into(),
            pitch_offset: None,
            speed_factor: None,
            generation: None,
        })
        .unwrap();
        assert_eq!(
            status,
            serde_json::json!({"type": "status", "status": "success", "message": "done"})
        );

        let connected = serde_json::to_value(EditFrame::connected()).unwrap();
        assert_eq!(connected["message"], "Connection established");
    }

    #[test]
    fn test_extraction_params_defaults() {
        let params =
            parse_extraction_params(r#"{"squim": true, "output_folder_name": "spk1"}"#).unwrap();
        assert!(params.squim);
        assert!(!params.pitch);
        assert_eq!(params.output_folder_name.as_deref(), Some("spk1"));
        assert!(parse_extraction_params("[1, 2]").is_err());
    }
}
