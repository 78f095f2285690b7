//! Artifact session record

use serde::Serialize;
use std::path::{Path, PathBuf};

/// Lifecycle state of the working artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Empty,
    Generated,
    Cropped,
    Adjusted,
}

/// Fixed file locations in the work directory
#[derive(Debug, Clone)]
pub struct WorkPaths {
    pub current: PathBuf,
    pub backup: PathBuf,
    pub cropped_baseline: PathBuf,
}

impl WorkPaths {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            current: work_dir.join("tts.wav"),
            backup: work_dir.join("tts_backup.wav"),
            cropped_baseline: work_dir.join("tts_cropped.wav"),
        }
    }
}

/// The single working-audio record
///
/// Only `SessionHandle` mutates it, and only after every file write of the
/// transition has been committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSession {
    pub state: ArtifactState,
    pub current: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub cropped_baseline: Option<PathBuf>,
    /// Cumulative semitone offset applied to the baseline
    pub pitch_offset: f64,
    /// Cumulative speed factor applied to the baseline, always > 0
    pub speed_factor: f64,
    /// Bumped on every committed mutation
    pub generation: u64,
    /// Transcript of the last generate
    pub last_text: Option<String>,
}

impl Default for ArtifactSession {
    fn default() -> Self {
        Self {
            state: ArtifactState::Empty,
            current: None,
            backup: None,
            cropped_baseline: None,
            pitch_offset: 0.0,
            speed_factor: 1.0,
            generation: 0,
            last_text: None,
        }
    }
}

impl ArtifactSession {
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            pitch_offset: self.pitch_offset,
            speed_factor: self.speed_factor,
            generation: self.generation,
            has_current: self.current.is_some(),
            has_backup: self.backup.is_some(),
            has_cropped_baseline: self.cropped_baseline.is_some(),
            last_text: self.last_text.clone(),
        }
    }

    pub(crate) fn reset_offsets(&mut self) {
        self.pitch_offset = 0.0;
        self.speed_factor = 1.0;
    }

    pub(crate) fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}

/// Serializable view of the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: ArtifactState,
    pub pitch_offset: f64,
    pub speed_factor: f64,
    pub generation: u64,
    pub has_current: bool,
    pub has_backup: bool,
    pub has_cropped_baseline: bool,
    pub last_text: Option<String>,
}
