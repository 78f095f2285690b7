//! Artifact session
//!
//! `SessionHandle` owns the single working-audio record and linearizes every
//! transition through one async mutex, held for the whole operation including
//! the collaborator call. A transition writes its files to temp siblings,
//! renames them into place, and only then updates the record; a failure at any
//! step leaves both the record and the committed files as they were.
//!
//! Pitch and speed are always computed from the cropped baseline with the new
//! cumulative value, never from the previous output.

pub mod state;

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use voxfab_common::config::TimeoutConfig;
use voxfab_common::events::{EventBus, VoxEvent};
use voxfab_common::fs::{
    commit_temp, copy_atomic, discard, replace_keeping, restore, temp_sibling,
};

use crate::dataset::{DatasetCollector, DatasetEntry};
use crate::engine::{call_bounded, AudioTransform, ModelHandle, ProgressSink, TtsEngine};
use crate::error::{EditorError, EditorResult};

pub use state::{ArtifactSession, ArtifactState, SessionSnapshot, WorkPaths};

/// Result of a pitch or speed adjustment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustOutcome {
    /// false when the adjustment was refused as a no-op
    pub applied: bool,
    pub snapshot: SessionSnapshot,
}

/// Temp files waiting to be renamed over their targets
#[derive(Default)]
struct Staged {
    pairs: Vec<(PathBuf, PathBuf)>,
}

impl Staged {
    fn push(&mut self, tmp: PathBuf, target: &Path) {
        self.pairs.push((tmp, target.to_path_buf()));
    }

    /// Copy `src` into a temp sibling of `target`
    async fn copy(&mut self, src: &Path, target: &Path) -> EditorResult<()> {
        let tmp = temp_sibling(target);
        if let Err(e) = tokio::fs::copy(src, &tmp).await {
            discard(&tmp).await;
            return Err(EditorError::Persistence(e.to_string()));
        }
        self.push(tmp, target);
        Ok(())
    }

    /// Rename every temp over its target, all or nothing
    ///
    /// Replaced files are kept aside until the last rename succeeds and are
    /// put back if any rename fails.
    async fn commit(self) -> EditorResult<()> {
        let mut replaced: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();
        let mut pairs = self.pairs.into_iter();
        while let Some((tmp, target)) = pairs.next() {
            match replace_keeping(&tmp, &target).await {
                Ok(displaced) => replaced.push((target, displaced)),
                Err(e) => {
                    discard(&tmp).await;
                    for (rest, _) in pairs {
                        discard(&rest).await;
                    }
                    for (target, displaced) in replaced.into_iter().rev() {
                        restore(&target, displaced.as_deref()).await;
                    }
                    warn!(error = %e, "Commit failed, previous files restored");
                    return Err(e.into());
                }
            }
        }
        for (_, displaced) in replaced {
            if let Some(prev) = displaced {
                discard(&prev).await;
            }
        }
        Ok(())
    }

    async fn discard(self) {
        for (tmp, _) in self.pairs {
            discard(&tmp).await;
        }
    }
}

struct SessionInner {
    session: Mutex<ArtifactSession>,
    paths: WorkPaths,
    tts: Arc<dyn TtsEngine>,
    dsp: Arc<dyn AudioTransform>,
    events: EventBus,
    timeouts: TimeoutConfig,
}

/// Shared handle to the artifact session
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

impl SessionHandle {
    pub fn new(
        work_dir: &Path,
        tts: Arc<dyn TtsEngine>,
        dsp: Arc<dyn AudioTransform>,
        events: EventBus,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                session: Mutex::new(ArtifactSession::default()),
                paths: WorkPaths::new(work_dir),
                tts,
                dsp,
                events,
                timeouts,
            }),
        }
    }

    pub fn paths(&self) -> &WorkPaths {
        &self.inner.paths
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.lock().await.snapshot()
    }

    /// Open the current artifact for reading
    ///
    /// The file is opened under the session lock, so the caller reads one
    /// complete version even if a transition commits meanwhile.
    pub async fn current_audio(&self) -> EditorResult<tokio::fs::File> {
        let session = self.inner.session.lock().await;
        let current = session.current.as_ref().ok_or(EditorError::NoArtifact)?;
        tokio::fs::File::open(current).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EditorError::NoArtifact,
            _ => EditorError::Persistence(e.to_string()),
        })
    }

    /// Synthesize `text` with `model` into a fresh artifact
    pub async fn generate(
        &self,
        model: Option<Arc<ModelHandle>>,
        text: &str,
    ) -> EditorResult<SessionSnapshot> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EditorError::EmptyText);
        }
        let model = model.ok_or(EditorError::NoModelLoaded)?;

        let inner = &self.inner;
        let paths = &inner.paths;
        let mut session = inner.session.lock().await;

        if let Some(parent) = paths.current.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EditorError::Persistence(e.to_string()))?;
        }

        let synthesized = temp_sibling(&paths.current);
        info!(model = %model.folder_name, chars = text.chars().count(), "Generating speech");
        if let Err(e) = call_bounded(
            "synthesis",
            inner.timeouts.synthesis(),
            inner.tts.synthesize(&model, text, &synthesized),
            EditorError::Synthesis,
        )
        .await
        {
            discard(&synthesized).await;
            return Err(e);
        }

        let mut staged = Staged::default();
        let copies = async {
            staged.copy(&synthesized, &paths.backup).await?;
            staged.copy(&synthesized, &paths.cropped_baseline).await
        }
        .await;
        staged.push(synthesized, &paths.current);
        if let Err(e) = copies {
            staged.discard().await;
            return Err(e);
        }
        staged.commit().await?;

        session.current = Some(paths.current.clone());
        session.backup = Some(paths.backup.clone());
        session.cropped_baseline = Some(paths.cropped_baseline.clone());
        session.reset_offsets();
        session.state = ArtifactState::Generated;
        session.last_text = Some(text.to_string());
        let generation = session.bump();
        info!(generation, "Artifact generated");

        inner.events.emit_lossy(VoxEvent::ArtifactGenerated {
            generation,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        Ok(session.snapshot())
    }

    /// Crop the current artifact to `[start, end)` seconds
    pub async fn chop(&self, start: f64, end: f64) -> EditorResult<SessionSnapshot> {
        if !(start.is_finite() && end.is_finite() && start >= 0.0 && start < end) {
            return Err(EditorError::InvalidRange { start, end });
        }

        let inner = &self.inner;
        let paths = &inner.paths;
        let mut session = inner.session.lock().await;
        let current = session.current.clone().ok_or(EditorError::NoArtifact)?;
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Err(EditorError::NoArtifact);
        }

        let cropped = temp_sibling(&paths.current);
        if let Err(e) = call_bounded(
            "crop",
            inner.timeouts.transform(),
            inner.dsp.crop(&current, &cropped, start, end),
            EditorError::Transform,
        )
        .await
        {
            discard(&cropped).await;
            return Err(e);
        }

        let mut staged = Staged::default();
        let copied = staged.copy(&cropped, &paths.cropped_baseline).await;
        staged.push(cropped, &paths.current);
        if let Err(e) = copied {
            staged.discard().await;
            return Err(e);
        }
        staged.commit().await?;

        session.current = Some(paths.current.clone());
        session.cropped_baseline = Some(paths.cropped_baseline.clone());
        session.state = ArtifactState::Cropped;
        let generation = session.bump();
        info!(start, end, generation, "Artifact cropped");

        inner.events.emit_lossy(VoxEvent::ArtifactCropped {
            generation,
            start,
            end,
            timestamp: Utc::now(),
        });
        Ok(session.snapshot())
    }

    /// Add `delta` to the speed factor and re-render from the baseline
    ///
    /// A result that would not stay positive is refused without touching the
    /// session or invoking the transform.
    pub async fn adjust_speed(
        &self,
        delta: f64,
        progress: ProgressSink,
    ) -> EditorResult<AdjustOutcome> {
        if !delta.is_finite() {
            return Err(EditorError::InvalidDelta(delta));
        }

        let mut session = self.inner.session.lock().await;
        let baseline = Self::baseline_of(&session)?;

        let candidate = session.speed_factor + delta;
        if candidate <= 0.0 {
            warn!(
                delta,
                speed_factor = session.speed_factor,
                "Speed factor would not stay positive, ignoring adjustment"
            );
            return Ok(AdjustOutcome {
                applied: false,
                snapshot: session.snapshot(),
            });
        }

        let inner = &self.inner;
        let rendered = temp_sibling(&inner.paths.current);
        let result = call_bounded(
            "speed change",
            inner.timeouts.transform(),
            inner.dsp.change_speed(&baseline, &rendered, candidate, &progress),
            EditorError::Transform,
        )
        .await;
        drop(progress);
        self.commit_render(rendered, result).await?;

        session.speed_factor = candidate;
        Ok(self.finish_adjustment(&mut session))
    }

    /// Add `delta` semitones to the pitch offset and re-render from the baseline
    pub async fn adjust_pitch(
        &self,
        delta: f64,
        progress: ProgressSink,
    ) -> EditorResult<AdjustOutcome> {
        if !delta.is_finite() {
            return Err(EditorError::InvalidDelta(delta));
        }

        let mut session = self.inner.session.lock().await;
        let baseline = Self::baseline_of(&session)?;
        let candidate = session.pitch_offset + delta;

        let inner = &self.inner;
        let rendered = temp_sibling(&inner.paths.current);
        let result = call_bounded(
            "pitch shift",
            inner.timeouts.transform(),
            inner.dsp.shift_pitch(&baseline, &rendered, candidate, &progress),
            EditorError::Transform,
        )
        .await;
        drop(progress);
        self.commit_render(rendered, result).await?;

        session.pitch_offset = candidate;
        Ok(self.finish_adjustment(&mut session))
    }

    fn baseline_of(session: &ArtifactSession) -> EditorResult<PathBuf> {
        if session.current.is_none() {
            return Err(EditorError::NoArtifact);
        }
        session.cropped_baseline.clone().ok_or(EditorError::NoArtifact)
    }

    /// Move a rendered temp file over the current artifact
    async fn commit_render(&self, rendered: PathBuf, result: EditorResult<()>) -> EditorResult<()> {
        if let Err(e) = result {
            discard(&rendered).await;
            return Err(e);
        }
        commit_temp(&rendered, &self.inner.paths.current).await?;
        Ok(())
    }

    fn finish_adjustment(&self, session: &mut ArtifactSession) -> AdjustOutcome {
        session.current = Some(self.inner.paths.current.clone());
        session.state = ArtifactState::Adjusted;
        let generation = session.bump();
        info!(
            generation,
            pitch_offset = session.pitch_offset,
            speed_factor = session.speed_factor,
            "Artifact adjusted"
        );

        self.inner.events.emit_lossy(VoxEvent::ArtifactAdjusted {
            generation,
            pitch_offset: session.pitch_offset,
            speed_factor: session.speed_factor,
            timestamp: Utc::now(),
        });
        AdjustOutcome {
            applied: true,
            snapshot: session.snapshot(),
        }
    }

    /// Restore the current artifact from the backup and zero both offsets
    ///
    /// The cropped baseline is left as it is.
    pub async fn reset(&self) -> EditorResult<SessionSnapshot> {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        let backup = session.backup.clone().ok_or(EditorError::NoBackup)?;
        if !tokio::fs::try_exists(&backup).await.unwrap_or(false) {
            return Err(EditorError::NoBackup);
        }

        copy_atomic(&backup, &inner.paths.current).await?;

        session.current = Some(inner.paths.current.clone());
        session.reset_offsets();
        session.state = ArtifactState::Generated;
        let generation = session.bump();
        info!(generation, "Artifact reset to backup");

        inner.events.emit_lossy(VoxEvent::ArtifactReset {
            generation,
            timestamp: Utc::now(),
        });
        Ok(session.snapshot())
    }

    /// Commit the current artifact to `model_name`'s dataset
    ///
    /// Holds the session lock so the take cannot change mid-copy; the session
    /// record itself is not modified.
    pub async fn keep(
        &self,
        dataset: &DatasetCollector,
        text: &str,
        model_name: &str,
    ) -> EditorResult<DatasetEntry> {
        if text.trim().is_empty() || model_name.trim().is_empty() {
            return Err(EditorError::Validation(
                "Both text and model name are required".to_string(),
            ));
        }

        let session = self.inner.session.lock().await;
        let current = session.current.clone().ok_or(EditorError::NoArtifact)?;
        if !tokio::fs::try_exists(&current).await.unwrap_or(false) {
            return Err(EditorError::NoArtifact);
        }

        let entry = dataset.commit(&current, text, model_name).await?;
        debug!(file = %entry.filename, generation = session.generation, "Kept current artifact");

        self.inner.events.emit_lossy(VoxEvent::TakeKept {
            model_name: entry.model_name.clone(),
            filename: entry.filename.clone(),
            timestamp: Utc::now(),
        });
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage(dir: &Path, target: &str, content: &[u8]) -> (PathBuf, PathBuf) {
        let target = dir.join(target);
        let tmp = temp_sibling(&target);
        std::fs::write(&tmp, content).unwrap();
        (tmp, target)
    }

    fn file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_staged_commit_replaces_all_targets() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tts_backup.wav"), b"old backup").unwrap();

        let mut staged = Staged::default();
        for (name, content) in [
            ("tts_backup.wav", b"new backup".as_slice()),
            ("tts.wav", b"new current"),
        ] {
            let (tmp, target) = stage(dir.path(), name, content);
            staged.push(tmp, &target);
        }
        staged.commit().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("tts_backup.wav")).unwrap(), b"new backup");
        assert_eq!(std::fs::read(dir.path().join("tts.wav")).unwrap(), b"new current");
        assert_eq!(file_count(dir.path()), 2);
    }

    #[tokio::test]
    async fn test_staged_commit_failure_restores_earlier_targets() {
        let dir = TempDir::new().unwrap();
        for (name, content) in [
            ("tts_backup.wav", b"old backup".as_slice()),
            ("tts_cropped.wav", b"old baseline"),
            ("tts.wav", b"old current"),
        ] {
            std::fs::write(dir.path().join(name), content).unwrap();
        }

        let mut staged = Staged::default();
        let (tmp, target) = stage(dir.path(), "tts_backup.wav", b"new backup");
        staged.push(tmp, &target);
        let (tmp, target) = stage(dir.path(), "tts_cropped.wav", b"new baseline");
        staged.push(tmp, &target);
        // The current artifact's temp vanished before the final rename
        let (tmp, target) = stage(dir.path(), "tts.wav", b"new current");
        std::fs::remove_file(&tmp).unwrap();
        staged.push(tmp, &target);

        let err = staged.commit().await.unwrap_err();
        assert!(matches!(err, EditorError::Persistence(_)));

        assert_eq!(std::fs::read(dir.path().join("tts_backup.wav")).unwrap(), b"old backup");
        assert_eq!(std::fs::read(dir.path().join("tts_cropped.wav")).unwrap(), b"old baseline");
        assert_eq!(std::fs::read(dir.path().join("tts.wav")).unwrap(), b"old current");
        assert_eq!(file_count(dir.path()), 3);
    }

    #[tokio::test]
    async fn test_staged_commit_failure_removes_fresh_targets() {
        let dir = TempDir::new().unwrap();

        let mut staged = Staged::default();
        let (tmp, target) = stage(dir.path(), "tts_backup.wav", b"new backup");
        staged.push(tmp, &target);
        let (tmp, target) = stage(dir.path(), "tts.wav", b"new current");
        std::fs::remove_file(&tmp).unwrap();
        staged.push(tmp, &target);

        assert!(staged.commit().await.is_err());
        assert_eq!(file_count(dir.path()), 0);
    }
}
