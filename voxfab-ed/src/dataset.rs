//! Dataset collector
//!
//! Kept takes are copied into the dataset working directory and recorded in a
//! per-model manifest, `<model>_metadata.csv`, one `filename|transcript` line
//! per take. The manifest is append-only.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use voxfab_common::fs::{commit_temp, discard, temp_sibling};

use crate::error::{EditorError, EditorResult};
use crate::registry::validate_model_name;

/// One committed take
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetEntry {
    pub filename: String,
    pub text: String,
    pub model_name: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Keep transcript on a single manifest line
pub fn sanitize_transcript(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| if matches!(c, '\n' | '\r' | '|') { ' ' } else { c })
        .collect()
}

/// Commits takes into the dataset working directory
#[derive(Debug)]
pub struct DatasetCollector {
    kept_dir: PathBuf,
    /// Serializes name claims and manifest appends
    lock: Mutex<()>,
}

impl DatasetCollector {
    pub fn new(kept_dir: PathBuf) -> Self {
        Self {
            kept_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn kept_dir(&self) -> &Path {
        &self.kept_dir
    }

    pub fn manifest_path(&self, model_name: &str) -> PathBuf {
        self.kept_dir.join(format!("{}_metadata.csv", model_name))
    }

    /// Copy `artifact` into the dataset and append its manifest line
    pub async fn commit(
        &self,
        artifact: &Path,
        text: &str,
        model_name: &str,
    ) -> EditorResult<DatasetEntry> {
        self.commit_at(artifact, text, model_name, Local::now()).await
    }

    /// `commit` with an explicit timestamp for the take's filename
    pub async fn commit_at(
        &self,
        artifact: &Path,
        text: &str,
        model_name: &str,
        at: DateTime<Local>,
    ) -> EditorResult<DatasetEntry> {
        let text = sanitize_transcript(text);
        if text.is_empty() || model_name.trim().is_empty() {
            return Err(EditorError::Validation(
                "Both text and model name are required".to_string(),
            ));
        }
        let model_name = validate_model_name(model_name)
            .map_err(|e| EditorError::Validation(e.to_string()))?;

        let _guard = self.lock.lock().await;

        tokio::fs::create_dir_all(&self.kept_dir)
            .await
            .map_err(|e| EditorError::Persistence(e.to_string()))?;

        let (filename, target) = self.claim_name(model_name, at).await?;

        let tmp = temp_sibling(&target);
        let copied = match tokio::fs::copy(artifact, &tmp).await {
            Ok(_) => commit_temp(&tmp, &target).await.map_err(EditorError::from),
            Err(e) => {
                discard(&tmp).await;
                Err(EditorError::Persistence(e.to_string()))
            }
        };
        if let Err(e) = copied {
            error!(file = %filename, error = %e, "Failed to copy take into dataset");
            discard(&target).await;
            return Err(e);
        }

        if let Err(e) = self.append_manifest(model_name, &filename, &text).await {
            error!(file = %filename, error = %e, "Manifest append failed, removing take");
            discard(&target).await;
            return Err(EditorError::Persistence(e.to_string()));
        }

        info!(model = %model_name, file = %filename, "Take kept");
        Ok(DatasetEntry {
            filename,
            text,
            model_name: model_name.to_string(),
            path: target,
        })
    }

    /// Reserve `<model>_<timestamp>[_n].wav` with create-new semantics
    async fn claim_name(
        &self,
        model_name: &str,
        at: DateTime<Local>,
    ) -> EditorResult<(String, PathBuf)> {
        let stem = format!("{}_{}", model_name, at.format("%Y%m%d_%H%M%S"));
        let mut n = 0u32;
        loop {
            let filename = if n == 0 {
                format!("{stem}.wav")
            } else {
                format!("{stem}_{n}.wav")
            };
            let path = self.kept_dir.join(&filename);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok((filename, path)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!(file = %filename, "Take name already used, trying next suffix");
                    n += 1;
                }
                Err(e) => return Err(EditorError::Persistence(e.to_string())),
            }
        }
    }

    async fn append_manifest(
        &self,
        model_name: &str,
        filename: &str,
        text: &str,
    ) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.manifest_path(model_name))
            .await?;
        file.write_all(format!("{}|{}\n", filename, text).as_bytes())
            .await?;
        file.flush().await?;
        file.sync_data().await
    }

    /// Parse the manifest of `model_name`; a missing manifest is empty
    pub async fn entries(&self, model_name: &str) -> EditorResult<Vec<DatasetEntry>> {
        let model_name = validate_model_name(model_name)?;
        let content = match tokio::fs::read_to_string(self.manifest_path(model_name)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EditorError::Persistence(e.to_string())),
        };

        Ok(content
            .lines()
            .filter_map(|line| line.split_once('|'))
            .map(|(filename, text)| DatasetEntry {
                filename: filename.to_string(),
                text: text.to_string(),
                model_name: model_name.to_string(),
                path: self.kept_dir.join(filename),
            })
            .collect())
    }
}

/// Sub-directories of `root` that contain a `casted` folder, sorted
pub async fn casted_datasets(root: &Path) -> EditorResult<Vec<String>> {
    let mut found = Vec::new();
    let mut dir = match tokio::fs::read_dir(root).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(EditorError::Persistence(e.to_string())),
    };
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| EditorError::Persistence(e.to_string()))?
    {
        let path = entry.path();
        let casted = tokio::fs::metadata(path.join("casted"))
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if casted {
            found.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup() -> (TempDir, DatasetCollector, PathBuf) {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("tts.wav");
        std::fs::write(&artifact, b"RIFF-fake-audio").unwrap();
        let collector = DatasetCollector::new(dir.path().join("kept"));
        (dir, collector, artifact)
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[tokio::test]
    async fn test_commit_copies_take_and_appends_line() {
        let (_dir, collector, artifact) = setup();

        let entry = collector
            .commit_at(&artifact, "hello world", "voiceA", fixed_time())
            .await
            .unwrap();

        assert_eq!(entry.filename, "voiceA_20260314_092653.wav");
        assert_eq!(std::fs::read(&entry.path).unwrap(), b"RIFF-fake-audio");
        let manifest = std::fs::read_to_string(collector.manifest_path("voiceA")).unwrap();
        assert_eq!(manifest, "voiceA_20260314_092653.wav|hello world\n");
    }

    #[tokio::test]
    async fn test_same_second_takes_get_distinct_names() {
        let (_dir, collector, artifact) = setup();

        let first = collector
            .commit_at(&artifact, "one", "voiceA", fixed_time())
            .await
            .unwrap();
        let second = collector
            .commit_at(&artifact, "two", "voiceA", fixed_time())
            .await
            .unwrap();

        assert_eq!(first.filename, "voiceA_20260314_092653.wav");
        assert_eq!(second.filename, "voiceA_20260314_092653_1.wav");
        let entries = collector.entries("voiceA").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text, "two");
    }

    #[tokio::test]
    async fn test_blank_transcript_appends_nothing() {
        let (_dir, collector, artifact) = setup();

        let err = collector.commit(&artifact, "  \n ", "voiceA").await.unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)));
        assert!(!collector.manifest_path("voiceA").exists());

        let err = collector.commit(&artifact, "text", " ").await.unwrap_err();
        assert!(matches!(err, EditorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transcript_is_single_line() {
        let (_dir, collector, artifact) = setup();
        collector
            .commit_at(&artifact, "line one\nline|two", "voiceA", fixed_time())
            .await
            .unwrap();

        let entries = collector.entries("voiceA").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "line one line two");
    }

    #[tokio::test]
    async fn test_failed_append_removes_take() {
        let (_dir, collector, artifact) = setup();
        std::fs::create_dir_all(collector.manifest_path("voiceA")).unwrap();

        let err = collector
            .commit_at(&artifact, "hello", "voiceA", fixed_time())
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::Persistence(_)));
        assert!(!collector.kept_dir().join("voiceA_20260314_092653.wav").exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_persistence_error() {
        let (dir, collector, _artifact) = setup();
        let err = collector
            .commit_at(&dir.path().join("nope.wav"), "hello", "voiceA", fixed_time())
            .await
            .unwrap_err();
        assert!(matches!(err, EditorError::Persistence(_)));
        assert!(!collector.kept_dir().join("voiceA_20260314_092653.wav").exists());
    }

    #[tokio::test]
    async fn test_casted_datasets() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("speakerB/casted")).unwrap();
        std::fs::create_dir_all(dir.path().join("speakerA/casted")).unwrap();
        std::fs::create_dir_all(dir.path().join("raw_only")).unwrap();

        assert_eq!(
            casted_datasets(dir.path()).await.unwrap(),
            vec!["speakerA", "speakerB"]
        );
        assert!(casted_datasets(&dir.path().join("absent")).await.unwrap().is_empty());
    }
}
