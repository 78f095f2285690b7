//! Model registry
//!
//! Wraps the model cache with load/activate semantics and tracks the single
//! active model used for generation. Activations are serialized so two
//! requests for the same uncached folder load it once.

use chrono::Utc;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info};
use voxfab_common::events::{EventBus, VoxEvent};

use crate::cache::{BoundedExpiringCache, Clock, EvictionPolicy, SystemClock};
use crate::engine::{call_bounded, ModelHandle, TtsEngine};
use crate::error::{EditorError, EditorResult};

/// Outcome of a successful activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationResult {
    /// Served from the cache
    AlreadyLoaded,
    /// Loaded by the engine and cached
    FreshlyLoaded,
}

impl ActivationResult {
    /// User-facing message for `folder_name`
    pub fn message(&self, folder_name: &str) -> String {
        match self {
            ActivationResult::AlreadyLoaded => {
                format!("TTS Model for '{}' is already loaded.", folder_name)
            }
            ActivationResult::FreshlyLoaded => {
                format!("TTS Model for '{}' loaded and cached successfully.", folder_name)
            }
        }
    }
}

/// Reject anything that is not a single plain path component
pub fn validate_model_name(name: &str) -> EditorResult<&str> {
    let trimmed = name.trim();
    let mut components = Path::new(trimmed).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !trimmed.contains('/') && !trimmed.contains('\\') =>
        {
            Ok(trimmed)
        }
        _ => Err(EditorError::InvalidModelName(name.to_string())),
    }
}

struct RegistryInner {
    cache: BoundedExpiringCache<String, Arc<ModelHandle>, Arc<dyn Clock>>,
    active: Option<Arc<ModelHandle>>,
}

/// Model cache plus the active model
pub struct ModelRegistry {
    models_dir: PathBuf,
    engine: Arc<dyn TtsEngine>,
    load_timeout: Duration,
    events: EventBus,
    /// Held across the whole activation, including the engine call
    load_lock: tokio::sync::Mutex<()>,
    /// Held only for in-memory reads and updates
    inner: Mutex<RegistryInner>,
}

impl ModelRegistry {
    pub fn new(
        models_dir: PathBuf,
        engine: Arc<dyn TtsEngine>,
        policy: EvictionPolicy,
        load_timeout: Duration,
        events: EventBus,
    ) -> Self {
        Self::with_clock(models_dir, engine, policy, load_timeout, events, Arc::new(SystemClock))
    }

    pub fn with_clock(
        models_dir: PathBuf,
        engine: Arc<dyn TtsEngine>,
        policy: EvictionPolicy,
        load_timeout: Duration,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            models_dir,
            engine,
            load_timeout,
            events,
            load_lock: tokio::sync::Mutex::new(()),
            inner: Mutex::new(RegistryInner {
                cache: BoundedExpiringCache::with_clock(policy, clock),
                active: None,
            }),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Make `folder_name` the active model, loading it on a cache miss
    ///
    /// On any error the active model is left as it was.
    pub async fn activate(&self, folder_name: &str) -> EditorResult<ActivationResult> {
        let name = validate_model_name(folder_name)?.to_string();
        let _loading = self.load_lock.lock().await;

        let cached = self.lock_inner().cache.get(&name).cloned();
        let (handle, result) = match cached {
            Some(handle) => {
                debug!(folder = %name, "Model served from cache");
                (handle, ActivationResult::AlreadyLoaded)
            }
            None => {
                let folder = self.models_dir.join(&name);
                let is_dir = tokio::fs::metadata(&folder)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if !is_dir {
                    error!(folder = %folder.display(), "Model folder does not exist");
                    return Err(EditorError::ModelLoad(format!(
                        "Model folder not found: {}",
                        folder.display()
                    )));
                }

                info!(folder = %name, "Loading TTS model");
                let handle = call_bounded(
                    "model load",
                    self.load_timeout,
                    self.engine.load_model(&name, &folder),
                    EditorError::ModelLoad,
                )
                .await
                .map_err(|err| match err {
                    EditorError::Timeout { .. } => EditorError::ModelLoad(err.to_string()),
                    other => other,
                })?;

                let handle = Arc::new(handle);
                self.lock_inner().cache.put(name.clone(), handle.clone());
                (handle, ActivationResult::FreshlyLoaded)
            }
        };

        self.lock_inner().active = Some(handle);
        info!(folder = %name, result = ?result, "Active model set");

        self.events.emit_lossy(VoxEvent::ModelActivated {
            folder_name: name,
            freshly_loaded: result == ActivationResult::FreshlyLoaded,
            timestamp: Utc::now(),
        });
        Ok(result)
    }

    /// The active model; survives eviction of its cache entry
    pub fn active(&self) -> Option<Arc<ModelHandle>> {
        self.lock_inner().active.clone()
    }

    /// Live cached folder names, oldest first
    pub fn cached_models(&self) -> Vec<String> {
        self.lock_inner().cache.keys().into_iter().cloned().collect()
    }

    /// Folder names present under the models root, sorted
    pub async fn available_models(&self) -> EditorResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.models_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(EditorError::Persistence(e.to_string())),
        };
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| EditorError::Persistence(e.to_string()))?
        {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::engine::mock::{MockCall, MockEngine};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        engine: Arc<MockEngine>,
        clock: ManualClock,
        registry: ModelRegistry,
    }

    fn fixture(models: &[&str]) -> Fixture {
        let dir = TempDir::new().unwrap();
        let models_dir = dir.path().join("models");
        for m in models {
            std::fs::create_dir_all(models_dir.join(m)).unwrap();
        }
        let engine = Arc::new(MockEngine::new());
        let clock = ManualClock::new();
        let registry = ModelRegistry::with_clock(
            models_dir,
            engine.clone(),
            EvictionPolicy::default(),
            Duration::from_secs(5),
            EventBus::new(16),
            Arc::new(clock.clone()),
        );
        Fixture {
            _dir: dir,
            engine,
            clock,
            registry,
        }
    }

    fn load_calls(engine: &MockEngine) -> usize {
        engine
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::LoadModel(_)))
            .count()
    }

    #[test]
    fn test_validate_model_name() {
        assert_eq!(validate_model_name(" voiceA ").unwrap(), "voiceA");
        for bad in ["", "  ", "..", ".", "a/b", "a\\b", "/abs"] {
            assert!(validate_model_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_second_activation_hits_cache() {
        let f = fixture(&["voiceA"]);

        assert_eq!(
            f.registry.activate("voiceA").await.unwrap(),
            ActivationResult::FreshlyLoaded
        );
        assert_eq!(
            f.registry.activate("voiceA").await.unwrap(),
            ActivationResult::AlreadyLoaded
        );
        assert_eq!(load_calls(&f.engine), 1);
        assert_eq!(f.registry.active().unwrap().folder_name, "voiceA");
    }

    #[tokio::test]
    async fn test_expired_model_is_reloaded() {
        let f = fixture(&["voiceA"]);
        f.registry.activate("voiceA").await.unwrap();

        f.clock.advance(Duration::from_secs(3601));
        assert!(f.registry.cached_models().is_empty());
        // Active model outlives its cache entry
        assert!(f.registry.active().is_some());

        assert_eq!(
            f.registry.activate("voiceA").await.unwrap(),
            ActivationResult::FreshlyLoaded
        );
        assert_eq!(load_calls(&f.engine), 2);
    }

    #[tokio::test]
    async fn test_missing_folder_keeps_active_model() {
        let f = fixture(&["voiceA"]);
        f.registry.activate("voiceA").await.unwrap();

        let err = f.registry.activate("missing-folder").await.unwrap_err();
        assert!(matches!(err, EditorError::ModelLoad(_)));
        assert_eq!(f.registry.active().unwrap().folder_name, "voiceA");
        assert_eq!(load_calls(&f.engine), 1, "loader must not run for a missing folder");
    }

    #[tokio::test]
    async fn test_activation_switches_active_model() {
        let f = fixture(&["voiceA", "voiceB"]);
        f.registry.activate("voiceA").await.unwrap();
        f.registry.activate("voiceB").await.unwrap();
        assert_eq!(f.registry.active().unwrap().folder_name, "voiceB");

        f.registry.activate("voiceA").await.unwrap();
        assert_eq!(f.registry.active().unwrap().folder_name, "voiceA");
        assert_eq!(f.registry.cached_models(), vec!["voiceA", "voiceB"]);
    }

    #[tokio::test]
    async fn test_available_models_lists_folders() {
        let f = fixture(&["voiceB", "voiceA"]);
        std::fs::write(f.registry.models_dir().join("notes.txt"), "x").unwrap();

        assert_eq!(
            f.registry.available_models().await.unwrap(),
            vec!["voiceA", "voiceB"]
        );
    }

    #[test]
    fn test_activation_messages() {
        assert_eq!(
            ActivationResult::AlreadyLoaded.message("voiceA"),
            "TTS Model for 'voiceA' is already loaded."
        );
        assert_eq!(
            ActivationResult::FreshlyLoaded.message("voiceA"),
            "TTS Model for 'voiceA' loaded and cached successfully."
        );
    }
}
