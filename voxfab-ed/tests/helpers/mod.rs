//! Test Helper Utilities
//!
//! Shared setup for voxfab-ed integration tests: an isolated root folder,
//! the mock engine wired into every collaborator seam, and request helpers.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;
use voxfab_common::config::{RootFolderInitializer, TimeoutConfig, TomlConfig};
use voxfab_common::events::EventBus;
use voxfab_ed::engine::mock::MockEngine;
use voxfab_ed::engine::Collaborators;
use voxfab_ed::session::SessionHandle;
use voxfab_ed::AppState;

/// A fully wired service over a temp root folder
pub struct TestApp {
    pub root: TempDir,
    pub engine: Arc<MockEngine>,
    pub state: AppState,
}

impl TestApp {
    /// Service with the given model folders created under `models/`
    pub fn with_models(models: &[&str]) -> Self {
        Self::with_config(models, TomlConfig::default())
    }

    pub fn with_config(models: &[&str], config: TomlConfig) -> Self {
        let root = TempDir::new().expect("Failed to create temp root");
        let layout = RootFolderInitializer::new(root.path().to_path_buf());
        layout
            .ensure_directory_exists()
            .expect("Failed to create layout");
        for model in models {
            std::fs::create_dir_all(layout.models_dir().join(model))
                .expect("Failed to create model folder");
        }

        let engine = Arc::new(MockEngine::new());
        let state = AppState::new(layout, config, Collaborators::uniform(engine.clone()));
        Self {
            root,
            engine,
            state,
        }
    }

    pub fn router(&self) -> Router {
        voxfab_ed::build_router(self.state.clone())
    }

    pub fn layout(&self) -> &RootFolderInitializer {
        &self.state.layout
    }
}

/// A bare session over a temp work directory
pub fn session_fixture() -> (TempDir, Arc<MockEngine>, SessionHandle) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let engine = Arc::new(MockEngine::new());
    let session = SessionHandle::new(
        &dir.path().join("work"),
        engine.clone(),
        engine.clone(),
        EventBus::new(64),
        TimeoutConfig::default(),
    );
    (dir, engine, session)
}

/// Timeouts short enough to expire in a test
pub fn short_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        model_load_secs: 1,
        synthesis_secs: 1,
        transform_secs: 1,
        dataset_secs: 1,
    }
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.expect("Request failed");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

pub async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub fn wav_duration(path: &Path) -> f64 {
    voxfab_ed::engine::mock::duration_secs(path).expect("Failed to read WAV")
}

pub fn wav_samples(path: &Path) -> usize {
    voxfab_ed::engine::mock::read_samples(path)
        .expect("Failed to read WAV")
        .len()
}

/// Wait until `cond` holds, polling every 10 ms for up to 2 s
pub async fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
