//! voxfab-ed library interface
//!
//! Voice editing service: model cache and activation, the working-audio
//! session, streamed edits and dataset collection. Exposed as a library so
//! integration tests can build the router directly.

pub mod api;
pub mod cache;
pub mod dataset;
pub mod edit;
pub mod engine;
pub mod error;
pub mod registry;
pub mod session;

pub use crate::error::{ApiError, ApiResult, EditorError, EditorResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voxfab_common::config::{RootFolderInitializer, TomlConfig};
use voxfab_common::events::EventBus;

use crate::cache::EvictionPolicy;
use crate::dataset::DatasetCollector;
use crate::engine::Collaborators;
use crate::registry::ModelRegistry;
use crate::session::SessionHandle;

/// Capacity of the session event broadcast channel
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Model cache and active model
    pub registry: Arc<ModelRegistry>,
    /// The working-audio session
    pub session: SessionHandle,
    pub dataset: Arc<DatasetCollector>,
    /// Validation and feature extraction collaborators
    pub collaborators: Collaborators,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Directory layout under the root folder
    pub layout: RootFolderInitializer,
    pub config: Arc<TomlConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Wire every component from the resolved layout and configuration
    pub fn new(
        layout: RootFolderInitializer,
        config: TomlConfig,
        collaborators: Collaborators,
    ) -> Self {
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
        let policy = EvictionPolicy::new(config.cache.capacity, config.cache.ttl());

        let registry = ModelRegistry::new(
            layout.models_dir(),
            collaborators.tts.clone(),
            policy,
            config.timeouts.model_load(),
            event_bus.clone(),
        );
        let session = SessionHandle::new(
            &layout.work_dir(),
            collaborators.tts.clone(),
            collaborators.dsp.clone(),
            event_bus.clone(),
            config.timeouts.clone(),
        );
        let dataset = DatasetCollector::new(layout.kept_dir());

        Self {
            registry: Arc::new(registry),
            session,
            dataset: Arc::new(dataset),
            collaborators,
            event_bus,
            layout,
            config: Arc::new(config),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::health_routes())
        .merge(api::model_routes())
        .merge(api::artifact_routes())
        .merge(api::dataset_routes())
        .merge(api::channel_routes())
        .route("/events", axum::routing::get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
