//! HTTP and WebSocket API handlers for voxfab-ed

pub mod artifact;
pub mod channel;
pub mod datasets;
pub mod health;
pub mod models;
pub mod sse;

pub use artifact::artifact_routes;
pub use channel::channel_routes;
pub use datasets::dataset_routes;
pub use health::health_routes;
pub use models::model_routes;
pub use sse::event_stream;
