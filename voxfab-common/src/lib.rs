//! # VoxFab Common Library
//!
//! Shared code for the VoxFab services including:
//! - Error types
//! - Bootstrap configuration loading and root folder resolution
//! - Session event types (VoxEvent) and the EventBus
//! - SSE stream helpers
//! - Atomic file write helpers

pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod sse;

pub use error::{Error, Result};
