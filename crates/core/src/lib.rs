//! Core utilities for the frame pipeline.
//!
//! This crate provides foundational types used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame pipeline configuration

mod config;
mod error;
mod logging;

pub use config::{
    CompositionMode, DEFAULT_FRAMES_IN_FLIGHT, FrameConfig, MAX_FRAMES_IN_FLIGHT,
    MIN_FRAMES_IN_FLIGHT, PresentMode, SurfaceFormat,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
