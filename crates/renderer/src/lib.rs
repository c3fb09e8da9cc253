//! Frame pipeline orchestration.
//!
//! This crate drives the per-frame loop on top of [`framepipe_rhi::Gpu`]:
//! - Presentable-surface management and rebuilds
//! - Frame slots and their fences/semaphores
//! - Render targets, command recording and composition
//! - Queue submission and presentation
//!
//! [`FramePipeline`] is the entry point.

pub mod composition;
mod error;
pub mod frame_sync;
pub mod pipeline;
pub mod recorder;
pub mod render_target;
pub mod submit;
pub mod surface;

pub use error::{FrameError, FrameResult};
pub use framepipe_core::{CompositionMode, FrameConfig, PresentMode, SurfaceFormat};
pub use pipeline::{FrameOutcome, FramePhase, FramePipeline, SkipReason};
pub use recorder::DrawState;
pub use surface::select_surface_format;
