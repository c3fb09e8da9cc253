//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides the device side of the frame pipeline using the `ash`
//! crate. It handles:
//! - The [`Gpu`] trait the frame pipeline records and submits through
//! - The Vulkan implementation of it ([`device::VulkanGpu`])
//! - Swapchain capability queries and selection
//! - Command pools, synchronization primitives and color render targets
//! - An in-memory device for tests (`mock`, behind the `mock` feature)

mod error;

pub mod command;
pub mod device;
pub mod gpu;
pub mod image;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};
pub use gpu::{Gpu, ImageDesc, QueueKind, RenderPassBegin, SubmitDesc, SwapchainDesc};

// Re-export ash types that users might need
pub use ash::vk;
