//! Synchronization primitives for Vulkan.
//!
//! Thin helpers over `ash::Device` used by [`VulkanGpu`](crate::device::VulkanGpu):
//!
//! - **Semaphores** order work between queue submissions and presentation.
//!   They are created unsignaled and are binary: every signal must be
//!   consumed by exactly one wait before the semaphore is signaled again.
//!
//! - **Fences** let the CPU observe GPU completion. Frame slot fences are
//!   created signaled so the first wait on each slot returns immediately.
//!
//! Ownership of the handles stays with the caller; the frame pipeline keeps
//! them per frame slot and destroys them at teardown.

use ash::vk;
use tracing::trace;

use crate::error::{RhiError, RhiResult};

/// Creates a binary semaphore in the unsignaled state.
///
/// # Errors
///
/// Returns an error if semaphore creation fails.
pub fn create_semaphore(device: &ash::Device) -> RhiResult<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    trace!("Created semaphore {:?}", semaphore);
    Ok(semaphore)
}

/// Creates a fence.
///
/// # Arguments
///
/// * `device` - The logical device
/// * `signaled` - If true, creates the fence in the signaled state.
///   This is useful for fences that are waited on before the first
///   GPU operation that would signal them.
///
/// # Errors
///
/// Returns an error if fence creation fails.
pub fn create_fence(device: &ash::Device, signaled: bool) -> RhiResult<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = unsafe { device.create_fence(&create_info, None)? };

    trace!(
        "Created fence {:?} ({})",
        fence,
        if signaled { "signaled" } else { "unsignaled" }
    );

    Ok(fence)
}

/// Waits for every fence in `fences` to become signaled.
///
/// # Errors
///
/// Returns [`RhiError::Timeout`] when `timeout` (nanoseconds) elapses first,
/// or the Vulkan error the wait reported.
pub fn wait_for_fences(device: &ash::Device, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
    if fences.is_empty() {
        return Ok(());
    }

    match unsafe { device.wait_for_fences(fences, true, timeout) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout),
        Err(e) => Err(e.into()),
    }
}

/// Resets the fence to the unsignaled state.
///
/// The fence must not be in use by any queue operation when this is called.
pub fn reset_fence(device: &ash::Device, fence: vk::Fence) -> RhiResult<()> {
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Checks whether the fence is signaled without blocking.
pub fn fence_status(device: &ash::Device, fence: vk::Fence) -> RhiResult<bool> {
    Ok(unsafe { device.get_fence_status(fence)? })
}

/// Converts a timeout to the nanoseconds Vulkan expects, saturating at
/// `u64::MAX` (wait forever).
#[inline]
pub fn timeout_ns(timeout: std::time::Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}
