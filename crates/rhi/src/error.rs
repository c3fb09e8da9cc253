//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// Surface query or capability error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A bounded wait expired before the GPU signaled
    #[error("Timed out waiting for the GPU")]
    Timeout,
}

impl RhiError {
    /// Returns true if the error reports a lost device.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST))
    }

    /// Returns true for out-of-memory results that may succeed once in-flight
    /// work has retired.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::VulkanError(
                ash::vk::Result::ERROR_OUT_OF_HOST_MEMORY
                    | ash::vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            )
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_device_lost_classification() {
        assert!(RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_device_lost());
        assert!(!RhiError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY).is_device_lost());
        assert!(!RhiError::Timeout.is_device_lost());
    }

    #[test]
    fn test_out_of_memory_classification() {
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY).is_out_of_memory());
        assert!(RhiError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_out_of_memory());
        assert!(!RhiError::from(vk::Result::ERROR_DEVICE_LOST).is_out_of_memory());
    }
}
