//! Frame pipeline error types.

use std::time::Duration;

use framepipe_rhi::{QueueKind, RhiError, vk};
use thiserror::Error;

/// Errors surfaced by the frame pipeline.
///
/// Surface staleness is handled inside the pipeline and never appears here.
/// Every error returned from [`FramePipeline`](crate::FramePipeline) moves it
/// to the terminated phase.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Invalid configuration or a geometry/format mismatch
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A submission ran out of memory twice, the second time after the other
    /// frame slots had retired
    #[error("Submission to the {queue:?} queue failed after retry: {result}")]
    TransientSubmitFailure {
        /// Queue the submission targeted.
        queue: QueueKind,
        /// Result of the retried submission.
        result: vk::Result,
    },

    /// The device was lost
    #[error("Device lost")]
    DeviceLost,

    /// A frame slot's fence did not signal in time
    #[error("Frame slot {slot} fence not signaled within {timeout:?}")]
    FenceTimeout {
        /// Slot whose fence timed out.
        slot: usize,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The driver handed out a presentable image that was never presented
    #[error("Presentable image {0} acquired while still in use")]
    PresentableImageInUse(u32),

    /// The pipeline already failed or was shut down
    #[error("Frame pipeline terminated")]
    Terminated,

    /// Any other backend failure
    #[error("RHI error: {0}")]
    Rhi(RhiError),
}

impl From<RhiError> for FrameError {
    fn from(err: RhiError) -> Self {
        if err.is_device_lost() {
            Self::DeviceLost
        } else {
            Self::Rhi(err)
        }
    }
}

impl From<framepipe_core::Error> for FrameError {
    fn from(err: framepipe_core::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

impl From<vk::Result> for FrameError {
    fn from(result: vk::Result) -> Self {
        RhiError::VulkanError(result).into()
    }
}

/// Result type alias for frame pipeline operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_conversion() {
        let err: FrameError = RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, FrameError::DeviceLost));

        let err: FrameError = vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, FrameError::DeviceLost));
    }

    #[test]
    fn test_other_rhi_errors_are_wrapped() {
        let err: FrameError = RhiError::Timeout.into();
        assert!(matches!(err, FrameError::Rhi(RhiError::Timeout)));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: FrameError = framepipe_core::Error::Config("bad".into()).into();
        match err {
            FrameError::Configuration(msg) => assert!(msg.contains("bad")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        let err = FrameError::FenceTimeout {
            slot: 1,
            timeout: Duration::from_millis(5),
        };
        assert_eq!(err.to_string(), "Frame slot 1 fence not signaled within 5ms");
    }
}
