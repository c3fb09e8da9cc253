//! Queue submission and presentation.
//!
//! A [`SubmissionPlan`] spells out the semaphore chain of one frame before
//! anything is submitted:
//!
//! ```text
//! direct:  render (graphics)  waits image_available  signals present_ready[i]  + fence
//!          present            waits present_ready[i]
//!
//! blit:    render (graphics)  waits -                signals render_done
//!          blit   (transfer)  waits image_available  signals present_ready[i]  + fence
//!                                   render_done
//!          present            waits present_ready[i]
//! ```
//!
//! The image-available wait belongs to the first submission that touches the
//! presentable image, and the slot fence to the last submission of the frame.

use framepipe_rhi::{Gpu, QueueKind, RhiError, SubmitDesc, vk};
use tracing::{trace, warn};

use crate::error::{FrameError, FrameResult};
use crate::frame_sync::{FrameSlot, FrameSynchronizer};
use crate::surface::{PresentStatus, SurfaceManager};

/// One queue submission of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedSubmit {
    /// Target queue.
    pub queue: QueueKind,
    /// Command buffer executed.
    pub command_buffer: vk::CommandBuffer,
    /// Semaphores waited on.
    pub wait_semaphores: Vec<vk::Semaphore>,
    /// Stage each wait applies to.
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    /// Semaphores signaled on completion.
    pub signal_semaphores: Vec<vk::Semaphore>,
    /// Fence signaled on completion, null if none.
    pub fence: vk::Fence,
}

/// Every submission and the present of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    /// Render submission.
    pub render: PlannedSubmit,
    /// Composition submission, blit mode only.
    pub blit: Option<PlannedSubmit>,
    /// Presentable index presented.
    pub image_index: u32,
    /// Semaphore the present waits on.
    pub present_wait: vk::Semaphore,
}

impl SubmissionPlan {
    /// Plans a frame rendered straight into the presentable image.
    pub fn direct(slot: &FrameSlot, image_index: u32, present_ready: vk::Semaphore) -> Self {
        Self {
            render: PlannedSubmit {
                queue: QueueKind::Graphics,
                command_buffer: slot.command_buffer(),
                wait_semaphores: vec![slot.image_available()],
                wait_stages: vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                signal_semaphores: vec![present_ready],
                fence: slot.in_flight_fence(),
            },
            blit: None,
            image_index,
            present_wait: present_ready,
        }
    }

    /// Plans a frame rendered offscreen and blitted onto the presentable image.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot has no transfer command buffer.
    pub fn blit(
        slot: &FrameSlot,
        image_index: u32,
        present_ready: vk::Semaphore,
    ) -> FrameResult<Self> {
        let transfer = slot.transfer_command_buffer().ok_or_else(|| {
            RhiError::InvalidHandle("Frame slot has no transfer command buffer".to_string())
        })?;

        Ok(Self {
            render: PlannedSubmit {
                queue: QueueKind::Graphics,
                command_buffer: slot.command_buffer(),
                wait_semaphores: Vec::new(),
                wait_stages: Vec::new(),
                signal_semaphores: vec![slot.render_done()],
                fence: vk::Fence::null(),
            },
            blit: Some(PlannedSubmit {
                queue: QueueKind::Transfer,
                command_buffer: transfer,
                wait_semaphores: vec![slot.image_available(), slot.render_done()],
                wait_stages: vec![
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                ],
                signal_semaphores: vec![present_ready],
                fence: slot.in_flight_fence(),
            }),
            image_index,
            present_wait: present_ready,
        })
    }
}

fn queue_submit<G: Gpu>(gpu: &G, submit: &PlannedSubmit) -> Result<(), RhiError> {
    let command_buffers = [submit.command_buffer];
    gpu.queue_submit(
        submit.queue,
        &SubmitDesc {
            wait_semaphores: &submit.wait_semaphores,
            wait_stages: &submit.wait_stages,
            command_buffers: &command_buffers,
            signal_semaphores: &submit.signal_semaphores,
        },
        submit.fence,
    )
}

/// Submits `submit`, retrying once when the driver runs out of memory.
///
/// Before the retry every other frame slot is waited on, releasing whatever
/// their submissions hold.
///
/// # Errors
///
/// Returns [`FrameError::TransientSubmitFailure`] when the retry runs out of
/// memory as well, or the submission's error.
pub fn submit_with_retry<G: Gpu>(
    gpu: &G,
    sync: &FrameSynchronizer,
    submit: &PlannedSubmit,
) -> FrameResult<()> {
    match queue_submit(gpu, submit) {
        Ok(()) => Ok(()),
        Err(e) if e.is_out_of_memory() => {
            warn!(
                "{:?} submission failed ({}), retrying after other frames retire",
                submit.queue, e
            );
            sync.wait_others(gpu)?;
            queue_submit(gpu, submit).map_err(|e| {
                let out_of_memory = e.is_out_of_memory();
                match e {
                    RhiError::VulkanError(result) if out_of_memory => {
                        FrameError::TransientSubmitFailure {
                            queue: submit.queue,
                            result,
                        }
                    }
                    other => other.into(),
                }
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Submits the render work of `plan`.
pub fn submit_render<G: Gpu>(
    gpu: &G,
    sync: &FrameSynchronizer,
    plan: &SubmissionPlan,
) -> FrameResult<()> {
    submit_with_retry(gpu, sync, &plan.render)?;
    trace!("Submitted render for image {}", plan.image_index);
    Ok(())
}

/// Submits the composition work of `plan`, if any.
pub fn submit_blit<G: Gpu>(
    gpu: &G,
    sync: &FrameSynchronizer,
    plan: &SubmissionPlan,
) -> FrameResult<()> {
    if let Some(blit) = &plan.blit {
        submit_with_retry(gpu, sync, blit)?;
        trace!("Submitted blit for image {}", plan.image_index);
    }
    Ok(())
}

/// Presents the image of `plan` once its present-ready semaphore signals.
pub fn present<G: Gpu>(
    gpu: &G,
    surface: &mut SurfaceManager,
    plan: &SubmissionPlan,
) -> FrameResult<PresentStatus> {
    surface.present(gpu, plan.image_index, &[plan.present_wait])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use framepipe_rhi::mock::{GpuEvent, MockGpu};

    use super::*;

    fn sync(gpu: &MockGpu, with_transfer: bool) -> FrameSynchronizer {
        FrameSynchronizer::new(gpu, 2, with_transfer, Duration::from_millis(100)).unwrap()
    }

    fn recorded(gpu: &MockGpu, cmd: vk::CommandBuffer) {
        gpu.begin_command_buffer(cmd).unwrap();
        gpu.end_command_buffer(cmd).unwrap();
    }

    fn submits(gpu: &MockGpu) -> usize {
        gpu.events()
            .iter()
            .filter(|e| matches!(e, GpuEvent::Submit { .. }))
            .count()
    }

    #[test]
    fn test_direct_plan() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, false);
        let slot = sync.current();
        let ready = gpu.create_semaphore().unwrap();

        let plan = SubmissionPlan::direct(slot, 2, ready);
        assert_eq!(plan.render.queue, QueueKind::Graphics);
        assert_eq!(plan.render.wait_semaphores, vec![slot.image_available()]);
        assert_eq!(plan.render.signal_semaphores, vec![ready]);
        assert_eq!(plan.render.fence, slot.in_flight_fence());
        assert!(plan.blit.is_none());
        assert_eq!(plan.present_wait, ready);
        assert_eq!(plan.image_index, 2);
    }

    #[test]
    fn test_blit_plan_chains_render_then_blit() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, true);
        let slot = sync.current();
        let ready = gpu.create_semaphore().unwrap();

        let plan = SubmissionPlan::blit(slot, 0, ready).unwrap();
        assert!(plan.render.wait_semaphores.is_empty());
        assert_eq!(plan.render.signal_semaphores, vec![slot.render_done()]);
        assert_eq!(plan.render.fence, vk::Fence::null());

        let blit = plan.blit.unwrap();
        assert_eq!(blit.queue, QueueKind::Transfer);
        assert_eq!(
            blit.wait_semaphores,
            vec![slot.image_available(), slot.render_done()]
        );
        assert_eq!(blit.wait_stages.len(), 2);
        assert_eq!(blit.signal_semaphores, vec![ready]);
        assert_eq!(blit.fence, slot.in_flight_fence());
    }

    #[test]
    fn test_blit_plan_requires_transfer_buffer() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, false);
        let ready = gpu.create_semaphore().unwrap();
        assert!(SubmissionPlan::blit(sync.current(), 0, ready).is_err());
    }

    #[test]
    fn test_out_of_memory_is_retried_once() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, false);
        let cmd = sync.current().command_buffer();
        recorded(&gpu, cmd);

        let submit = PlannedSubmit {
            queue: QueueKind::Graphics,
            command_buffer: cmd,
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: vk::Fence::null(),
        };

        gpu.push_submit_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        submit_with_retry(&gpu, &sync, &submit).unwrap();
        assert_eq!(submits(&gpu), 1);
    }

    #[test]
    fn test_second_out_of_memory_is_transient_failure() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, false);
        let cmd = sync.current().command_buffer();
        recorded(&gpu, cmd);

        let submit = PlannedSubmit {
            queue: QueueKind::Graphics,
            command_buffer: cmd,
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: vk::Fence::null(),
        };

        gpu.push_submit_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        gpu.push_submit_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        match submit_with_retry(&gpu, &sync, &submit) {
            Err(FrameError::TransientSubmitFailure { queue, result }) => {
                assert_eq!(queue, QueueKind::Graphics);
                assert_eq!(result, vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(submits(&gpu), 0);
    }

    #[test]
    fn test_other_submit_errors_are_not_retried() {
        let gpu = MockGpu::new(8, 8);
        let sync = sync(&gpu, false);
        let submit = PlannedSubmit {
            queue: QueueKind::Graphics,
            command_buffer: sync.current().command_buffer(),
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: vk::Fence::null(),
        };

        gpu.push_submit_result(vk::Result::ERROR_DEVICE_LOST);
        gpu.push_submit_result(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(
            submit_with_retry(&gpu, &sync, &submit),
            Err(FrameError::DeviceLost)
        ));
    }
}
