//! Frame-slot synchronization.
//!
//! The [`FrameSynchronizer`] owns one [`FrameSlot`] per frame in flight. Each
//! slot carries the objects a single in-flight frame needs:
//! - A command buffer for recording rendering commands (and, in blit mode, a
//!   second one for the transfer queue)
//! - Semaphores for GPU-GPU synchronization
//! - A fence for CPU-GPU synchronization
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. Wait on in_flight fence (CPU waits for the previous use of this slot)
//! 2. Acquire presentable image (signals image_available)
//! 3. Reset in_flight fence, record command buffer(s)
//! 4. Submit render work (signals render_done or the image's present-ready)
//! 5. Submit blit work, blit mode only (waits image_available + render_done)
//!    The last submission signals in_flight
//! 6. Present (waits the image's present-ready semaphore)
//! 7. Advance to the next slot
//! ```
//!
//! Fences are created signaled so the first wait on every slot returns
//! immediately. Slot objects live until [`FrameSynchronizer::destroy`]; they
//! are never recreated on resize. A frame abandoned after a failed submission
//! leaves its slot's fence unsignaled and its semaphores holding signals
//! nobody waits on; [`FrameSynchronizer::recover_current`] replaces them.

use std::time::Duration;

use framepipe_core::{MAX_FRAMES_IN_FLIGHT, MIN_FRAMES_IN_FLIGHT};
use framepipe_rhi::sync::timeout_ns;
use framepipe_rhi::{Gpu, QueueKind, RhiError, vk};
use tracing::{debug, info, trace};

use crate::error::{FrameError, FrameResult};

/// Objects owned by one frame in flight.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    in_flight: vk::Fence,
    image_available: vk::Semaphore,
    render_done: vk::Semaphore,
    command_buffer: vk::CommandBuffer,
    transfer_command_buffer: Option<vk::CommandBuffer>,
}

impl FrameSlot {
    fn new<G: Gpu>(gpu: &G, with_transfer: bool) -> FrameResult<Self> {
        let mut slot = Self {
            in_flight: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            render_done: vk::Semaphore::null(),
            command_buffer: vk::CommandBuffer::null(),
            transfer_command_buffer: None,
        };

        if let Err(e) = slot.populate(gpu, with_transfer) {
            slot.destroy(gpu);
            return Err(e);
        }

        Ok(slot)
    }

    fn populate<G: Gpu>(&mut self, gpu: &G, with_transfer: bool) -> FrameResult<()> {
        // Signaled so the first wait doesn't block forever
        self.in_flight = gpu.create_fence(true)?;
        self.image_available = gpu.create_semaphore()?;
        self.render_done = gpu.create_semaphore()?;
        self.command_buffer = first_buffer(gpu.allocate_command_buffers(QueueKind::Graphics, 1)?)?;
        if with_transfer {
            self.transfer_command_buffer = Some(first_buffer(
                gpu.allocate_command_buffers(QueueKind::Transfer, 1)?,
            )?);
        }
        Ok(())
    }

    fn renew_sync_objects<G: Gpu>(&mut self, gpu: &G) -> FrameResult<()> {
        let in_flight = gpu.create_fence(true)?;
        let image_available = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_fence(in_flight);
                return Err(e.into());
            }
        };
        let render_done = match gpu.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                gpu.destroy_semaphore(image_available);
                gpu.destroy_fence(in_flight);
                return Err(e.into());
            }
        };

        gpu.destroy_fence(self.in_flight);
        gpu.destroy_semaphore(self.image_available);
        gpu.destroy_semaphore(self.render_done);
        self.in_flight = in_flight;
        self.image_available = image_available;
        self.render_done = render_done;
        Ok(())
    }

    fn destroy<G: Gpu>(&mut self, gpu: &G) {
        if self.command_buffer != vk::CommandBuffer::null() {
            gpu.free_command_buffers(QueueKind::Graphics, &[self.command_buffer]);
            self.command_buffer = vk::CommandBuffer::null();
        }
        if let Some(cmd) = self.transfer_command_buffer.take() {
            gpu.free_command_buffers(QueueKind::Transfer, &[cmd]);
        }
        if self.render_done != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.render_done);
            self.render_done = vk::Semaphore::null();
        }
        if self.image_available != vk::Semaphore::null() {
            gpu.destroy_semaphore(self.image_available);
            self.image_available = vk::Semaphore::null();
        }
        if self.in_flight != vk::Fence::null() {
            gpu.destroy_fence(self.in_flight);
            self.in_flight = vk::Fence::null();
        }
    }

    /// Fence signaled when the slot's last submission completes.
    #[inline]
    pub fn in_flight_fence(&self) -> vk::Fence {
        self.in_flight
    }

    /// Semaphore signaled when the acquired presentable image is available.
    #[inline]
    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    /// Semaphore signaled by the render submission in blit mode.
    #[inline]
    pub fn render_done(&self) -> vk::Semaphore {
        self.render_done
    }

    /// Graphics command buffer, re-recorded every frame.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Transfer command buffer, present in blit mode only.
    #[inline]
    pub fn transfer_command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.transfer_command_buffer
    }
}

fn first_buffer(buffers: Vec<vk::CommandBuffer>) -> FrameResult<vk::CommandBuffer> {
    buffers
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::InvalidHandle("No command buffer allocated".to_string()).into())
}

/// Result of waiting on a slot's fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWait {
    /// Slot that was waited on.
    pub slot: usize,
    /// True when the fence was not yet signaled and the wait blocked.
    pub blocked: bool,
}

/// Ring of frame slots addressed by `completed_frames mod N`.
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    /// Frames that completed a full acquire-present cycle.
    completed: u64,
    fence_timeout: Duration,
}

impl FrameSynchronizer {
    /// Creates `frames_in_flight` slots.
    ///
    /// With `with_transfer`, every slot also gets a transfer command buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] for a slot count outside
    /// 2..=3. Resources created before a failure are released.
    pub fn new<G: Gpu>(
        gpu: &G,
        frames_in_flight: usize,
        with_transfer: bool,
        fence_timeout: Duration,
    ) -> FrameResult<Self> {
        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&frames_in_flight) {
            return Err(FrameError::Configuration(format!(
                "frames_in_flight must be in {}..={}, got {}",
                MIN_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, frames_in_flight
            )));
        }

        let mut sync = Self {
            slots: Vec::with_capacity(frames_in_flight),
            completed: 0,
            fence_timeout,
        };

        for i in 0..frames_in_flight {
            match FrameSlot::new(gpu, with_transfer) {
                Ok(slot) => {
                    debug!("Created frame slot {}", i);
                    sync.slots.push(slot);
                }
                Err(e) => {
                    sync.destroy(gpu);
                    return Err(e);
                }
            }
        }

        info!(
            "Frame synchronizer created with {} frames in flight",
            frames_in_flight
        );

        Ok(sync)
    }

    /// Returns the number of slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true once the synchronizer has been destroyed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the current slot index.
    #[inline]
    pub fn current_index(&self) -> usize {
        if self.slots.is_empty() {
            return 0;
        }
        (self.completed % self.slots.len() as u64) as usize
    }

    /// Returns the current slot.
    #[inline]
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current_index()]
    }

    /// Returns slot `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Returns the number of frames that advanced the ring.
    #[inline]
    pub fn completed_frames(&self) -> u64 {
        self.completed
    }

    /// Returns the fence wait bound.
    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        self.fence_timeout
    }

    /// Waits until the current slot's previous submission completed.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FenceTimeout`] when the fence is not signaled
    /// within the configured timeout.
    pub fn wait<G: Gpu>(&self, gpu: &G) -> FrameResult<SlotWait> {
        let slot = self.current_index();
        let blocked = self.wait_slot(gpu, slot)?;
        Ok(SlotWait { slot, blocked })
    }

    fn wait_slot<G: Gpu>(&self, gpu: &G, slot: usize) -> FrameResult<bool> {
        let fence = self.slots[slot].in_flight;
        let blocked = !gpu.fence_status(fence)?;
        if blocked {
            trace!("Frame slot {} still in flight, waiting", slot);
        }

        match gpu.wait_for_fences(&[fence], timeout_ns(self.fence_timeout)) {
            Ok(()) => Ok(blocked),
            Err(RhiError::Timeout) => Err(FrameError::FenceTimeout {
                slot,
                timeout: self.fence_timeout,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits for every slot other than the current one.
    ///
    /// Retiring the other frames releases the memory their submissions hold,
    /// which is what a retried out-of-memory submission needs.
    pub fn wait_others<G: Gpu>(&self, gpu: &G) -> FrameResult<()> {
        let current = self.current_index();
        for slot in (0..self.slots.len()).filter(|&s| s != current) {
            self.wait_slot(gpu, slot)?;
        }
        Ok(())
    }

    /// Returns the current slot's fence to the unsignaled state.
    ///
    /// Call only once work that signals it is certain to be submitted.
    pub fn reset<G: Gpu>(&self, gpu: &G) -> FrameResult<()> {
        gpu.reset_fence(self.current().in_flight)?;
        Ok(())
    }

    /// Replaces the current slot's fence and semaphores after its frame was
    /// abandoned mid-submission. The new fence is signaled, so the next wait
    /// on the slot returns immediately. Command buffers are kept.
    ///
    /// The device must be idle.
    pub fn recover_current<G: Gpu>(&mut self, gpu: &G) -> FrameResult<()> {
        let index = self.current_index();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            RhiError::InvalidHandle(format!("No frame slot {}", index))
        })?;
        slot.renew_sync_objects(gpu)?;
        debug!("Renewed synchronization objects of frame slot {}", index);
        Ok(())
    }

    /// Moves to the next slot.
    pub fn advance(&mut self) {
        self.completed += 1;
        trace!("Advanced to frame slot {}", self.current_index());
    }

    /// Destroys every slot. Safe to call more than once.
    ///
    /// The device must be idle.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        if self.slots.is_empty() {
            return;
        }
        for slot in &mut self.slots {
            slot.destroy(gpu);
        }
        self.slots.clear();
        info!("Frame synchronizer destroyed");
    }
}
