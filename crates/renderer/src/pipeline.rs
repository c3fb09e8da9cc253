//! The frame pipeline orchestrator.
//!
//! [`FramePipeline`] ties the surface, the frame slots, the render targets,
//! the recorder, the composition stage and the submitter into one per-frame
//! state machine:
//!
//! ```text
//! Idle -> WaitFence -> Acquire -+-> Stale -> RebuildTargets -> Idle
//!                               |
//!                               +-> Record -> Submit -> Blit? -> Present -+-> Stale -> Idle (no advance)
//!                                                                         |
//!                                                                         +-> Ok -> Idle (advance)
//! ```
//!
//! A [`FrameError::TransientSubmitFailure`] abandons the frame: the slot's
//! synchronization objects are renewed, the surface is marked stale and the
//! pipeline stays usable. Any other error moves the pipeline to
//! [`FramePhase::Terminated`]; every later call returns
//! [`FrameError::Terminated`].
//!
//! # Example
//!
//! ```no_run
//! use framepipe_core::FrameConfig;
//! use framepipe_renderer::{DrawState, FrameOutcome, FramePipeline};
//! use framepipe_rhi::Gpu;
//!
//! # fn example<G: Gpu>(gpu: &G, draw: DrawState) -> framepipe_renderer::FrameResult<()> {
//! let mut pipeline = FramePipeline::create(gpu, FrameConfig::default(), draw)?;
//!
//! for _ in 0..3 {
//!     match pipeline.render_frame()? {
//!         FrameOutcome::Presented { extent, .. } => {
//!             println!("presented at {}x{}", extent.width, extent.height);
//!         }
//!         FrameOutcome::Skipped(reason) => println!("skipped: {:?}", reason),
//!     }
//! }
//!
//! pipeline.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use framepipe_core::{CompositionMode, FrameConfig};
use framepipe_rhi::{Gpu, RhiError, vk};
use tracing::{debug, error, info, warn};

use crate::composition::{CompositionStage, record_blit};
use crate::error::{FrameError, FrameResult};
use crate::frame_sync::FrameSynchronizer;
use crate::recorder::{CommandRecorder, DrawState};
use crate::submit::{SubmissionPlan, present, submit_blit, submit_render};
use crate::surface::{AcquireStatus, PresentStatus, SurfaceManager, SurfacePreferences};

/// Where the pipeline is in its per-frame state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Between frames.
    Idle,
    /// Waiting for the slot's previous submission.
    WaitFence,
    /// Acquiring a presentable image.
    Acquire,
    /// Rebuilding the surface and render targets.
    RebuildTargets,
    /// Recording command buffers.
    Record,
    /// Submitting render work.
    Submit,
    /// Submitting composition work.
    Blit,
    /// Presenting.
    Present,
    /// Failed or shut down.
    Terminated,
}

/// Why a frame produced no presented image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The window has a zero extent.
    Minimized,
    /// Acquisition found the surface stale and it was rebuilt.
    SurfaceRebuilt,
    /// Presentation found the surface stale; the slot did not advance.
    PresentStale,
}

/// Result of one [`FramePipeline::render_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was presented.
    Presented {
        /// Frame slot used.
        slot: usize,
        /// Presentable index presented.
        image_index: u32,
        /// Extent of the presented image.
        extent: vk::Extent2D,
    },
    /// Nothing was presented.
    Skipped(SkipReason),
}

/// Frame pipeline over a borrowed device.
pub struct FramePipeline<'g, G: Gpu> {
    gpu: &'g G,
    config: FrameConfig,
    draw: DrawState,
    surface: SurfaceManager,
    sync: FrameSynchronizer,
    render_pass: vk::RenderPass,
    recorder: CommandRecorder,
    composition: CompositionStage,
    phase: FramePhase,
    frames_presented: u64,
    destroyed: bool,
}

impl<'g, G: Gpu> FramePipeline<'g, G> {
    /// Builds every frame pipeline resource.
    ///
    /// In direct composition `draw.color_format` must match the surface
    /// format (see [`select_surface_format`](crate::select_surface_format));
    /// in blit composition it is the offscreen format.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] for an invalid configuration, a
    /// zero-sized surface, unsupported presentable usage or a draw format
    /// mismatch. Resources created before a failure are released.
    pub fn create(gpu: &'g G, config: FrameConfig, draw: DrawState) -> FrameResult<Self> {
        config.validate()?;

        if draw.pipeline == vk::Pipeline::null() {
            return Err(FrameError::Configuration(
                "Draw state has no graphics pipeline".to_string(),
            ));
        }

        let mut surface = SurfaceManager::new(gpu, SurfacePreferences::from_config(&config))?;

        let (color_format, final_layout) = match config.composition {
            CompositionMode::Direct => {
                if draw.color_format != surface.format() {
                    surface.destroy(gpu);
                    return Err(FrameError::Configuration(format!(
                        "Graphics pipeline targets {:?} but the surface is {:?}",
                        draw.color_format,
                        surface.format()
                    )));
                }
                (surface.format(), vk::ImageLayout::PRESENT_SRC_KHR)
            }
            CompositionMode::Blit => (draw.color_format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        };

        let render_pass = match gpu.create_render_pass(color_format, final_layout) {
            Ok(render_pass) => render_pass,
            Err(e) => {
                surface.destroy(gpu);
                return Err(e.into());
            }
        };

        let mut sync = match FrameSynchronizer::new(
            gpu,
            config.frames_in_flight,
            config.uses_blit(),
            Duration::from_millis(config.fence_timeout_ms),
        ) {
            Ok(sync) => sync,
            Err(e) => {
                gpu.destroy_render_pass(render_pass);
                surface.destroy(gpu);
                return Err(e);
            }
        };

        let fixed_extent = config
            .offscreen_extent
            .map(|[width, height]| vk::Extent2D { width, height });

        let composition = match CompositionStage::new(
            gpu,
            config.composition,
            render_pass,
            color_format,
            &surface,
            sync.len(),
            fixed_extent,
        ) {
            Ok(composition) => composition,
            Err(e) => {
                sync.destroy(gpu);
                gpu.destroy_render_pass(render_pass);
                surface.destroy(gpu);
                return Err(e);
            }
        };

        info!(
            "Frame pipeline created: {:?} composition, {} frames in flight, {}x{}",
            config.composition,
            sync.len(),
            surface.extent().width,
            surface.extent().height
        );

        Ok(Self {
            gpu,
            recorder: CommandRecorder::new(render_pass, config.clear_color),
            config,
            draw,
            surface,
            sync,
            render_pass,
            composition,
            phase: FramePhase::Idle,
            frames_presented: 0,
            destroyed: false,
        })
    }

    /// Runs one iteration of the frame loop.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TransientSubmitFailure`] when a submission ran
    /// out of memory twice; the frame is dropped and the next call rebuilds
    /// the surface. Any other error is fatal: the pipeline is terminated and
    /// every later call returns [`FrameError::Terminated`].
    pub fn render_frame(&mut self) -> FrameResult<FrameOutcome> {
        if self.phase == FramePhase::Terminated {
            return Err(FrameError::Terminated);
        }

        match self.run_frame() {
            Ok(outcome) => {
                self.phase = FramePhase::Idle;
                Ok(outcome)
            }
            Err(e @ FrameError::TransientSubmitFailure { .. }) => Err(self.abandon_frame(e)),
            Err(e) => Err(self.terminate(e)),
        }
    }

    /// Drops a frame whose submission failed after acquisition.
    ///
    /// The acquired image is never presented; marking the surface stale makes
    /// the next call rebuild the ring, which releases it.
    fn abandon_frame(&mut self, err: FrameError) -> FrameError {
        warn!(
            "Frame on slot {} abandoned in {:?}: {}",
            self.sync.current_index(),
            self.phase,
            err
        );

        let recovered = self
            .gpu
            .wait_idle()
            .map_err(FrameError::from)
            .and_then(|()| self.sync.recover_current(self.gpu));

        match recovered {
            Ok(()) => {
                self.surface.invalidate();
                self.phase = FramePhase::Idle;
                err
            }
            Err(e) => self.terminate(e),
        }
    }

    fn run_frame(&mut self) -> FrameResult<FrameOutcome> {
        let window = self.gpu.window_extent();
        if window.width == 0 || window.height == 0 {
            debug!("Window minimized, skipping frame");
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }

        self.phase = FramePhase::WaitFence;
        let wait = self.sync.wait(self.gpu)?;
        let slot_index = wait.slot;
        let slot = *self.sync.current();

        self.phase = FramePhase::Acquire;
        let image_index = match self.surface.acquire(self.gpu, slot.image_available())? {
            AcquireStatus::Ok { image_index, .. } => image_index,
            AcquireStatus::Stale => {
                self.phase = FramePhase::RebuildTargets;
                self.rebuild()?;
                return Ok(FrameOutcome::Skipped(SkipReason::SurfaceRebuilt));
            }
        };

        // Reset only once work that signals the fence is certain to follow.
        self.sync.reset(self.gpu)?;

        self.phase = FramePhase::Record;
        let extent = self.composition.render_extent();
        let target = *self
            .composition
            .target(slot_index, image_index)
            .ok_or_else(|| {
                RhiError::InvalidHandle(format!(
                    "No render target for slot {} / image {}",
                    slot_index, image_index
                ))
            })?;
        self.recorder
            .record(self.gpu, slot.command_buffer(), &target, extent, &self.draw)?;

        let present_ready = self.surface.present_ready(image_index).ok_or_else(|| {
            RhiError::InvalidHandle(format!("No present semaphore for image {}", image_index))
        })?;

        let plan = match self
            .composition
            .request(slot_index, &self.surface, image_index)
        {
            Some(request) => {
                let plan = SubmissionPlan::blit(&slot, image_index, present_ready)?;
                if let Some(blit) = &plan.blit {
                    record_blit(self.gpu, blit.command_buffer, &request)?;
                }
                plan
            }
            None => SubmissionPlan::direct(&slot, image_index, present_ready),
        };

        self.phase = FramePhase::Submit;
        submit_render(self.gpu, &self.sync, &plan)?;

        if plan.blit.is_some() {
            self.phase = FramePhase::Blit;
            submit_blit(self.gpu, &self.sync, &plan)?;
        }

        self.phase = FramePhase::Present;
        match present(self.gpu, &mut self.surface, &plan)? {
            PresentStatus::Ok => {
                self.sync.advance();
                self.frames_presented += 1;
                Ok(FrameOutcome::Presented {
                    slot: slot_index,
                    image_index,
                    extent: self.surface.extent(),
                })
            }
            PresentStatus::Stale => {
                debug!(
                    "Present found the surface stale, frame slot {} not advanced",
                    slot_index
                );
                Ok(FrameOutcome::Skipped(SkipReason::PresentStale))
            }
        }
    }

    fn rebuild(&mut self) -> FrameResult<()> {
        self.gpu.wait_idle()?;

        self.composition.release_presentable_targets(self.gpu);
        self.surface.rebuild(self.gpu)?;

        if self.composition.mode() == CompositionMode::Direct
            && self.surface.format() != self.draw.color_format
        {
            return Err(FrameError::Configuration(format!(
                "Surface format changed to {:?}, graphics pipeline targets {:?}",
                self.surface.format(),
                self.draw.color_format
            )));
        }

        self.composition
            .resize(self.gpu, self.render_pass, &self.surface)?;

        info!(
            "Frame targets rebuilt at {}x{}",
            self.surface.extent().width,
            self.surface.extent().height
        );

        Ok(())
    }

    /// Rebuilds the surface and render targets now instead of on the next
    /// stale acquisition.
    ///
    /// # Errors
    ///
    /// Returns the rebuild failure and terminates the pipeline.
    pub fn rebuild_targets(&mut self) -> FrameResult<()> {
        if self.phase == FramePhase::Terminated {
            return Err(FrameError::Terminated);
        }
        self.phase = FramePhase::RebuildTargets;
        match self.rebuild() {
            Ok(()) => {
                self.phase = FramePhase::Idle;
                Ok(())
            }
            Err(e) => Err(self.terminate(e)),
        }
    }

    /// Reports a window resize. The next frame rebuilds the surface.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Terminated`] after a fatal error or shutdown.
    pub fn notify_resize(&mut self) -> FrameResult<()> {
        if self.phase == FramePhase::Terminated {
            return Err(FrameError::Terminated);
        }
        self.surface.invalidate();
        Ok(())
    }

    /// Waits for the device to go idle and destroys every resource.
    ///
    /// Safe to call more than once and after a fatal error.
    ///
    /// # Errors
    ///
    /// Returns the idle wait's failure. Resources are destroyed regardless.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        if self.destroyed {
            return Ok(());
        }

        let idle = self.gpu.wait_idle();
        self.destroy_resources();
        self.phase = FramePhase::Terminated;

        info!(
            "Frame pipeline shut down after {} presented frames",
            self.frames_presented
        );

        idle.map_err(FrameError::from)
    }

    fn terminate(&mut self, err: FrameError) -> FrameError {
        error!("Frame pipeline terminated in {:?}: {}", self.phase, err);
        self.phase = FramePhase::Terminated;
        err
    }

    fn destroy_resources(&mut self) {
        if self.destroyed {
            return;
        }
        self.composition.destroy(self.gpu);
        self.gpu.destroy_render_pass(self.render_pass);
        self.render_pass = vk::RenderPass::null();
        self.sync.destroy(self.gpu);
        self.surface.destroy(self.gpu);
        self.destroyed = true;
    }

    /// Returns the current phase.
    #[inline]
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Returns the slot the next frame uses.
    #[inline]
    pub fn frame_index(&self) -> usize {
        self.sync.current_index()
    }

    /// Returns the number of frames presented to an up-to-date surface.
    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Returns the presentable image extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.surface.extent()
    }

    /// Returns the presentable image format and color space.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface.surface_format()
    }

    /// Returns the render pass draws are recorded into.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Returns the frame slots.
    #[inline]
    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    /// Returns the surface manager.
    #[inline]
    pub fn surface(&self) -> &SurfaceManager {
        &self.surface
    }

    /// Returns the composition stage.
    #[inline]
    pub fn composition(&self) -> &CompositionStage {
        &self.composition
    }

    /// Returns the configuration the pipeline was created with.
    #[inline]
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<G: Gpu> Drop for FramePipeline<'_, G> {
    fn drop(&mut self) {
        if self.destroyed {
            return;
        }
        // Wait for all GPU work to complete before destroying resources
        if let Err(e) = self.gpu.wait_idle() {
            error!("Failed to wait for device idle during pipeline drop: {}", e);
        }
        self.destroy_resources();
    }
}
