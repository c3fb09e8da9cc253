//! Composition of the rendered frame onto the presentable image.
//!
//! A [`CompositionStage`] runs in one of two configurations for the lifetime
//! of a pipeline:
//!
//! - **Direct**: the render pass draws straight into the presentable image and
//!   leaves it in `PRESENT_SRC_KHR`. The stage only owns the render targets
//!   over the presentable images.
//! - **Blit**: the render pass draws into an offscreen color image owned by
//!   the frame slot. A transfer-queue command buffer then moves it onto the
//!   presentable image:
//!
//! ```text
//! source       COLOR_ATTACHMENT_OPTIMAL -> TRANSFER_SRC_OPTIMAL
//! destination  UNDEFINED                -> TRANSFER_DST_OPTIMAL
//! copy (same format) or 1:1 blit (format conversion)
//! destination  TRANSFER_DST_OPTIMAL     -> PRESENT_SRC_KHR
//! ```
//!
//! The blit never scales: source and destination extents must match. A
//! format conversion needs a blit, which only graphics-capable queue families
//! execute; on a dedicated transfer family only same-format copies are
//! accepted.

use framepipe_core::CompositionMode;
use framepipe_rhi::command::{color_subresource_layers, color_subresource_range};
use framepipe_rhi::{Gpu, ImageDesc, QueueKind, vk};
use tracing::{debug, info, trace, warn};

use crate::error::{FrameError, FrameResult};
use crate::render_target::{RenderTarget, RenderTargetSet};
use crate::surface::SurfaceManager;

/// Stage and access masks for an image layout transition.
///
/// Returns `(src_stage, src_access, dst_stage, dst_access)`. Transitions the
/// frame loop never records fall back to a full memory barrier with a
/// warning.
pub fn layout_transition(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    match (old_layout, new_layout) {
        // Source stage matches the TRANSFER semaphore waits of the blit
        // submission so the transition runs after them.
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        | (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_SRC_OPTIMAL) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => (
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        _ => {
            warn!(
                "Unhandled layout transition: {:?} -> {:?}",
                old_layout, new_layout
            );
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}

/// Builds the barrier for a color image layout transition.
pub fn image_barrier(
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range())
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
}

fn record_transition<G: Gpu>(
    gpu: &G,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_stage, src_access, dst_stage, dst_access) = layout_transition(old_layout, new_layout);
    let barrier = image_barrier(image, old_layout, new_layout, src_access, dst_access);
    gpu.cmd_pipeline_barrier(cmd, src_stage, dst_stage, &[barrier]);
}

/// One transfer of a rendered image onto a presentable image.
#[derive(Debug, Clone, Copy)]
pub struct CompositionRequest {
    /// Rendered image.
    pub source: vk::Image,
    /// Layout the source was left in by rendering.
    pub source_layout: vk::ImageLayout,
    /// Extent of the source.
    pub source_extent: vk::Extent2D,
    /// Format of the source.
    pub source_format: vk::Format,
    /// Acquired presentable image.
    pub destination: vk::Image,
    /// Extent of the destination.
    pub destination_extent: vk::Extent2D,
    /// Format of the destination.
    pub destination_format: vk::Format,
}

/// Records `request` into `cmd`.
///
/// Same-format images are copied; differing formats are blitted 1:1, which
/// converts the format without scaling. The destination ends up in
/// `PRESENT_SRC_KHR`.
///
/// # Errors
///
/// Returns [`FrameError::Configuration`] when the extents differ, before the
/// command buffer is touched. A failure after recording began resets the
/// buffer.
pub fn record_blit<G: Gpu>(
    gpu: &G,
    cmd: vk::CommandBuffer,
    request: &CompositionRequest,
) -> FrameResult<()> {
    let extent = request.source_extent;
    if extent != request.destination_extent {
        return Err(FrameError::Configuration(format!(
            "Composition source is {}x{} but destination is {}x{}",
            extent.width,
            extent.height,
            request.destination_extent.width,
            request.destination_extent.height
        )));
    }

    gpu.reset_command_buffer(cmd)?;
    gpu.begin_command_buffer(cmd)?;

    record_transition(
        gpu,
        cmd,
        request.source,
        request.source_layout,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );
    record_transition(
        gpu,
        cmd,
        request.destination,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    if request.source_format == request.destination_format {
        let region = vk::ImageCopy {
            src_subresource: color_subresource_layers(),
            src_offset: vk::Offset3D::default(),
            dst_subresource: color_subresource_layers(),
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
        };
        gpu.cmd_copy_image(
            cmd,
            request.source,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            request.destination,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    } else {
        let corner = vk::Offset3D {
            x: extent.width as i32,
            y: extent.height as i32,
            z: 1,
        };
        let region = vk::ImageBlit {
            src_subresource: color_subresource_layers(),
            src_offsets: [vk::Offset3D::default(), corner],
            dst_subresource: color_subresource_layers(),
            dst_offsets: [vk::Offset3D::default(), corner],
        };
        gpu.cmd_blit_image(
            cmd,
            request.source,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            request.destination,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }

    record_transition(
        gpu,
        cmd,
        request.destination,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );

    if let Err(e) = gpu.end_command_buffer(cmd) {
        if let Err(reset_err) = gpu.reset_command_buffer(cmd) {
            warn!("Failed to reset transfer command buffer: {}", reset_err);
        }
        return Err(e.into());
    }

    trace!(
        "Recorded composition {:?} -> {:?} ({}x{})",
        request.source, request.destination, extent.width, extent.height
    );

    Ok(())
}

/// Render targets and, in blit mode, the offscreen images behind them.
pub struct CompositionStage {
    mode: CompositionMode,
    /// Fixed offscreen extent; `None` follows the surface.
    fixed_extent: Option<vk::Extent2D>,
    /// Offscreen color format (blit) or presentable format (direct).
    format: vk::Format,
    /// One offscreen image per frame slot (blit only).
    offscreen: Vec<vk::Image>,
    targets: RenderTargetSet,
}

impl CompositionStage {
    /// Builds the render targets for `mode`.
    ///
    /// Direct mode wraps the surface's presentable images. Blit mode creates
    /// `slots` offscreen images of `format` at `fixed_extent`, or at the
    /// surface extent when none is given.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] when blit mode needs a format
    /// conversion the transfer queue cannot execute, or the first creation
    /// failure. Nothing is leaked.
    pub fn new<G: Gpu>(
        gpu: &G,
        mode: CompositionMode,
        render_pass: vk::RenderPass,
        format: vk::Format,
        surface: &SurfaceManager,
        slots: usize,
        fixed_extent: Option<vk::Extent2D>,
    ) -> FrameResult<Self> {
        let mut stage = Self {
            mode,
            fixed_extent,
            format,
            offscreen: Vec::new(),
            targets: RenderTargetSet::default(),
        };

        if let Err(e) = stage
            .check_transfer_support(gpu, surface)
            .and_then(|()| stage.build(gpu, render_pass, surface, slots))
        {
            stage.destroy(gpu);
            return Err(e);
        }

        info!(
            "Composition stage created ({:?}, {} targets at {}x{})",
            mode,
            stage.targets.len(),
            stage.targets.extent().width,
            stage.targets.extent().height
        );

        Ok(stage)
    }

    fn check_transfer_support<G: Gpu>(
        &self,
        gpu: &G,
        surface: &SurfaceManager,
    ) -> FrameResult<()> {
        if self.mode == CompositionMode::Direct || self.format == surface.format() {
            return Ok(());
        }
        let flags = gpu.queue_flags(QueueKind::Transfer);
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            return Ok(());
        }
        Err(FrameError::Configuration(format!(
            "Converting {:?} to {:?} needs a blit, but the transfer queue family only supports {:?}",
            self.format,
            surface.format(),
            flags
        )))
    }

    fn build<G: Gpu>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        surface: &SurfaceManager,
        slots: usize,
    ) -> FrameResult<()> {
        match self.mode {
            CompositionMode::Direct => {
                self.targets = RenderTargetSet::build(
                    gpu,
                    render_pass,
                    surface.images(),
                    self.format,
                    surface.extent(),
                )?;
            }
            CompositionMode::Blit => {
                let extent = self.fixed_extent.unwrap_or(surface.extent());
                let desc = ImageDesc {
                    extent,
                    format: self.format,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                        | vk::ImageUsageFlags::TRANSFER_SRC,
                };
                for _ in 0..slots {
                    self.offscreen.push(gpu.create_image(&desc)?);
                }
                self.targets =
                    RenderTargetSet::build(gpu, render_pass, &self.offscreen, self.format, extent)?;
            }
        }
        Ok(())
    }

    /// Rebuilds the targets after the surface was rebuilt.
    ///
    /// Direct targets always follow the new presentable images. Offscreen
    /// images follow the surface extent unless a fixed extent was configured,
    /// in which case they are kept.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] when the rebuilt surface changed
    /// to a format the transfer queue cannot convert to.
    pub fn resize<G: Gpu>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        surface: &SurfaceManager,
    ) -> FrameResult<()> {
        self.check_transfer_support(gpu, surface)?;
        match self.mode {
            CompositionMode::Direct => self.targets.rebuild(
                gpu,
                render_pass,
                surface.images(),
                self.format,
                surface.extent(),
            ),
            CompositionMode::Blit if self.fixed_extent.is_some() => {
                debug!("Keeping fixed-size offscreen targets");
                Ok(())
            }
            CompositionMode::Blit => {
                let slots = self.offscreen.len();
                self.destroy(gpu);
                self.build(gpu, render_pass, surface, slots)
            }
        }
    }

    /// Releases targets that reference presentable images, ahead of the
    /// swapchain they were built over being retired. No-op in blit mode.
    pub fn release_presentable_targets<G: Gpu>(&mut self, gpu: &G) {
        if self.mode == CompositionMode::Direct {
            self.targets.destroy(gpu);
        }
    }

    /// Returns the configured mode.
    #[inline]
    pub fn mode(&self) -> CompositionMode {
        self.mode
    }

    /// Returns true in blit mode.
    #[inline]
    pub fn uses_blit(&self) -> bool {
        self.mode == CompositionMode::Blit
    }

    /// Returns the render target frame `slot` draws into when presenting
    /// `image_index`.
    pub fn target(&self, slot: usize, image_index: u32) -> Option<&RenderTarget> {
        match self.mode {
            CompositionMode::Direct => self.targets.get(image_index as usize),
            CompositionMode::Blit => self.targets.get(slot),
        }
    }

    /// Returns the extent rendering happens at.
    #[inline]
    pub fn render_extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    /// Returns the render targets.
    #[inline]
    pub fn targets(&self) -> &RenderTargetSet {
        &self.targets
    }

    /// Returns the offscreen images (empty in direct mode).
    #[inline]
    pub fn offscreen_images(&self) -> &[vk::Image] {
        &self.offscreen
    }

    /// Describes the transfer of `slot`'s offscreen image onto the acquired
    /// presentable image. `None` in direct mode.
    pub fn request(
        &self,
        slot: usize,
        surface: &SurfaceManager,
        image_index: u32,
    ) -> Option<CompositionRequest> {
        if !self.uses_blit() {
            return None;
        }
        Some(CompositionRequest {
            source: *self.offscreen.get(slot)?,
            source_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            source_extent: self.targets.extent(),
            source_format: self.format,
            destination: surface.image(image_index)?,
            destination_extent: surface.extent(),
            destination_format: surface.format(),
        })
    }

    /// Destroys targets and offscreen images. Safe to call more than once.
    ///
    /// Nothing in flight may still reference them.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        self.targets.destroy(gpu);
        for image in self.offscreen.drain(..) {
            gpu.destroy_image(image);
        }
    }
}
