//! Per-frame command recording.
//!
//! The [`CommandRecorder`] turns a [`DrawState`] into one render pass over a
//! [`RenderTarget`]: reset, begin, render pass, bind, viewport and scissor,
//! indexed draw, end. The command buffer is the frame slot's, reused every
//! frame; the caller must have waited on the slot's fence.
//!
//! Viewport and scissor are dynamic state set from the current extent every
//! frame, so the graphics pipeline survives surface resizes unchanged.

use framepipe_rhi::{Gpu, RenderPassBegin, vk};
use tracing::{trace, warn};

use crate::error::{FrameError, FrameResult};
use crate::render_target::RenderTarget;

/// What the embedder draws every frame.
///
/// The pipeline and buffers are owned by the embedder and must outlive the
/// frame pipeline. The pipeline must use dynamic viewport and scissor and be
/// compatible with a single-subpass render pass whose only attachment has
/// `color_format`.
#[derive(Debug, Clone, Copy)]
pub struct DrawState {
    /// Compiled graphics pipeline.
    pub pipeline: vk::Pipeline,
    /// Color attachment format the pipeline was built for.
    pub color_format: vk::Format,
    /// Resident vertex buffer, bound at binding 0.
    pub vertex_buffer: vk::Buffer,
    /// Byte offset into the vertex buffer.
    pub vertex_offset: vk::DeviceSize,
    /// Resident index buffer.
    pub index_buffer: vk::Buffer,
    /// Type of the indices.
    pub index_type: vk::IndexType,
    /// Number of indices drawn.
    pub index_count: u32,
}

/// Full-extent viewport with a [0, 1] depth range.
pub fn viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Full-extent scissor.
pub fn scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Records the frame's render pass.
#[derive(Debug, Clone, Copy)]
pub struct CommandRecorder {
    render_pass: vk::RenderPass,
    clear_color: [f32; 4],
}

impl CommandRecorder {
    /// Creates a recorder for `render_pass`, clearing to `clear_color`.
    pub fn new(render_pass: vk::RenderPass, clear_color: [f32; 4]) -> Self {
        Self {
            render_pass,
            clear_color,
        }
    }

    /// Returns the render pass recorded into.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Re-records `cmd` with one draw into `target` at `extent`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] for a zero extent, before the
    /// command buffer is touched. Any failure after recording began resets
    /// the buffer so no half-recorded buffer is left behind.
    pub fn record<G: Gpu>(
        &self,
        gpu: &G,
        cmd: vk::CommandBuffer,
        target: &RenderTarget,
        extent: vk::Extent2D,
        draw: &DrawState,
    ) -> FrameResult<()> {
        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::Configuration(format!(
                "Cannot record at a zero extent ({}x{})",
                extent.width, extent.height
            )));
        }

        gpu.reset_command_buffer(cmd)?;
        gpu.begin_command_buffer(cmd)?;

        gpu.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: self.render_pass,
                framebuffer: target.framebuffer,
                extent,
                clear_color: self.clear_color,
            },
        );
        gpu.cmd_bind_graphics_pipeline(cmd, draw.pipeline);
        gpu.cmd_bind_vertex_buffer(cmd, draw.vertex_buffer, draw.vertex_offset);
        gpu.cmd_bind_index_buffer(cmd, draw.index_buffer, 0, draw.index_type);
        gpu.cmd_set_viewport(cmd, &viewport(extent));
        gpu.cmd_set_scissor(cmd, &scissor(extent));
        gpu.cmd_draw_indexed(cmd, draw.index_count, 0, 0);
        gpu.cmd_end_render_pass(cmd);

        if let Err(e) = gpu.end_command_buffer(cmd) {
            if let Err(reset_err) = gpu.reset_command_buffer(cmd) {
                warn!("Failed to reset command buffer after recording error: {}", reset_err);
            }
            return Err(e.into());
        }

        trace!(
            "Recorded {} indices into {:?} at {}x{}",
            draw.index_count, target.framebuffer, extent.width, extent.height
        );

        Ok(())
    }
}
