//! Device abstraction consumed by the frame pipeline.
//!
//! [`Gpu`] is the seam between frame orchestration and the driver. It exposes
//! exactly the operations a frame loop needs: synchronization objects, command
//! recording, queue submission, render targets and the surface/swapchain. The
//! Vulkan implementation lives in [`crate::device::VulkanGpu`]; an in-memory
//! implementation for tests lives in `crate::mock` behind the `mock` feature.
//!
//! Handles are plain `ash::vk` handles so that recorded commands and
//! submissions read the same against either implementation.

use ash::vk;

use crate::error::RhiResult;
use crate::swapchain::SwapchainSupportDetails;

/// Queue a submission or command buffer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Queue that executes render passes.
    Graphics,
    /// Queue that executes copy and blit work.
    Transfer,
    /// Queue used for presentation.
    Present,
}

/// One queue submission: a batch of command buffers with its semaphore waits
/// and signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitDesc<'a> {
    /// Semaphores waited on before the listed stages execute.
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Pipeline stage per wait semaphore.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Command buffers executed in order.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores signaled when the batch completes.
    pub signal_semaphores: &'a [vk::Semaphore],
}

/// Parameters for a new swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    /// Format and color space of the presentable images.
    pub surface_format: vk::SurfaceFormatKHR,
    /// Present mode.
    pub present_mode: vk::PresentModeKHR,
    /// Extent of every presentable image.
    pub extent: vk::Extent2D,
    /// Minimum image count requested from the driver.
    pub min_image_count: u32,
    /// Usage of the presentable images.
    pub usage: vk::ImageUsageFlags,
    /// Surface transform, usually the surface's current transform.
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Parameters for a device-local 2D color image.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Image format.
    pub format: vk::Format,
    /// Image usage.
    pub usage: vk::ImageUsageFlags,
}

/// Arguments of a render pass begin.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    /// Render pass to begin.
    pub render_pass: vk::RenderPass,
    /// Framebuffer rendered into.
    pub framebuffer: vk::Framebuffer,
    /// Render area, anchored at the origin.
    pub extent: vk::Extent2D,
    /// Clear value of the single color attachment.
    pub clear_color: [f32; 4],
}

/// Device operations used by the frame pipeline.
///
/// Implementations borrow the device; nothing here owns the instance, device
/// or surface. Methods take `&self` so that a single device can be shared by
/// every component of a pipeline.
///
/// Destroy methods accept handles created by the same implementation and
/// ignore null handles.
pub trait Gpu {
    // =========================================================================
    // Device
    // =========================================================================

    /// Blocks until all queues are idle.
    fn wait_idle(&self) -> RhiResult<()>;

    /// Returns the capabilities of the queue family backing `queue`.
    ///
    /// Blits need `GRAPHICS`; a dedicated transfer family only offers copies.
    fn queue_flags(&self, queue: QueueKind) -> vk::QueueFlags;

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Creates an unsignaled binary semaphore.
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Creates a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Waits until every fence is signaled.
    ///
    /// Returns [`RhiError::Timeout`](crate::RhiError::Timeout) when
    /// `timeout_ns` elapses first.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> RhiResult<()>;

    /// Returns the fence to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    /// Non-blocking fence status query.
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    // =========================================================================
    // Command buffers
    // =========================================================================

    /// Allocates resettable primary command buffers for `queue`.
    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    /// Frees command buffers allocated for `queue`.
    fn free_command_buffers(&self, queue: QueueKind, command_buffers: &[vk::CommandBuffer]);

    /// Resets a command buffer to the initial state.
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Begins one-time-submit recording.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Ends recording.
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Records a render pass begin with inline contents.
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin);

    /// Records the end of the current render pass.
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);

    /// Binds a graphics pipeline.
    fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Binds a vertex buffer at binding 0.
    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    );

    /// Binds an index buffer.
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    /// Sets viewport 0.
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport);

    /// Sets scissor 0.
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D);

    /// Records a single-instance indexed draw.
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    );

    /// Records image memory barriers between two stage masks.
    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );

    /// Records an image-to-image copy between same-format images.
    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    );

    /// Records an image blit, converting formats where they differ.
    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
    );

    // =========================================================================
    // Queues
    // =========================================================================

    /// Submits one batch to `queue`, signaling `fence` (may be null) when it
    /// completes.
    fn queue_submit(
        &self,
        queue: QueueKind,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()>;

    // =========================================================================
    // Images and render targets
    // =========================================================================

    /// Creates a device-local color image with bound memory.
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;

    /// Destroys an image created by [`create_image`](Self::create_image) and
    /// frees its memory.
    fn destroy_image(&self, image: vk::Image);

    /// Creates a 2D color view over the whole image.
    fn create_image_view(&self, image: vk::Image, format: vk::Format)
    -> RhiResult<vk::ImageView>;

    /// Destroys an image view.
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Creates a single-subpass render pass with one color attachment that is
    /// cleared on load and left in `final_layout`.
    fn create_render_pass(
        &self,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> RhiResult<vk::RenderPass>;

    /// Destroys a render pass.
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Creates a framebuffer with a single color attachment.
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;

    /// Destroys a framebuffer.
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // =========================================================================
    // Surface and swapchain
    // =========================================================================

    /// Current drawable size of the window. Zero when minimized.
    fn window_extent(&self) -> vk::Extent2D;

    /// Queries what the surface supports.
    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails>;

    /// Creates a swapchain, retiring `old_swapchain` when it is not null.
    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR>;

    /// Returns the presentable images of a swapchain.
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>>;

    /// Destroys a swapchain and its presentable images.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Acquires the next presentable image, signaling `semaphore`.
    ///
    /// Returns `(image_index, suboptimal)`. Out-of-date surfaces are reported
    /// as `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;

    /// Queues `image_index` for presentation after `wait_semaphores`.
    ///
    /// Returns true when the swapchain is suboptimal.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result>;
}
