//! In-memory [`Gpu`] for tests.
//!
//! [`MockGpu`] behaves like a single device whose queues finish work the moment
//! the CPU waits for it. Submissions execute their recorded commands
//! immediately against CPU-side pixel buffers, while fences only report
//! completion once they are waited on. That keeps the observable ordering of a
//! real device (a fence wait "blocks" exactly when the slot is still in flight)
//! without any threads or timing.
//!
//! Along the way the mock checks the synchronization protocol and records
//! every breach in [`MockGpu::violations`]:
//!
//! - re-recording or resetting a command buffer that is still pending
//! - waiting on a semaphore nothing signaled, or signaling one twice
//! - submitting with a fence that is still signaled or pending
//! - presenting an image that was not acquired or is not in `PRESENT_SRC_KHR`
//! - copies from or to images in the wrong layout, or out of bounds
//! - draws without viewport, scissor or pipeline, or with a viewport that does
//!   not match the render area
//! - destroying images that still have views
//!
//! Faults can be injected for acquire, present and submit results, image view
//! creation, stalled fences and device loss.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use ash::vk::{self, Handle};

use crate::error::{RhiError, RhiResult};
use crate::gpu::{Gpu, ImageDesc, QueueKind, RenderPassBegin, SubmitDesc, SwapchainDesc};
use crate::swapchain::SwapchainSupportDetails;

/// Something the mock device observed, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuEvent {
    /// `wait_idle` was called.
    WaitIdle,
    /// A fence was waited on. `blocked` is true when it was not yet signaled.
    FenceWait {
        /// Fence waited on.
        fence: vk::Fence,
        /// Whether the wait had to wait for outstanding work.
        blocked: bool,
    },
    /// A fence was reset.
    FenceReset(vk::Fence),
    /// A command buffer was reset.
    CommandBufferReset(vk::CommandBuffer),
    /// A command buffer began recording.
    CommandBufferBegin(vk::CommandBuffer),
    /// A batch was submitted.
    Submit {
        /// Target queue.
        queue: QueueKind,
        /// Command buffers in the batch.
        command_buffers: Vec<vk::CommandBuffer>,
        /// Semaphores waited on.
        wait_semaphores: Vec<vk::Semaphore>,
        /// Semaphores signaled.
        signal_semaphores: Vec<vk::Semaphore>,
        /// Fence signaled on completion (may be null).
        fence: vk::Fence,
    },
    /// A presentable image was acquired.
    Acquire {
        /// Acquired index.
        image_index: u32,
    },
    /// Acquisition reported an out-of-date swapchain.
    AcquireOutOfDate,
    /// An image was queued for presentation.
    Present {
        /// Presented index.
        image_index: u32,
        /// Semaphores the present waited on.
        wait_semaphores: Vec<vk::Semaphore>,
    },
    /// A swapchain was created.
    SwapchainCreated {
        /// Extent of the new presentable images.
        extent: vk::Extent2D,
        /// Number of presentable images.
        image_count: u32,
    },
}

/// Contents of a presentable image at the moment it was presented.
#[derive(Debug, Clone, PartialEq)]
pub struct PresentedFrame {
    /// Presented index.
    pub image_index: u32,
    /// Image extent.
    pub extent: vk::Extent2D,
    /// Row-major pixels packed with [`pack_color`].
    pub pixels: Vec<u32>,
}

/// Packs a float RGBA color into the `u32` the mock stores per pixel.
pub fn pack_color(color: [f32; 4]) -> u32 {
    color
        .iter()
        .enumerate()
        .map(|(channel, value)| ((value.clamp(0.0, 1.0) * 255.0).round() as u32) << (channel * 8))
        .fold(0, |packed, channel| packed | channel)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug, Clone)]
enum Command {
    BeginRenderPass(RenderPassBegin),
    EndRenderPass,
    BindPipeline,
    BindIndexBuffer,
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    DrawIndexed,
    Barrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        transitions: Vec<(vk::Image, vk::ImageLayout, vk::ImageLayout)>,
    },
    Copy {
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        src_offset: vk::Offset3D,
        dst_offset: vk::Offset3D,
        extent: vk::Extent3D,
    },
}

struct CommandBufferData {
    queue: QueueKind,
    state: CommandBufferState,
    commands: Vec<Command>,
    batch: u64,
}

struct FenceData {
    signaled: bool,
    pending_batch: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageOwner {
    Offscreen,
    Swapchain,
}

struct ImageData {
    extent: vk::Extent2D,
    format: vk::Format,
    layout: vk::ImageLayout,
    pixels: Vec<u32>,
    draws: u32,
    owner: ImageOwner,
}

struct SwapchainData {
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    acquired: Vec<bool>,
    cursor: usize,
    retired: bool,
}

struct MockState {
    next_handle: u64,
    next_batch: u64,

    window_extent: vk::Extent2D,
    surface_formats: Vec<vk::SurfaceFormatKHR>,
    present_modes: Vec<vk::PresentModeKHR>,
    min_image_count: u32,
    max_image_count: u32,
    supported_usage: vk::ImageUsageFlags,
    transfer_queue_flags: vk::QueueFlags,

    semaphores: HashMap<vk::Semaphore, bool>,
    fences: HashMap<vk::Fence, FenceData>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferData>,
    images: HashMap<vk::Image, ImageData>,
    views: HashMap<vk::ImageView, vk::Image>,
    render_passes: HashMap<vk::RenderPass, (vk::Format, vk::ImageLayout)>,
    framebuffers: HashMap<vk::Framebuffer, (vk::ImageView, vk::Extent2D)>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainData>,

    events: Vec<GpuEvent>,
    violations: Vec<String>,
    presented: Vec<PresentedFrame>,

    acquire_results: VecDeque<vk::Result>,
    present_results: VecDeque<vk::Result>,
    submit_results: VecDeque<vk::Result>,
    forced_acquire: Option<u32>,
    views_before_failure: Option<usize>,
    stalled: bool,
    device_lost: bool,
}

impl MockState {
    fn handle<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        H::from_raw(self.next_handle)
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("mock gpu violation: {}", message);
        self.violations.push(message);
    }

    fn check_device(&self) -> RhiResult<()> {
        if self.device_lost {
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        } else {
            Ok(())
        }
    }

    /// Retires every batch up to and including `batch`.
    fn complete_through(&mut self, batch: u64) {
        for data in self.command_buffers.values_mut() {
            if data.state == CommandBufferState::Pending && data.batch <= batch {
                data.state = CommandBufferState::Executable;
            }
        }
        for fence in self.fences.values_mut() {
            if let Some(pending) = fence.pending_batch
                && pending <= batch
            {
                fence.pending_batch = None;
                fence.signaled = true;
            }
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.command_buffers.get_mut(&cmd) {
            Some(data) if data.state == CommandBufferState::Recording => {
                data.commands.push(command);
            }
            Some(data) => {
                let state = data.state;
                self.violation(format!("recorded into {:?} while {:?}", cmd, state));
            }
            None => self.violation(format!("recorded into unknown command buffer {:?}", cmd)),
        }
    }

    fn view_image(&self, view: vk::ImageView) -> Option<vk::Image> {
        self.views.get(&view).copied()
    }

    fn execute(&mut self, cmd: vk::CommandBuffer, commands: &[Command]) {
        let mut target: Option<(vk::Image, vk::ImageLayout, vk::Extent2D)> = None;
        let mut viewport: Option<vk::Viewport> = None;
        let mut scissor: Option<vk::Rect2D> = None;
        let mut pipeline_bound = false;
        let mut index_bound = false;

        for command in commands {
            match command {
                Command::BeginRenderPass(begin) => {
                    target = self.begin_render_pass(begin);
                }
                Command::EndRenderPass => match target.take() {
                    Some((image, final_layout, _)) => {
                        if let Some(data) = self.images.get_mut(&image) {
                            data.layout = final_layout;
                        }
                    }
                    None => self.violation(format!("{:?} ended a render pass it never began", cmd)),
                },
                Command::BindPipeline => pipeline_bound = true,
                Command::BindIndexBuffer => index_bound = true,
                Command::SetViewport(v) => viewport = Some(*v),
                Command::SetScissor(s) => scissor = Some(*s),
                Command::DrawIndexed => {
                    self.check_draw(cmd, target, viewport, scissor, pipeline_bound, index_bound);
                }
                Command::Barrier { transitions, .. } => {
                    for &(image, old, new) in transitions {
                        self.transition(image, old, new);
                    }
                }
                Command::Copy {
                    src,
                    src_layout,
                    dst,
                    dst_layout,
                    src_offset,
                    dst_offset,
                    extent,
                } => self.copy(
                    *src,
                    *src_layout,
                    *dst,
                    *dst_layout,
                    *src_offset,
                    *dst_offset,
                    *extent,
                ),
            }
        }

        if target.is_some() {
            self.violation(format!("{:?} left a render pass open", cmd));
        }
    }

    fn begin_render_pass(
        &mut self,
        begin: &RenderPassBegin,
    ) -> Option<(vk::Image, vk::ImageLayout, vk::Extent2D)> {
        let Some(&(view, fb_extent)) = self.framebuffers.get(&begin.framebuffer) else {
            self.violation(format!("render pass began on unknown framebuffer {:?}", begin.framebuffer));
            return None;
        };
        let Some(&(rp_format, final_layout)) = self.render_passes.get(&begin.render_pass) else {
            self.violation(format!("unknown render pass {:?}", begin.render_pass));
            return None;
        };
        let Some(image) = self.view_image(view) else {
            self.violation(format!("framebuffer {:?} references a destroyed view", begin.framebuffer));
            return None;
        };

        if fb_extent != begin.extent {
            self.violation(format!(
                "render area {}x{} differs from framebuffer {}x{}",
                begin.extent.width, begin.extent.height, fb_extent.width, fb_extent.height
            ));
        }

        let clear = pack_color(begin.clear_color);
        let mismatch = match self.images.get_mut(&image) {
            Some(data) => {
                let mismatch = (data.format != rp_format).then_some(data.format);
                let width = begin.extent.width.min(data.extent.width) as usize;
                let height = begin.extent.height.min(data.extent.height) as usize;
                let stride = data.extent.width as usize;
                for y in 0..height {
                    data.pixels[y * stride..y * stride + width].fill(clear);
                }
                data.layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
                mismatch
            }
            None => {
                self.violation(format!("render pass attachment {:?} was destroyed", image));
                return None;
            }
        };

        if let Some(format) = mismatch {
            self.violation(format!(
                "render pass format {:?} does not match attachment format {:?}",
                rp_format, format
            ));
        }

        Some((image, final_layout, begin.extent))
    }

    fn check_draw(
        &mut self,
        cmd: vk::CommandBuffer,
        target: Option<(vk::Image, vk::ImageLayout, vk::Extent2D)>,
        viewport: Option<vk::Viewport>,
        scissor: Option<vk::Rect2D>,
        pipeline_bound: bool,
        index_bound: bool,
    ) {
        let Some((image, _, extent)) = target else {
            self.violation(format!("{:?} drew outside a render pass", cmd));
            return;
        };
        if !pipeline_bound || !index_bound {
            self.violation(format!("{:?} drew without pipeline or index buffer bound", cmd));
        }
        match viewport {
            Some(v) if v.width as u32 == extent.width && v.height as u32 == extent.height => {}
            Some(v) => self.violation(format!(
                "viewport {}x{} does not match render area {}x{}",
                v.width, v.height, extent.width, extent.height
            )),
            None => self.violation(format!("{:?} drew without a viewport", cmd)),
        }
        match scissor {
            Some(s) if s.extent == extent => {}
            Some(s) => self.violation(format!(
                "scissor {}x{} does not match render area {}x{}",
                s.extent.width, s.extent.height, extent.width, extent.height
            )),
            None => self.violation(format!("{:?} drew without a scissor", cmd)),
        }
        if let Some(data) = self.images.get_mut(&image) {
            data.draws += 1;
        }
    }

    fn transition(&mut self, image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) {
        let current = match self.images.get_mut(&image) {
            Some(data) => {
                let current = data.layout;
                data.layout = new;
                current
            }
            None => {
                self.violation(format!("barrier on unknown image {:?}", image));
                return;
            }
        };
        if old != vk::ImageLayout::UNDEFINED && old != current {
            self.violation(format!(
                "barrier on {:?} claims {:?} but image is in {:?}",
                image, old, current
            ));
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn copy(
        &mut self,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        src_offset: vk::Offset3D,
        dst_offset: vk::Offset3D,
        extent: vk::Extent3D,
    ) {
        let Some((src_extent, actual_src_layout, src_pixels)) = self
            .images
            .get(&src)
            .map(|d| (d.extent, d.layout, d.pixels.clone()))
        else {
            self.violation(format!("copy from unknown image {:?}", src));
            return;
        };

        if src_layout != vk::ImageLayout::TRANSFER_SRC_OPTIMAL || actual_src_layout != src_layout {
            self.violation(format!(
                "copy source {:?} declared {:?}, actual {:?}",
                src, src_layout, actual_src_layout
            ));
        }

        let in_bounds = |offset: vk::Offset3D, bounds: vk::Extent2D| {
            offset.x >= 0
                && offset.y >= 0
                && offset.x as u32 + extent.width <= bounds.width
                && offset.y as u32 + extent.height <= bounds.height
        };

        if !in_bounds(src_offset, src_extent) {
            self.violation(format!("copy region exceeds source {:?}", src));
            return;
        }

        let violation = match self.images.get_mut(&dst) {
            Some(data) => {
                let mut violation = None;
                if dst_layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL || data.layout != dst_layout {
                    violation = Some(format!(
                        "copy destination {:?} declared {:?}, actual {:?}",
                        dst, dst_layout, data.layout
                    ));
                }
                if in_bounds(dst_offset, data.extent) {
                    let src_stride = src_extent.width as usize;
                    let dst_stride = data.extent.width as usize;
                    for y in 0..extent.height as usize {
                        let s = (src_offset.y as usize + y) * src_stride + src_offset.x as usize;
                        let d = (dst_offset.y as usize + y) * dst_stride + dst_offset.x as usize;
                        let width = extent.width as usize;
                        data.pixels[d..d + width].copy_from_slice(&src_pixels[s..s + width]);
                    }
                } else {
                    violation = Some(format!("copy region exceeds destination {:?}", dst));
                }
                violation
            }
            None => Some(format!("copy to unknown image {:?}", dst)),
        };

        if let Some(message) = violation {
            self.violation(message);
        }
    }

    fn new_image(&mut self, extent: vk::Extent2D, format: vk::Format, owner: ImageOwner) -> vk::Image {
        let image = self.handle();
        self.images.insert(
            image,
            ImageData {
                extent,
                format,
                layout: vk::ImageLayout::UNDEFINED,
                pixels: vec![0; extent.width as usize * extent.height as usize],
                draws: 0,
                owner,
            },
        );
        image
    }

    fn release_image(&mut self, image: vk::Image) {
        if self.views.values().any(|&viewed| viewed == image) {
            self.violation(format!("image {:?} destroyed while a view still exists", image));
        }
        self.images.remove(&image);
    }
}

/// In-memory device. See the module documentation.
pub struct MockGpu {
    state: RefCell<MockState>,
}

impl MockGpu {
    /// Creates a mock device whose window is `width`x`height`.
    ///
    /// The surface offers `B8G8R8A8_SRGB` and `B8G8R8A8_UNORM`, FIFO and
    /// MAILBOX, 2 to 3 images, and color-attachment plus transfer usage.
    pub fn new(width: u32, height: u32) -> Self {
        let srgb = |format| vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        Self {
            state: RefCell::new(MockState {
                next_handle: 0x1000,
                next_batch: 0,
                window_extent: vk::Extent2D { width, height },
                surface_formats: vec![
                    srgb(vk::Format::B8G8R8A8_SRGB),
                    srgb(vk::Format::B8G8R8A8_UNORM),
                ],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                min_image_count: 2,
                max_image_count: 3,
                supported_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
                transfer_queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                semaphores: HashMap::new(),
                fences: HashMap::new(),
                command_buffers: HashMap::new(),
                images: HashMap::new(),
                views: HashMap::new(),
                render_passes: HashMap::new(),
                framebuffers: HashMap::new(),
                swapchains: HashMap::new(),
                events: Vec::new(),
                violations: Vec::new(),
                presented: Vec::new(),
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                submit_results: VecDeque::new(),
                forced_acquire: None,
                views_before_failure: None,
                stalled: false,
                device_lost: false,
            }),
        }
    }

    /// Replaces the formats the surface offers (all in SRGB_NONLINEAR).
    pub fn with_surface_formats(self, formats: &[vk::Format]) -> Self {
        self.state.borrow_mut().surface_formats = formats
            .iter()
            .map(|&format| vk::SurfaceFormatKHR {
                format,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            })
            .collect();
        self
    }

    /// Replaces the present modes the surface offers.
    pub fn with_present_modes(self, modes: &[vk::PresentModeKHR]) -> Self {
        self.state.borrow_mut().present_modes = modes.to_vec();
        self
    }

    /// Sets the surface's min/max image count (0 max means unlimited).
    pub fn with_image_count(self, min: u32, max: u32) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.min_image_count = min;
            state.max_image_count = max;
        }
        self
    }

    /// Replaces the capabilities of the transfer queue family. The default is
    /// a graphics-capable family; `TRANSFER` alone models a dedicated copy
    /// queue on which blits are invalid.
    pub fn with_transfer_queue_flags(self, flags: vk::QueueFlags) -> Self {
        self.state.borrow_mut().transfer_queue_flags = flags;
        self
    }

    /// Replaces the usage flags presentable images support.
    pub fn with_supported_usage(self, usage: vk::ImageUsageFlags) -> Self {
        self.state.borrow_mut().supported_usage = usage;
        self
    }

    // =========================================================================
    // Test control
    // =========================================================================

    /// Changes the window size. Swapchains of another size become out of date.
    pub fn set_window_extent(&self, width: u32, height: u32) {
        self.state.borrow_mut().window_extent = vk::Extent2D { width, height };
    }

    /// Makes the next acquisitions return `result` (in queue order).
    /// `SUBOPTIMAL_KHR` acquires an image and reports it suboptimal.
    pub fn push_acquire_result(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_results.push_back(result);
    }

    /// Makes the next presents return `result` after presenting.
    /// `SUBOPTIMAL_KHR` reports success with the suboptimal flag.
    pub fn push_present_result(&self, result: vk::Result) {
        self.state.borrow_mut().present_results.push_back(result);
    }

    /// Makes the next queue submissions fail with `result` without executing.
    pub fn push_submit_result(&self, result: vk::Result) {
        self.state.borrow_mut().submit_results.push_back(result);
    }

    /// Makes the next acquisition hand out `index`, even if it is in use.
    pub fn force_acquire_index(&self, index: u32) {
        self.state.borrow_mut().forced_acquire = Some(index);
    }

    /// Lets `successes` more image views be created, then fails the next one.
    pub fn fail_image_view_after(&self, successes: usize) {
        self.state.borrow_mut().views_before_failure = Some(successes);
    }

    /// While stalled, fence waits on outstanding work time out.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.borrow_mut().stalled = stalled;
    }

    /// Loses the device: waits, submissions, acquisitions and presents fail.
    pub fn lose_device(&self) {
        self.state.borrow_mut().device_lost = true;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Events observed so far.
    pub fn events(&self) -> Vec<GpuEvent> {
        self.state.borrow().events.clone()
    }

    /// Forgets the observed events.
    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Protocol violations observed so far.
    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Frames presented so far.
    pub fn presented_frames(&self) -> Vec<PresentedFrame> {
        self.state.borrow().presented.clone()
    }

    /// Current pixels of an image.
    pub fn image_pixels(&self, image: vk::Image) -> Option<Vec<u32>> {
        self.state.borrow().images.get(&image).map(|d| d.pixels.clone())
    }

    /// Current layout of an image.
    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state.borrow().images.get(&image).map(|d| d.layout)
    }

    /// Extent of an image.
    pub fn image_extent(&self, image: vk::Image) -> Option<vk::Extent2D> {
        self.state.borrow().images.get(&image).map(|d| d.extent)
    }

    /// Number of draws executed into an image.
    pub fn image_draws(&self, image: vk::Image) -> u32 {
        self.state.borrow().images.get(&image).map_or(0, |d| d.draws)
    }

    /// Overwrites an image's pixels with `f(x, y)`.
    pub fn fill_image(&self, image: vk::Image, f: impl Fn(u32, u32) -> u32) {
        let mut state = self.state.borrow_mut();
        if let Some(data) = state.images.get_mut(&image) {
            let width = data.extent.width;
            for (i, pixel) in data.pixels.iter_mut().enumerate() {
                let i = i as u32;
                *pixel = f(i % width, i / width);
            }
        }
    }

    /// Forces an image into `layout`, as if a previous frame had left it there.
    pub fn set_image_layout(&self, image: vk::Image, layout: vk::ImageLayout) {
        if let Some(data) = self.state.borrow_mut().images.get_mut(&image) {
            data.layout = layout;
        }
    }

    /// Source and destination stages of every barrier recorded into `cmd`.
    pub fn barrier_stages(
        &self,
        cmd: vk::CommandBuffer,
    ) -> Vec<(vk::PipelineStageFlags, vk::PipelineStageFlags)> {
        self.state
            .borrow()
            .command_buffers
            .get(&cmd)
            .map(|data| {
                data.commands
                    .iter()
                    .filter_map(|command| match command {
                        Command::Barrier {
                            src_stage,
                            dst_stage,
                            ..
                        } => Some((*src_stage, *dst_stage)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a fence is currently signaled.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state
            .borrow()
            .fences
            .get(&fence)
            .is_some_and(|f| f.signaled)
    }

    /// Whether a semaphore currently holds an unconsumed signal.
    pub fn is_semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state
            .borrow()
            .semaphores
            .get(&semaphore)
            .copied()
            .unwrap_or(false)
    }

    /// Live semaphores.
    pub fn live_semaphores(&self) -> usize {
        self.state.borrow().semaphores.len()
    }

    /// Live fences.
    pub fn live_fences(&self) -> usize {
        self.state.borrow().fences.len()
    }

    /// Live command buffers.
    pub fn live_command_buffers(&self) -> usize {
        self.state.borrow().command_buffers.len()
    }

    /// Live images created through [`Gpu::create_image`].
    pub fn live_offscreen_images(&self) -> usize {
        self.state
            .borrow()
            .images
            .values()
            .filter(|d| d.owner == ImageOwner::Offscreen)
            .count()
    }

    /// Live image views.
    pub fn live_views(&self) -> usize {
        self.state.borrow().views.len()
    }

    /// Live framebuffers.
    pub fn live_framebuffers(&self) -> usize {
        self.state.borrow().framebuffers.len()
    }

    /// Live render passes.
    pub fn live_render_passes(&self) -> usize {
        self.state.borrow().render_passes.len()
    }

    /// Live swapchains (retired ones included until destroyed).
    pub fn live_swapchains(&self) -> usize {
        self.state.borrow().swapchains.len()
    }
}

impl Gpu for MockGpu {
    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        state.check_device()?;
        let last = state.next_batch;
        state.complete_through(last);
        state.events.push(GpuEvent::WaitIdle);
        Ok(())
    }

    fn queue_flags(&self, queue: QueueKind) -> vk::QueueFlags {
        match queue {
            QueueKind::Graphics | QueueKind::Present => {
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
            }
            QueueKind::Transfer => self.state.borrow().transfer_queue_flags,
        }
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        let semaphore = state.handle();
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.borrow_mut().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state.borrow_mut();
        let fence = state.handle();
        state.fences.insert(
            fence,
            FenceData {
                signaled,
                pending_batch: None,
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        if let Some(data) = state.fences.remove(&fence)
            && data.pending_batch.is_some()
        {
            state.violation(format!("fence {:?} destroyed while pending", fence));
        }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout_ns: u64) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        state.check_device()?;

        for &fence in fences {
            let (signaled, pending) = match state.fences.get(&fence) {
                Some(data) => (data.signaled, data.pending_batch),
                None => return Err(RhiError::InvalidHandle(format!("fence {:?}", fence))),
            };

            if signaled {
                state.events.push(GpuEvent::FenceWait {
                    fence,
                    blocked: false,
                });
                continue;
            }

            state.events.push(GpuEvent::FenceWait {
                fence,
                blocked: true,
            });

            match pending {
                Some(batch) if !state.stalled => state.complete_through(batch),
                _ => return Err(RhiError::Timeout),
            }
        }

        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        let pending = match state.fences.get_mut(&fence) {
            Some(data) => {
                data.signaled = false;
                data.pending_batch.is_some()
            }
            None => return Err(RhiError::InvalidHandle(format!("fence {:?}", fence))),
        };
        if pending {
            state.violation(format!("fence {:?} reset while pending", fence));
        }
        state.events.push(GpuEvent::FenceReset(fence));
        Ok(())
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        let state = self.state.borrow();
        state.check_device()?;
        state
            .fences
            .get(&fence)
            .map(|data| data.signaled)
            .ok_or_else(|| RhiError::InvalidHandle(format!("fence {:?}", fence)))
    }

    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cmd = state.handle();
            state.command_buffers.insert(
                cmd,
                CommandBufferData {
                    queue,
                    state: CommandBufferState::Initial,
                    commands: Vec::new(),
                    batch: 0,
                },
            );
            buffers.push(cmd);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, queue: QueueKind, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for cmd in command_buffers {
            if let Some(data) = state.command_buffers.remove(cmd) {
                if data.state == CommandBufferState::Pending {
                    state.violation(format!("{:?} freed while pending", cmd));
                }
                if data.queue != queue {
                    state.violation(format!("{:?} freed to the {:?} pool", cmd, queue));
                }
            }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        let previous = match state.command_buffers.get_mut(&cmd) {
            Some(data) => {
                let previous = data.state;
                if previous != CommandBufferState::Pending {
                    data.state = CommandBufferState::Initial;
                    data.commands.clear();
                }
                previous
            }
            None => return Err(RhiError::InvalidHandle(format!("{:?}", cmd))),
        };
        if previous == CommandBufferState::Pending {
            state.violation(format!("{:?} reset while pending", cmd));
            return Err(RhiError::VulkanError(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        state.events.push(GpuEvent::CommandBufferReset(cmd));
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        let previous = match state.command_buffers.get_mut(&cmd) {
            Some(data) => {
                let previous = data.state;
                if matches!(
                    previous,
                    CommandBufferState::Initial | CommandBufferState::Executable
                ) {
                    data.state = CommandBufferState::Recording;
                    data.commands.clear();
                }
                previous
            }
            None => return Err(RhiError::InvalidHandle(format!("{:?}", cmd))),
        };
        if matches!(
            previous,
            CommandBufferState::Pending | CommandBufferState::Recording
        ) {
            state.violation(format!("{:?} began recording while {:?}", cmd, previous));
            return Err(RhiError::VulkanError(vk::Result::ERROR_VALIDATION_FAILED_EXT));
        }
        state.events.push(GpuEvent::CommandBufferBegin(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        match state.command_buffers.get_mut(&cmd) {
            Some(data) if data.state == CommandBufferState::Recording => {
                data.state = CommandBufferState::Executable;
                Ok(())
            }
            Some(data) => {
                let previous = data.state;
                state.violation(format!("{:?} ended while {:?}", cmd, previous));
                Err(RhiError::VulkanError(vk::Result::ERROR_VALIDATION_FAILED_EXT))
            }
            None => Err(RhiError::InvalidHandle(format!("{:?}", cmd))),
        }
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.state
            .borrow_mut()
            .record(cmd, Command::BeginRenderPass(*begin));
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.borrow_mut().record(cmd, Command::EndRenderPass);
    }

    fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut state = self.state.borrow_mut();
        if pipeline == vk::Pipeline::null() {
            state.violation(format!("{:?} bound a null pipeline", cmd));
        }
        state.record(cmd, Command::BindPipeline);
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
    ) {
        // Vertex data is not modeled; recording still has to be legal.
        let mut state = self.state.borrow_mut();
        if state
            .command_buffers
            .get(&cmd)
            .is_none_or(|d| d.state != CommandBufferState::Recording)
        {
            state.violation(format!("{:?} bound a vertex buffer outside recording", cmd));
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _buffer: vk::Buffer,
        _offset: vk::DeviceSize,
        _index_type: vk::IndexType,
    ) {
        self.state.borrow_mut().record(cmd, Command::BindIndexBuffer);
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        self.state
            .borrow_mut()
            .record(cmd, Command::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        self.state
            .borrow_mut()
            .record(cmd, Command::SetScissor(*scissor));
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        _index_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
    ) {
        self.state.borrow_mut().record(cmd, Command::DrawIndexed);
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        let transitions = image_barriers
            .iter()
            .map(|b| (b.image, b.old_layout, b.new_layout))
            .collect();
        self.state.borrow_mut().record(
            cmd,
            Command::Barrier {
                src_stage,
                dst_stage,
                transitions,
            },
        );
    }

    fn cmd_copy_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageCopy],
    ) {
        let mut state = self.state.borrow_mut();
        let formats = (
            state.images.get(&src).map(|d| d.format),
            state.images.get(&dst).map(|d| d.format),
        );
        if let (Some(a), Some(b)) = formats
            && a != b
        {
            state.violation(format!("copy between {:?} and {:?}", a, b));
        }
        for region in regions {
            state.record(
                cmd,
                Command::Copy {
                    src,
                    src_layout,
                    dst,
                    dst_layout,
                    src_offset: region.src_offset,
                    dst_offset: region.dst_offset,
                    extent: region.extent,
                },
            );
        }
    }

    fn cmd_blit_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
    ) {
        let mut state = self.state.borrow_mut();
        let transfer_only = !state.transfer_queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let queue = state.command_buffers.get(&cmd).map(|data| data.queue);
        if queue == Some(QueueKind::Transfer) && transfer_only {
            state.violation(format!("{:?} recorded a blit for a transfer-only queue", cmd));
        }
        for region in regions {
            let size = |offsets: &[vk::Offset3D; 2]| {
                (
                    (offsets[1].x - offsets[0].x).max(0) as u32,
                    (offsets[1].y - offsets[0].y).max(0) as u32,
                )
            };
            let (width, height) = size(&region.src_offsets);
            if size(&region.dst_offsets) != (width, height) {
                state.violation(format!("{:?} recorded a scaling blit", cmd));
            }
            state.record(
                cmd,
                Command::Copy {
                    src,
                    src_layout,
                    dst,
                    dst_layout,
                    src_offset: region.src_offsets[0],
                    dst_offset: region.dst_offsets[0],
                    extent: vk::Extent3D {
                        width,
                        height,
                        depth: 1,
                    },
                },
            );
        }
    }

    fn queue_submit(
        &self,
        queue: QueueKind,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut state = self.state.borrow_mut();
        state.check_device()?;

        if let Some(result) = state.submit_results.pop_front() {
            return Err(RhiError::VulkanError(result));
        }

        if submit.wait_semaphores.len() != submit.wait_stages.len() {
            state.violation("wait semaphore and stage counts differ".to_string());
        }

        if fence != vk::Fence::null() {
            let busy = state
                .fences
                .get(&fence)
                .map(|f| f.signaled || f.pending_batch.is_some());
            match busy {
                Some(false) => {}
                Some(true) => state.violation(format!("submitted with busy fence {:?}", fence)),
                None => return Err(RhiError::InvalidHandle(format!("fence {:?}", fence))),
            }
        }

        for &semaphore in submit.wait_semaphores {
            match state.semaphores.get(&semaphore).copied() {
                Some(true) => {
                    state.semaphores.insert(semaphore, false);
                }
                Some(false) => state.violation(format!(
                    "{:?} submission waits on unsignaled {:?}",
                    queue, semaphore
                )),
                None => state.violation(format!("wait on unknown semaphore {:?}", semaphore)),
            }
        }

        state.next_batch += 1;
        let batch = state.next_batch;

        for &cmd in submit.command_buffers {
            let info = state.command_buffers.get(&cmd).map(|d| (d.state, d.queue));
            match info {
                Some((CommandBufferState::Executable, owner)) => {
                    if owner != queue {
                        state.violation(format!(
                            "{:?} from the {:?} pool submitted to {:?}",
                            cmd, owner, queue
                        ));
                    }
                }
                Some((previous, _)) => {
                    state.violation(format!("{:?} submitted while {:?}", cmd, previous));
                    continue;
                }
                None => {
                    state.violation(format!("unknown command buffer {:?} submitted", cmd));
                    continue;
                }
            }

            let commands = match state.command_buffers.get_mut(&cmd) {
                Some(data) => {
                    data.state = CommandBufferState::Pending;
                    data.batch = batch;
                    data.commands.clone()
                }
                None => continue,
            };
            state.execute(cmd, &commands);
        }

        for &semaphore in submit.signal_semaphores {
            match state.semaphores.get(&semaphore).copied() {
                Some(false) => {
                    state.semaphores.insert(semaphore, true);
                }
                Some(true) => state.violation(format!("{:?} signaled twice", semaphore)),
                None => state.violation(format!("signal of unknown semaphore {:?}", semaphore)),
            }
        }

        if let Some(data) = state.fences.get_mut(&fence) {
            data.pending_batch = Some(batch);
        }

        state.events.push(GpuEvent::Submit {
            queue,
            command_buffers: submit.command_buffers.to_vec(),
            wait_semaphores: submit.wait_semaphores.to_vec(),
            signal_semaphores: submit.signal_semaphores.to_vec(),
            fence,
        });

        Ok(())
    }

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "Image extent must be non-zero, got {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }
        Ok(self
            .state
            .borrow_mut()
            .new_image(desc.extent, desc.format, ImageOwner::Offscreen))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.borrow_mut();
        match state.images.get(&image).map(|d| d.owner) {
            Some(ImageOwner::Offscreen) => state.release_image(image),
            Some(ImageOwner::Swapchain) => {
                state.violation(format!("presentable image {:?} destroyed directly", image));
            }
            None => {}
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> RhiResult<vk::ImageView> {
        let mut state = self.state.borrow_mut();

        match state.views_before_failure {
            Some(0) => {
                state.views_before_failure = None;
                return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
            }
            Some(n) => state.views_before_failure = Some(n - 1),
            None => {}
        }

        match state.images.get(&image).map(|d| d.format) {
            Some(actual) if actual != format => {
                state.violation(format!("view format {:?} over {:?} image", format, actual));
            }
            Some(_) => {}
            None => return Err(RhiError::InvalidHandle(format!("image {:?}", image))),
        }

        let view = state.handle();
        state.views.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.borrow_mut();
        if state.framebuffers.values().any(|&(v, _)| v == view) {
            state.violation(format!("view {:?} destroyed while a framebuffer uses it", view));
        }
        state.views.remove(&view);
    }

    fn create_render_pass(
        &self,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> RhiResult<vk::RenderPass> {
        let mut state = self.state.borrow_mut();
        let render_pass = state.handle();
        state
            .render_passes
            .insert(render_pass, (format, final_layout));
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.borrow_mut().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state.borrow_mut();

        if !state.render_passes.contains_key(&render_pass) {
            return Err(RhiError::InvalidHandle(format!("render pass {:?}", render_pass)));
        }
        let image = state
            .view_image(view)
            .ok_or_else(|| RhiError::InvalidHandle(format!("view {:?}", view)))?;

        if let Some(actual) = state.images.get(&image).map(|d| d.extent)
            && actual != extent
        {
            state.violation(format!(
                "framebuffer {}x{} over {}x{} image",
                extent.width, extent.height, actual.width, actual.height
            ));
        }

        let framebuffer = state.handle();
        state.framebuffers.insert(framebuffer, (view, extent));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state.borrow_mut().framebuffers.remove(&framebuffer);
    }

    fn window_extent(&self) -> vk::Extent2D {
        self.state.borrow().window_extent
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        let state = self.state.borrow();
        Ok(SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: state.min_image_count,
                max_image_count: state.max_image_count,
                current_extent: state.window_extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: state.supported_usage,
            },
            formats: state.surface_formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR> {
        let mut state = self.state.borrow_mut();
        state.check_device()?;

        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("swapchain created with a zero extent".to_string());
            return Err(RhiError::VulkanError(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        if !state.supported_usage.contains(desc.usage) {
            state.violation(format!("swapchain usage {:?} not supported", desc.usage));
        }

        if old_swapchain != vk::SwapchainKHR::null() {
            match state.swapchains.get_mut(&old_swapchain) {
                Some(old) => old.retired = true,
                None => state.violation(format!("unknown old swapchain {:?}", old_swapchain)),
            }
        }

        let count = desc.min_image_count;
        let images: Vec<vk::Image> = (0..count)
            .map(|_| {
                state.new_image(
                    desc.extent,
                    desc.surface_format.format,
                    ImageOwner::Swapchain,
                )
            })
            .collect();

        let swapchain = state.handle();
        state.swapchains.insert(
            swapchain,
            SwapchainData {
                acquired: vec![false; images.len()],
                images,
                extent: desc.extent,
                cursor: 0,
                retired: false,
            },
        );
        state.events.push(GpuEvent::SwapchainCreated {
            extent: desc.extent,
            image_count: count,
        });

        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        self.state
            .borrow()
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or_else(|| RhiError::InvalidHandle(format!("swapchain {:?}", swapchain)))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.borrow_mut();
        if let Some(data) = state.swapchains.remove(&swapchain) {
            for image in data.images {
                state.release_image(image);
            }
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        let mut state = self.state.borrow_mut();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }

        let mut suboptimal = false;
        match state.acquire_results.pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => suboptimal = true,
            Some(result) => {
                if result == vk::Result::ERROR_OUT_OF_DATE_KHR {
                    state.events.push(GpuEvent::AcquireOutOfDate);
                }
                return Err(result);
            }
            None => {}
        }

        let window = state.window_extent;
        let forced = state.forced_acquire.take();
        let Some(data) = state.swapchains.get_mut(&swapchain) else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };

        if data.retired || data.extent != window {
            state.events.push(GpuEvent::AcquireOutOfDate);
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }

        let count = data.images.len();
        let index = match forced {
            Some(index) => Some(index as usize),
            None => (0..count)
                .map(|offset| (data.cursor + offset) % count)
                .find(|&i| !data.acquired[i]),
        };
        let Some(index) = index.filter(|&i| i < count) else {
            state.violation("acquired more images than the swapchain has".to_string());
            return Err(vk::Result::NOT_READY);
        };

        data.acquired[index] = true;
        data.cursor = (index + 1) % count;

        match state.semaphores.get(&semaphore).copied() {
            Some(false) => {
                state.semaphores.insert(semaphore, true);
            }
            Some(true) => state.violation(format!("acquire signaled busy {:?}", semaphore)),
            None => state.violation(format!("acquire signaled unknown {:?}", semaphore)),
        }

        state.events.push(GpuEvent::Acquire {
            image_index: index as u32,
        });

        Ok((index as u32, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let mut state = self.state.borrow_mut();
        if state.device_lost {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }

        for &semaphore in wait_semaphores {
            match state.semaphores.get(&semaphore).copied() {
                Some(true) => {
                    state.semaphores.insert(semaphore, false);
                }
                _ => state.violation(format!("present waits on unsignaled {:?}", semaphore)),
            }
        }

        let window = state.window_extent;
        let Some(data) = state.swapchains.get_mut(&swapchain) else {
            return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
        };
        let index = image_index as usize;
        let Some(&image) = data.images.get(index) else {
            state.violation(format!("presented out-of-range index {}", image_index));
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let was_acquired = std::mem::replace(&mut data.acquired[index], false);
        let stale = data.retired || data.extent != window;

        if !was_acquired {
            state.violation(format!("presented index {} without acquiring it", image_index));
        }

        if let Some((layout, extent, pixels)) = state
            .images
            .get(&image)
            .map(|d| (d.layout, d.extent, d.pixels.clone()))
        {
            if layout != vk::ImageLayout::PRESENT_SRC_KHR {
                state.violation(format!("presented image {} in {:?}", image_index, layout));
            }
            state.presented.push(PresentedFrame {
                image_index,
                extent,
                pixels,
            });
        }

        state.events.push(GpuEvent::Present {
            image_index,
            wait_semaphores: wait_semaphores.to_vec(),
        });

        match state.present_results.pop_front() {
            Some(vk::Result::SUBOPTIMAL_KHR) => Ok(true),
            Some(result) => Err(result),
            None if stale => Err(vk::Result::ERROR_OUT_OF_DATE_KHR),
            None => Ok(false),
        }
    }
}
