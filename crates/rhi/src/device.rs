//! Vulkan implementation of [`Gpu`].
//!
//! This module wires the frame pipeline to a device the embedder has already
//! brought up:
//!
//! - [`DeviceContext`] bundles the borrowed instance, device, surface and queues
//! - [`VulkanGpu`] implements [`Gpu`] over that context, owning only what it
//!   creates itself: the command pools, the gpu-allocator instance and the
//!   allocations behind offscreen images
//!
//! # Example
//!
//! ```no_run
//! use framepipe_rhi::device::{DeviceContext, VulkanGpu};
//!
//! # fn example(context: DeviceContext) -> Result<(), framepipe_rhi::RhiError> {
//! // Safety: the instance, device and surface in `context` are destroyed by
//! // the caller only after `gpu` is dropped.
//! let gpu = unsafe { VulkanGpu::new(context, 1280, 720)? };
//!
//! // On every window resize event:
//! gpu.set_window_extent(1600, 900);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::command::{CommandPool, one_time_begin_info};
use crate::error::{RhiError, RhiResult};
use crate::gpu::{Gpu, ImageDesc, QueueKind, RenderPassBegin, SubmitDesc, SwapchainDesc};
use crate::image;
use crate::swapchain::{SwapchainSupportDetails, sharing_mode};
use crate::sync;

/// A device queue and the family it was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHandle {
    /// Queue handle.
    pub queue: vk::Queue,
    /// Queue family index.
    pub family: u32,
}

/// Vulkan objects created by the embedder and borrowed by [`VulkanGpu`].
///
/// The loaders are cheap clones of the embedder's function tables; cloning
/// them does not transfer ownership of the underlying Vulkan objects.
#[derive(Clone)]
pub struct DeviceContext {
    /// Vulkan entry points.
    pub entry: ash::Entry,
    /// Instance the surface and device belong to.
    pub instance: ash::Instance,
    /// Logical device.
    pub device: ash::Device,
    /// Physical device the logical device was created from.
    pub physical_device: vk::PhysicalDevice,
    /// Window surface.
    pub surface: vk::SurfaceKHR,
    /// Queue that executes render passes.
    pub graphics: QueueHandle,
    /// Queue that executes copies. May equal `graphics`.
    pub transfer: QueueHandle,
    /// Queue that presents. May equal `graphics`.
    pub present: QueueHandle,
}

/// [`Gpu`] backed by a Vulkan device.
///
/// # Thread Safety
///
/// Frame pipelines drive a `VulkanGpu` from one thread. The allocator and the
/// window extent are behind mutexes so the extent may be updated from an event
/// handler on another thread.
pub struct VulkanGpu {
    context: DeviceContext,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
    graphics_pool: CommandPool,
    transfer_pool: CommandPool,
    /// Properties of every queue family of the physical device.
    queue_families: Vec<vk::QueueFamilyProperties>,
    /// GPU memory allocator for offscreen images.
    allocator: Mutex<Allocator>,
    /// Memory behind images created through [`Gpu::create_image`].
    allocations: Mutex<HashMap<vk::Image, Allocation>>,
    window_extent: Mutex<vk::Extent2D>,
}

impl VulkanGpu {
    /// Creates the Vulkan backend over an existing device.
    ///
    /// `width` and `height` are the initial drawable size of the window.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - every handle in `context` is valid and belongs to the same instance
    /// - the instance, device and surface outlive the returned value
    /// - the device was created with the swapchain extension enabled
    ///
    /// # Errors
    ///
    /// Returns an error if command pool or allocator creation fails.
    pub unsafe fn new(context: DeviceContext, width: u32, height: u32) -> RhiResult<Self> {
        let surface_loader = ash::khr::surface::Instance::new(&context.entry, &context.instance);
        let swapchain_loader = ash::khr::swapchain::Device::new(&context.instance, &context.device);

        let graphics_pool = CommandPool::new(&context.device, context.graphics.family)?;
        let transfer_pool = CommandPool::new(&context.device, context.transfer.family)?;
        let queue_families = unsafe {
            context
                .instance
                .get_physical_device_queue_family_properties(context.physical_device)
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!(
            "Vulkan backend ready (graphics family {}, transfer family {}, present family {})",
            context.graphics.family, context.transfer.family, context.present.family
        );

        Ok(Self {
            context,
            surface_loader,
            swapchain_loader,
            graphics_pool,
            transfer_pool,
            queue_families,
            allocator: Mutex::new(allocator),
            allocations: Mutex::new(HashMap::new()),
            window_extent: Mutex::new(vk::Extent2D { width, height }),
        })
    }

    /// Updates the drawable size reported by [`Gpu::window_extent`].
    ///
    /// Call this from the window's resize handler, then notify the frame
    /// pipeline so the swapchain is rebuilt.
    pub fn set_window_extent(&self, width: u32, height: u32) {
        *self
            .window_extent
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = vk::Extent2D { width, height };
    }

    /// Returns the borrowed device context.
    #[inline]
    pub fn context(&self) -> &DeviceContext {
        &self.context
    }

    #[inline]
    fn device(&self) -> &ash::Device {
        &self.context.device
    }

    fn queue(&self, queue: QueueKind) -> QueueHandle {
        match queue {
            QueueKind::Graphics => self.context.graphics,
            QueueKind::Transfer => self.context.transfer,
            QueueKind::Present => self.context.present,
        }
    }

    fn pool(&self, queue: QueueKind) -> &CommandPool {
        match queue {
            QueueKind::Transfer => &self.transfer_pool,
            QueueKind::Graphics | QueueKind::Present => &self.graphics_pool,
        }
    }
}

impl Gpu for VulkanGpu {
    // =========================================================================
    // Device
    // =========================================================================

    fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device().device_wait_idle()? };
        Ok(())
    }

    fn queue_flags(&self, queue: QueueKind) -> vk::QueueFlags {
        self.queue_families
            .get(self.queue(queue).family as usize)
            .map_or(vk::QueueFlags::empty(), |family| family.queue_flags)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        sync::create_semaphore(self.device())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if semaphore != vk::Semaphore::null() {
            unsafe { self.device().destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        sync::create_fence(self.device(), signaled)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if fence != vk::Fence::null() {
            unsafe { self.device().destroy_fence(fence, None) };
        }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> RhiResult<()> {
        sync::wait_for_fences(self.device(), fences, timeout_ns)
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        sync::reset_fence(self.device(), fence)
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        sync::fence_status(self.device(), fence)
    }

    // =========================================================================
    // Command buffers
    // =========================================================================

    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.pool(queue).allocate_command_buffers(count)
    }

    fn free_command_buffers(&self, queue: QueueKind, command_buffers: &[vk::CommandBuffer]) {
        self.pool(queue).free_command_buffers(command_buffers);
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe {
            self.device()
                .begin_command_buffer(cmd, &one_time_begin_info())?;
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device().end_command_buffer(cmd)? };
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: begin.clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device()
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device().cmd_end_render_pass(cmd) };
    }

    fn cmd_bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_vertex_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) {
        unsafe {
            self.device()
                .cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(cmd, buffer, offset, index_type);
        }
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: &vk::Viewport) {
        unsafe {
            self.device()
                .cmd_set_viewport(cmd, 0, std::slice::from_ref(viewport));
        }
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: &vk::Rect2D) {
        unsafe {
            self.device()
                .cmd_set_scissor(cmd, 0, std::slice::from_ref(scissor));
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
    ) {
        unsafe {
            self.device()
                .cmd_draw_indexed(cmd, index_count, 1, first_index, vertex_offset, 0);
        }
    }

    fn cmd_pipeline_barrier(
        &self,
        cmd: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        unsafe {
            self.device().cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                image_barriers,
            );
        }
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
        unsafe {
            self.device()
                .cmd_copy_image(cmd, src, src_layout, dst, dst_layout, regions);
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
        unsafe {
            self.device().cmd_blit_image(
                cmd,
                src,
                src_layout,
                dst,
                dst_layout,
                regions,
                vk::Filter::NEAREST,
            );
        }
    }

    // =========================================================================
    // Queues
    // =========================================================================

    fn queue_submit(
        &self,
        queue: QueueKind,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(submit.wait_semaphores)
            .wait_dst_stage_mask(submit.wait_stages)
            .command_buffers(submit.command_buffers)
            .signal_semaphores(submit.signal_semaphores);

        unsafe {
            self.device()
                .queue_submit(self.queue(queue).queue, &[submit_info], fence)?;
        }
        Ok(())
    }

    // =========================================================================
    // Images and render targets
    // =========================================================================

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        let families = [self.context.graphics.family, self.context.transfer.family];

        let (image, allocation) = {
            let mut allocator = self
                .allocator
                .lock()
                .map_err(|_| RhiError::InvalidHandle("Allocator lock poisoned".to_string()))?;
            image::create_color_image(self.device(), &mut allocator, desc, &families)?
        };

        self.allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(image, allocation);

        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        if image == vk::Image::null() {
            return;
        }

        let allocation = self
            .allocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&image);

        unsafe { self.device().destroy_image(image, None) };

        if let Some(allocation) = allocation {
            let mut allocator = self.allocator.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = allocator.free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> RhiResult<vk::ImageView> {
        image::create_color_view(self.device(), image, format)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        if view != vk::ImageView::null() {
            unsafe { self.device().destroy_image_view(view, None) };
        }
    }

    fn create_render_pass(
        &self,
        format: vk::Format,
        final_layout: vk::ImageLayout,
    ) -> RhiResult<vk::RenderPass> {
        image::create_color_render_pass(self.device(), format, final_layout)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        if render_pass != vk::RenderPass::null() {
            unsafe { self.device().destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        image::create_framebuffer(self.device(), render_pass, view, extent)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if framebuffer != vk::Framebuffer::null() {
            unsafe { self.device().destroy_framebuffer(framebuffer, None) };
        }
    }

    // =========================================================================
    // Surface and swapchain
    // =========================================================================

    fn window_extent(&self) -> vk::Extent2D {
        *self
            .window_extent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn surface_support(&self) -> RhiResult<SwapchainSupportDetails> {
        SwapchainSupportDetails::query(
            self.context.physical_device,
            self.context.surface,
            &self.surface_loader,
        )
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<vk::SwapchainKHR> {
        let (sharing, families) = sharing_mode(&[
            self.context.graphics.family,
            self.context.transfer.family,
            self.context.present.family,
        ]);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.context.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(desc.usage)
            .image_sharing_mode(sharing)
            .queue_family_indices(&families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };

        debug!(
            "Created swapchain {:?} ({}x{}, {:?} sharing)",
            swapchain, desc.extent.width, desc.extent.height, sharing
        );

        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RhiResult<Vec<vk::Image>> {
        Ok(unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.context.present.queue, &present_info)
        }
    }
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.context.device.device_wait_idle() {
                error!("Failed to wait for device idle during backend drop: {:?}", e);
            }
        }

        let leaked: Vec<(vk::Image, Allocation)> = self
            .allocations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        if !leaked.is_empty() {
            error!("{} offscreen images were not destroyed", leaked.len());
        }

        let allocator = self
            .allocator
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (image, allocation) in leaked {
            unsafe { self.context.device.destroy_image(image, None) };
            if let Err(e) = allocator.free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
        }

        info!("Vulkan backend destroyed");
    }
}

