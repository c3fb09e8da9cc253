//! Color images, views, framebuffers and render passes.
//!
//! The frame pipeline renders into a single color attachment. This module
//! builds the Vulkan objects around it:
//!
//! - [`create_color_image`] allocates a device-local offscreen image through
//!   gpu-allocator
//! - [`create_color_view`] and [`create_framebuffer`] wrap presentable or
//!   offscreen images as render targets
//! - [`create_color_render_pass`] builds the single-subpass clear-and-store
//!   render pass whose final layout depends on how the frame is presented

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::debug;

use crate::command::color_subresource_range;
use crate::error::{RhiError, RhiResult};
use crate::gpu::ImageDesc;
use crate::swapchain::sharing_mode;

/// Creates a 2D device-local color image and binds memory to it.
///
/// `queue_families` lists every family that accesses the image; more than
/// one distinct family makes the image CONCURRENT.
///
/// # Errors
///
/// Returns an error if the extent is zero, or image creation, allocation or
/// binding fails. Nothing is leaked on failure.
pub fn create_color_image(
    device: &ash::Device,
    allocator: &mut Allocator,
    desc: &ImageDesc,
    queue_families: &[u32],
) -> RhiResult<(vk::Image, Allocation)> {
    if desc.extent.width == 0 || desc.extent.height == 0 {
        return Err(RhiError::InvalidHandle(format!(
            "Image extent must be non-zero, got {}x{}",
            desc.extent.width, desc.extent.height
        )));
    }

    let (sharing, families) = sharing_mode(queue_families);

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(desc.usage)
        .sharing_mode(sharing)
        .queue_family_indices(&families)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.create_image(&create_info, None)? };
    let requirements = unsafe { device.get_image_memory_requirements(image) };

    let allocation = match allocator.allocate(&AllocationCreateDesc {
        name: "offscreen color",
        requirements,
        location: MemoryLocation::GpuOnly,
        linear: false,
        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
    }) {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.destroy_image(image, None) };
            return Err(e.into());
        }
    };

    if let Err(e) = unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
    {
        if let Err(free_err) = allocator.free(allocation) {
            tracing::error!("Failed to free image allocation: {:?}", free_err);
        }
        unsafe { device.destroy_image(image, None) };
        return Err(e.into());
    }

    debug!(
        "Created {}x{} {:?} color image ({:?})",
        desc.extent.width, desc.extent.height, desc.format, sharing
    );

    Ok((image, allocation))
}

/// Creates a 2D color view over the whole image.
pub fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(color_subresource_range());

    Ok(unsafe { device.create_image_view(&create_info, None)? })
}

/// Creates a framebuffer with `view` as its only attachment.
pub fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    view: vk::ImageView,
    extent: vk::Extent2D,
) -> RhiResult<vk::Framebuffer> {
    let attachments = [view];
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(render_pass)
        .attachments(&attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    Ok(unsafe { device.create_framebuffer(&create_info, None)? })
}

/// Describes the color attachment of the frame render pass.
///
/// Cleared on load, stored, starting from UNDEFINED (previous contents are
/// never read) and left in `final_layout`.
pub fn color_attachment_description(
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> vk::AttachmentDescription {
    vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(final_layout)
}

/// Creates the single-subpass color render pass.
///
/// The external dependency makes the attachment write wait for the
/// semaphore-guarded color output stage, so an acquired presentable image is
/// not written before the presentation engine releases it.
pub fn create_color_render_pass(
    device: &ash::Device,
    format: vk::Format,
    final_layout: vk::ImageLayout,
) -> RhiResult<vk::RenderPass> {
    let attachments = [color_attachment_description(format, final_layout)];

    let color_refs = [vk::AttachmentReference::default()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];

    let dependencies = [vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    let render_pass = unsafe { device.create_render_pass(&create_info, None)? };

    debug!(
        "Created color render pass ({:?}, final layout {:?})",
        format, final_layout
    );

    Ok(render_pass)
}
