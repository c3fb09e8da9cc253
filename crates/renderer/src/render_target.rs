//! Render targets derived from presentable or offscreen images.

use framepipe_rhi::{Gpu, vk};
use tracing::debug;

use crate::error::FrameResult;

/// A view/framebuffer pair bound to a fixed extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// Image the view looks at.
    pub image: vk::Image,
    /// Color view over the image.
    pub view: vk::ImageView,
    /// Framebuffer with the view as its only attachment.
    pub framebuffer: vk::Framebuffer,
}

/// One render target per image, all at the same extent.
///
/// Views are created before framebuffers and destroyed after them. A set is
/// only valid for the extent it was built at; callers rebuild it whenever the
/// surface extent changes.
#[derive(Debug, Default)]
pub struct RenderTargetSet {
    targets: Vec<RenderTarget>,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl RenderTargetSet {
    /// Builds a target for every image in `images`.
    ///
    /// # Errors
    ///
    /// Returns the first creation failure. If view *k* fails, views 0..k are
    /// released; if framebuffer *k* fails, framebuffers 0..k and every view
    /// are released. Nothing is leaked.
    pub fn build<G: Gpu>(
        gpu: &G,
        render_pass: vk::RenderPass,
        images: &[vk::Image],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> FrameResult<Self> {
        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            match gpu.create_image_view(image, format) {
                Ok(view) => views.push(view),
                Err(e) => {
                    release(gpu, &[], &views);
                    return Err(e.into());
                }
            }
        }

        let mut framebuffers = Vec::with_capacity(views.len());
        for &view in &views {
            match gpu.create_framebuffer(render_pass, view, extent) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    release(gpu, &framebuffers, &views);
                    return Err(e.into());
                }
            }
        }

        let targets = images
            .iter()
            .zip(views)
            .zip(framebuffers)
            .map(|((&image, view), framebuffer)| RenderTarget {
                image,
                view,
                framebuffer,
            })
            .collect::<Vec<_>>();

        debug!(
            "Built {} render targets at {}x{}",
            targets.len(),
            extent.width,
            extent.height
        );

        Ok(Self {
            targets,
            extent,
            format,
        })
    }

    /// Replaces the set with targets for `images` at `extent`.
    ///
    /// The old targets are destroyed first, so rebuilding twice in a row
    /// leaves exactly one set alive. On failure the set is left empty.
    pub fn rebuild<G: Gpu>(
        &mut self,
        gpu: &G,
        render_pass: vk::RenderPass,
        images: &[vk::Image],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> FrameResult<()> {
        self.destroy(gpu);
        *self = Self::build(gpu, render_pass, images, format, extent)?;
        Ok(())
    }

    /// Destroys framebuffers, then views. Safe to call more than once.
    ///
    /// Nothing in flight may still reference the targets.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        if self.targets.is_empty() {
            return;
        }
        let framebuffers: Vec<_> = self.targets.iter().map(|t| t.framebuffer).collect();
        let views: Vec<_> = self.targets.iter().map(|t| t.view).collect();
        release(gpu, &framebuffers, &views);
        self.targets.clear();
    }

    /// Returns the target at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&RenderTarget> {
        self.targets.get(index)
    }

    /// Returns the number of targets.
    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if the set holds no targets.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the extent every target was built at.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the format of the target views.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

fn release<G: Gpu>(gpu: &G, framebuffers: &[vk::Framebuffer], views: &[vk::ImageView]) {
    for &framebuffer in framebuffers {
        gpu.destroy_framebuffer(framebuffer);
    }
    for &view in views {
        gpu.destroy_image_view(view);
    }
}

#[cfg(test)]
mod tests {
    use framepipe_rhi::SwapchainDesc;
    use framepipe_rhi::mock::MockGpu;

    use super::*;

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

    fn setup(width: u32, height: u32) -> (MockGpu, vk::RenderPass, Vec<vk::Image>) {
        let gpu = MockGpu::new(width, height);
        let render_pass = gpu
            .create_render_pass(FORMAT, vk::ImageLayout::PRESENT_SRC_KHR)
            .unwrap();
        let swapchain = gpu
            .create_swapchain(
                &SwapchainDesc {
                    surface_format: vk::SurfaceFormatKHR {
                        format: FORMAT,
                        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                    },
                    present_mode: vk::PresentModeKHR::FIFO,
                    extent: vk::Extent2D { width, height },
                    min_image_count: 3,
                    usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    pre_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                },
                vk::SwapchainKHR::null(),
            )
            .unwrap();
        let images = gpu.swapchain_images(swapchain).unwrap();
        (gpu, render_pass, images)
    }

    #[test]
    fn test_build_one_target_per_image() {
        let (gpu, render_pass, images) = setup(16, 8);
        let extent = vk::Extent2D {
            width: 16,
            height: 8,
        };
        let set = RenderTargetSet::build(&gpu, render_pass, &images, FORMAT, extent).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.extent(), extent);
        assert_eq!(set.get(1).unwrap().image, images[1]);
        assert_eq!(gpu.live_views(), 3);
        assert_eq!(gpu.live_framebuffers(), 3);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_view_failure_releases_earlier_views() {
        let (gpu, render_pass, images) = setup(16, 8);
        gpu.fail_image_view_after(2);

        let result = RenderTargetSet::build(
            &gpu,
            render_pass,
            &images,
            FORMAT,
            vk::Extent2D {
                width: 16,
                height: 8,
            },
        );

        assert!(result.is_err());
        assert_eq!(gpu.live_views(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
    }

    #[test]
    fn test_framebuffer_failure_releases_everything() {
        let (gpu, _, images) = setup(16, 8);
        // An unknown render pass makes the first framebuffer fail.
        let result = RenderTargetSet::build(
            &gpu,
            vk::RenderPass::null(),
            &images,
            FORMAT,
            vk::Extent2D {
                width: 16,
                height: 8,
            },
        );

        assert!(result.is_err());
        assert_eq!(gpu.live_views(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
    }

    #[test]
    fn test_rebuild_twice_leaves_one_set() {
        let (gpu, render_pass, images) = setup(16, 8);
        let extent = vk::Extent2D {
            width: 16,
            height: 8,
        };
        let mut set = RenderTargetSet::build(&gpu, render_pass, &images, FORMAT, extent).unwrap();
        let first = *set.get(0).unwrap();

        set.rebuild(&gpu, render_pass, &images, FORMAT, extent)
            .unwrap();
        set.rebuild(&gpu, render_pass, &images, FORMAT, extent)
            .unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(gpu.live_views(), 3);
        assert_eq!(gpu.live_framebuffers(), 3);
        assert_ne!(set.get(0).unwrap().framebuffer, first.framebuffer);

        set.destroy(&gpu);
        set.destroy(&gpu);
        assert_eq!(gpu.live_views(), 0);
        assert_eq!(gpu.live_framebuffers(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }
}
