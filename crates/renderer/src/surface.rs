//! Presentable-surface management.
//!
//! [`SurfaceManager`] owns the swapchain and its ring of presentable images.
//! It hands out presentable indices through [`acquire`](SurfaceManager::acquire),
//! takes them back through [`present`](SurfaceManager::present), and turns
//! every flavor of surface invalidation (resize notification, window extent
//! drift, out-of-date or suboptimal driver results) into
//! [`AcquireStatus::Stale`] / [`PresentStatus::Stale`] rather than errors.
//!
//! # Present-ready semaphores
//!
//! The semaphore presentation waits on is keyed by presentable index, not by
//! frame slot. A slot's semaphore could otherwise be re-signaled while the
//! presentation engine still holds a wait on it from an earlier frame that
//! used the same slot but a different image.

use std::time::Duration;

use framepipe_core::{CompositionMode, FrameConfig, PresentMode, SurfaceFormat};
use framepipe_rhi::swapchain::{
    SwapchainSupportDetails, choose_extent, choose_present_mode, choose_surface_format,
    determine_image_count,
};
use framepipe_rhi::sync::timeout_ns;
use framepipe_rhi::{Gpu, RhiError, SwapchainDesc, vk};
use tracing::{debug, info, warn};

use crate::error::{FrameError, FrameResult};

/// Maps a configured surface format to its Vulkan format.
pub fn vk_format(format: SurfaceFormat) -> vk::Format {
    match format {
        SurfaceFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        SurfaceFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        SurfaceFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        SurfaceFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
    }
}

/// Maps a configured present mode to its Vulkan present mode.
pub fn vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
    }
}

/// What the surface manager asks of every swapchain it builds.
#[derive(Debug, Clone)]
pub struct SurfacePreferences {
    /// Preferred format of the presentable images.
    pub format: vk::Format,
    /// Present modes in priority order.
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Usage the presentable images must support.
    pub usage: vk::ImageUsageFlags,
    /// Upper bound on a single acquisition.
    pub acquire_timeout: Duration,
}

impl SurfacePreferences {
    /// Derives the preferences from a pipeline configuration.
    ///
    /// Direct composition renders into presentable images, so they must be
    /// color attachments; blit composition only copies into them.
    pub fn from_config(config: &FrameConfig) -> Self {
        let usage = match config.composition {
            CompositionMode::Direct => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            CompositionMode::Blit => vk::ImageUsageFlags::TRANSFER_DST,
        };

        Self {
            format: vk_format(config.surface_format),
            present_modes: config
                .present_modes
                .iter()
                .copied()
                .map(vk_present_mode)
                .collect(),
            usage,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        }
    }
}

/// Returns the surface format a pipeline built from `config` will render to.
///
/// Embedders call this before building their graphics pipeline, whose color
/// attachment format must match in direct composition.
///
/// # Errors
///
/// Returns [`FrameError::Configuration`] if the surface offers no formats.
pub fn select_surface_format<G: Gpu>(
    gpu: &G,
    config: &FrameConfig,
) -> FrameResult<vk::SurfaceFormatKHR> {
    let support = gpu.surface_support()?;
    choose_surface_format(&support.formats, vk_format(config.surface_format))
        .ok_or_else(|| FrameError::Configuration("Surface offers no formats".to_string()))
}

/// Outcome of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image was acquired and the semaphore will be signaled.
    Ok {
        /// Index into the presentable image ring.
        image_index: u32,
        /// The swapchain still works but no longer matches the surface.
        suboptimal: bool,
    },
    /// Nothing was acquired; the surface must be rebuilt first.
    Stale,
}

/// Outcome of a present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Presented to an up-to-date surface.
    Ok,
    /// Presented (or dropped) against a surface that must be rebuilt.
    Stale,
}

struct SwapchainParts {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    window_extent: vk::Extent2D,
}

/// Owner of the swapchain and its presentable images.
pub struct SurfaceManager {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    /// Window extent the current swapchain was built for.
    window_extent: vk::Extent2D,
    /// One present-ready semaphore per presentable image.
    present_ready: Vec<vk::Semaphore>,
    /// Presentable indices acquired but not yet presented.
    borrowed: Vec<bool>,
    invalidated: bool,
    preferences: SurfacePreferences,
}

impl SurfaceManager {
    /// Builds the swapchain for the current window extent.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Configuration`] for a zero-sized window, a
    /// surface without formats or present modes, or one whose presentable
    /// images lack the required usage. Other failures are backend errors.
    pub fn new<G: Gpu>(gpu: &G, preferences: SurfacePreferences) -> FrameResult<Self> {
        let window = gpu.window_extent();
        if window.width == 0 || window.height == 0 {
            return Err(FrameError::Configuration(format!(
                "Surface extent must be non-zero, got {}x{}",
                window.width, window.height
            )));
        }

        let parts = Self::create_swapchain(gpu, &preferences, vk::SwapchainKHR::null())?;

        let present_ready = match create_semaphores(gpu, parts.images.len()) {
            Ok(semaphores) => semaphores,
            Err(e) => {
                gpu.destroy_swapchain(parts.swapchain);
                return Err(e);
            }
        };

        info!(
            "Surface created: {}x{}, {} images, {:?}, {:?}",
            parts.extent.width,
            parts.extent.height,
            parts.images.len(),
            parts.surface_format.format,
            parts.present_mode
        );

        Ok(Self {
            swapchain: parts.swapchain,
            borrowed: vec![false; parts.images.len()],
            images: parts.images,
            surface_format: parts.surface_format,
            present_mode: parts.present_mode,
            extent: parts.extent,
            window_extent: parts.window_extent,
            present_ready,
            invalidated: false,
            preferences,
        })
    }

    fn create_swapchain<G: Gpu>(
        gpu: &G,
        preferences: &SurfacePreferences,
        old_swapchain: vk::SwapchainKHR,
    ) -> FrameResult<SwapchainParts> {
        let support: SwapchainSupportDetails = gpu.surface_support()?;

        if !support.is_adequate() {
            return Err(FrameError::Configuration(
                "Surface offers no formats or present modes".to_string(),
            ));
        }
        if !support.supports_usage(preferences.usage) {
            return Err(FrameError::Configuration(format!(
                "Presentable images do not support {:?} usage",
                preferences.usage
            )));
        }

        let surface_format = choose_surface_format(&support.formats, preferences.format)
            .ok_or_else(|| FrameError::Configuration("Surface offers no formats".to_string()))?;
        let present_mode = choose_present_mode(&support.present_modes, &preferences.present_modes);
        let window_extent = gpu.window_extent();
        let extent = choose_extent(&support.capabilities, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Err(FrameError::Configuration(format!(
                "Surface extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let desc = SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            min_image_count: determine_image_count(&support.capabilities),
            usage: preferences.usage,
            pre_transform: support.capabilities.current_transform,
        };

        let swapchain = gpu.create_swapchain(&desc, old_swapchain)?;
        let images = match gpu.swapchain_images(swapchain) {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => {
                gpu.destroy_swapchain(swapchain);
                return Err(RhiError::SwapchainError("Swapchain has no images".to_string()).into());
            }
            Err(e) => {
                gpu.destroy_swapchain(swapchain);
                return Err(e.into());
            }
        };

        Ok(SwapchainParts {
            swapchain,
            images,
            surface_format,
            present_mode,
            extent,
            window_extent,
        })
    }

    /// Returns true when the swapchain no longer matches the surface.
    pub fn is_stale<G: Gpu>(&self, gpu: &G) -> bool {
        self.invalidated || gpu.window_extent() != self.window_extent
    }

    /// Marks the swapchain stale so the next acquisition reports it.
    pub fn invalidate(&mut self) {
        if !self.invalidated {
            debug!("Surface invalidated");
        }
        self.invalidated = true;
    }

    /// Acquires the next presentable image, signaling `semaphore`.
    ///
    /// Returns [`AcquireStatus::Stale`] without touching the driver when the
    /// surface is already known to be stale. On `Stale` nothing is acquired
    /// and `semaphore` is left unsignaled.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PresentableImageInUse`] when the driver hands out
    /// an index that was never presented, or the driver's failure.
    pub fn acquire<G: Gpu>(
        &mut self,
        gpu: &G,
        semaphore: vk::Semaphore,
    ) -> FrameResult<AcquireStatus> {
        if self.is_stale(gpu) {
            debug!("Surface stale before acquire");
            self.invalidated = true;
            return Ok(AcquireStatus::Stale);
        }

        let timeout = timeout_ns(self.preferences.acquire_timeout);
        match gpu.acquire_next_image(self.swapchain, timeout, semaphore) {
            Ok((image_index, suboptimal)) => {
                let borrowed = self.borrowed.get_mut(image_index as usize).ok_or_else(|| {
                    RhiError::SwapchainError(format!(
                        "Acquired index {} out of {} images",
                        image_index,
                        self.images.len()
                    ))
                })?;
                if *borrowed {
                    return Err(FrameError::PresentableImageInUse(image_index));
                }
                *borrowed = true;

                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", image_index);
                    self.invalidated = true;
                }

                Ok(AcquireStatus::Ok {
                    image_index,
                    suboptimal,
                })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                self.invalidated = true;
                Ok(AcquireStatus::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphores` and
    /// returns it to the ring.
    ///
    /// # Errors
    ///
    /// Returns an error if `image_index` is not currently acquired, or the
    /// driver's failure. Out-of-date and suboptimal results are `Stale`.
    pub fn present<G: Gpu>(
        &mut self,
        gpu: &G,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> FrameResult<PresentStatus> {
        match self.borrowed.get_mut(image_index as usize) {
            Some(borrowed) if *borrowed => *borrowed = false,
            _ => {
                return Err(RhiError::InvalidHandle(format!(
                    "Presentable image {} was not acquired",
                    image_index
                ))
                .into());
            }
        }

        match gpu.queue_present(self.swapchain, image_index, wait_semaphores) {
            Ok(false) if !self.invalidated => Ok(PresentStatus::Ok),
            Ok(suboptimal) => {
                debug!(
                    "Present on stale surface (suboptimal={}, invalidated={})",
                    suboptimal, self.invalidated
                );
                self.invalidated = true;
                Ok(PresentStatus::Stale)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                debug!("Swapchain out of date during present");
                self.invalidated = true;
                Ok(PresentStatus::Stale)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Recreates the swapchain at the current window extent.
    ///
    /// Waits for the device to go idle, builds the new swapchain from the old
    /// one, destroys the old ring and recreates the present-ready semaphores.
    /// Every previously acquired index is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait or creation fails. The old swapchain stays
    /// owned (and is destroyed with the manager) when creation fails.
    pub fn rebuild<G: Gpu>(&mut self, gpu: &G) -> FrameResult<()> {
        gpu.wait_idle()?;

        let old_format = self.surface_format.format;
        let parts = Self::create_swapchain(gpu, &self.preferences, self.swapchain)?;

        gpu.destroy_swapchain(self.swapchain);
        for semaphore in self.present_ready.drain(..) {
            gpu.destroy_semaphore(semaphore);
        }

        self.swapchain = parts.swapchain;
        self.borrowed = vec![false; parts.images.len()];
        self.images = parts.images;
        self.surface_format = parts.surface_format;
        self.present_mode = parts.present_mode;
        self.extent = parts.extent;
        self.window_extent = parts.window_extent;
        self.present_ready = create_semaphores(gpu, self.images.len())?;
        self.invalidated = false;

        if self.surface_format.format != old_format {
            warn!(
                "Surface format changed on rebuild: {:?} -> {:?}",
                old_format, self.surface_format.format
            );
        }

        info!(
            "Surface rebuilt: {}x{}, {} images",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        Ok(())
    }

    /// Destroys the swapchain and semaphores. Safe to call more than once.
    ///
    /// The device must be idle.
    pub fn destroy<G: Gpu>(&mut self, gpu: &G) {
        for semaphore in self.present_ready.drain(..) {
            gpu.destroy_semaphore(semaphore);
        }
        if self.swapchain != vk::SwapchainKHR::null() {
            gpu.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
            info!("Surface destroyed");
        }
        self.images.clear();
        self.borrowed.clear();
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the presentable images.
    #[inline]
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// Returns the presentable image at `index`.
    #[inline]
    pub fn image(&self, index: u32) -> Option<vk::Image> {
        self.images.get(index as usize).copied()
    }

    /// Returns the number of presentable images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Returns the semaphore presentation of `index` waits on.
    #[inline]
    pub fn present_ready(&self, index: u32) -> Option<vk::Semaphore> {
        self.present_ready.get(index as usize).copied()
    }

    /// Returns the format and color space of the presentable images.
    #[inline]
    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Returns the format of the presentable images.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Returns the present mode.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the extent of the presentable images.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns true once the swapchain is known to need a rebuild.
    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Returns true while `index` is acquired and not yet presented.
    #[inline]
    pub fn is_borrowed(&self, index: u32) -> bool {
        self.borrowed.get(index as usize).copied().unwrap_or(false)
    }
}

fn create_semaphores<G: Gpu>(gpu: &G, count: usize) -> FrameResult<Vec<vk::Semaphore>> {
    let mut semaphores = Vec::with_capacity(count);
    for _ in 0..count {
        match gpu.create_semaphore() {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                for semaphore in semaphores {
                    gpu.destroy_semaphore(semaphore);
                }
                return Err(e.into());
            }
        }
    }
    Ok(semaphores)
}

#[cfg(test)]
mod tests {
    use framepipe_rhi::mock::{GpuEvent, MockGpu};

    use super::*;

    fn preferences() -> SurfacePreferences {
        SurfacePreferences::from_config(&FrameConfig::default())
    }

    fn acquire_count(gpu: &MockGpu) -> usize {
        gpu.events()
            .iter()
            .filter(|e| matches!(e, GpuEvent::Acquire { .. }))
            .count()
    }

    #[test]
    fn test_preferences_from_config() {
        let mut config = FrameConfig::default();
        let prefs = SurfacePreferences::from_config(&config);
        assert_eq!(prefs.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(prefs.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(
            prefs.present_modes,
            vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]
        );

        config.composition = CompositionMode::Blit;
        let prefs = SurfacePreferences::from_config(&config);
        assert_eq!(prefs.usage, vk::ImageUsageFlags::TRANSFER_DST);
    }

    #[test]
    fn test_new_selects_parameters() {
        let gpu = MockGpu::new(64, 48);
        let surface = SurfaceManager::new(&gpu, preferences()).unwrap();

        assert_eq!(surface.extent(), vk::Extent2D { width: 64, height: 48 });
        assert_eq!(surface.format(), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(surface.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(surface.image_count(), 3);
        assert_eq!(gpu.live_semaphores(), 3);
        assert!(!surface.is_invalidated());
    }

    #[test]
    fn test_zero_extent_is_configuration_error() {
        let gpu = MockGpu::new(0, 48);
        let result = SurfaceManager::new(&gpu, preferences());
        assert!(matches!(result, Err(FrameError::Configuration(_))));
        assert_eq!(gpu.live_swapchains(), 0);
    }

    #[test]
    fn test_unsupported_usage_is_configuration_error() {
        let gpu = MockGpu::new(64, 48).with_supported_usage(vk::ImageUsageFlags::TRANSFER_DST);
        let result = SurfaceManager::new(&gpu, preferences());
        assert!(matches!(result, Err(FrameError::Configuration(_))));
    }

    #[test]
    fn test_fallback_format() {
        let gpu = MockGpu::new(64, 48).with_surface_formats(&[vk::Format::R8G8B8A8_UNORM]);
        let surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        assert_eq!(surface.format(), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(
            select_surface_format(&gpu, &FrameConfig::default())
                .unwrap()
                .format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_acquire_and_present() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        let status = surface.acquire(&gpu, semaphore).unwrap();
        let AcquireStatus::Ok { image_index, suboptimal } = status else {
            panic!("unexpected {status:?}");
        };
        assert!(!suboptimal);
        assert!(surface.is_borrowed(image_index));

        let image = surface.image(image_index).unwrap();
        gpu.set_image_layout(image, vk::ImageLayout::PRESENT_SRC_KHR);

        let status = surface.present(&gpu, image_index, &[semaphore]).unwrap();
        assert_eq!(status, PresentStatus::Ok);
        assert!(!surface.is_borrowed(image_index));
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_present_without_acquire_fails() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        assert!(surface.present(&gpu, 0, &[]).is_err());
    }

    #[test]
    fn test_resize_is_stale_without_acquiring() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.set_window_extent(80, 60);
        assert_eq!(
            surface.acquire(&gpu, semaphore).unwrap(),
            AcquireStatus::Stale
        );
        assert_eq!(acquire_count(&gpu), 0);
        assert!(!gpu.is_semaphore_signaled(semaphore));

        surface.rebuild(&gpu).unwrap();
        assert_eq!(surface.extent(), vk::Extent2D { width: 80, height: 60 });
        assert!(matches!(
            surface.acquire(&gpu, semaphore).unwrap(),
            AcquireStatus::Ok { .. }
        ));
    }

    #[test]
    fn test_invalidate_is_stale() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        surface.invalidate();
        assert_eq!(
            surface.acquire(&gpu, semaphore).unwrap(),
            AcquireStatus::Stale
        );
    }

    #[test]
    fn test_driver_out_of_date_is_stale() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.push_acquire_result(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(
            surface.acquire(&gpu, semaphore).unwrap(),
            AcquireStatus::Stale
        );
        assert!(surface.is_invalidated());
    }

    #[test]
    fn test_suboptimal_acquire_proceeds_then_present_is_stale() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.push_acquire_result(vk::Result::SUBOPTIMAL_KHR);
        let status = surface.acquire(&gpu, semaphore).unwrap();
        let AcquireStatus::Ok { image_index, suboptimal } = status else {
            panic!("unexpected {status:?}");
        };
        assert!(suboptimal);

        let status = surface.present(&gpu, image_index, &[semaphore]).unwrap();
        assert_eq!(status, PresentStatus::Stale);
    }

    #[test]
    fn test_reacquiring_borrowed_index_is_an_error() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let first = gpu.create_semaphore().unwrap();
        let second = gpu.create_semaphore().unwrap();

        let AcquireStatus::Ok { image_index, .. } = surface.acquire(&gpu, first).unwrap() else {
            panic!("expected an image");
        };
        gpu.force_acquire_index(image_index);
        let result = surface.acquire(&gpu, second);
        assert!(matches!(
            result,
            Err(FrameError::PresentableImageInUse(i)) if i == image_index
        ));
    }

    #[test]
    fn test_rebuild_twice_does_not_leak() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();

        gpu.set_window_extent(32, 32);
        surface.rebuild(&gpu).unwrap();
        surface.rebuild(&gpu).unwrap();

        assert_eq!(gpu.live_swapchains(), 1);
        assert_eq!(gpu.live_semaphores(), surface.image_count());
        assert_eq!(surface.extent(), vk::Extent2D { width: 32, height: 32 });

        surface.destroy(&gpu);
        surface.destroy(&gpu);
        assert_eq!(gpu.live_swapchains(), 0);
        assert_eq!(gpu.live_semaphores(), 0);
        assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    }

    #[test]
    fn test_device_lost_on_acquire() {
        let gpu = MockGpu::new(64, 48);
        let mut surface = SurfaceManager::new(&gpu, preferences()).unwrap();
        let semaphore = gpu.create_semaphore().unwrap();

        gpu.lose_device();
        assert!(matches!(
            surface.acquire(&gpu, semaphore),
            Err(FrameError::DeviceLost)
        ));
    }
}
