//! Swapchain support queries and selection policy.
//!
//! This module decides *what* swapchain to build from what the surface
//! supports; creating, acquiring from and presenting to the swapchain goes
//! through [`Gpu`](crate::Gpu).
//!
//! # Overview
//!
//! - [`SwapchainSupportDetails`] holds the surface capabilities, formats and
//!   present modes
//! - [`choose_surface_format`], [`choose_present_mode`], [`choose_extent`] and
//!   [`determine_image_count`] pick the swapchain parameters
//! - [`sharing_mode`] picks exclusive or concurrent sharing for the queue
//!   families that touch presentable images

use ash::vk;
use tracing::{debug, warn};

use crate::error::RhiError;

/// What a surface offers to the swapchains built on it.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Image count bounds, extent limits, transforms and supported usage.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Format and color space pairs.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Reads the capabilities, formats and present modes of `surface` on
    /// `physical_device`.
    ///
    /// # Errors
    ///
    /// Returns the first failing query's result.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        loader: &ash::khr::surface::Instance,
    ) -> Result<Self, RhiError> {
        // SAFETY: the caller guarantees both handles belong to `loader`'s instance.
        let (capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(physical_device, surface)?,
                loader.get_physical_device_surface_formats(physical_device, surface)?,
                loader.get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        let max_images = match capabilities.max_image_count {
            0 => "any".to_string(),
            n => n.to_string(),
        };
        debug!(
            "Surface offers {} formats, {} present modes, {}..{} images",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            max_images
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Returns true when a swapchain can be built at all.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Returns true if presentable images may be created with `usage`.
    #[inline]
    pub fn supports_usage(&self, usage: vk::ImageUsageFlags) -> bool {
        self.capabilities.supported_usage_flags.contains(usage)
    }
}

/// Chooses the surface format.
///
/// Takes `preferred` with SRGB_NONLINEAR color space when offered, then
/// `preferred` in any color space, then the first available format. A single
/// `UNDEFINED` entry means the surface accepts any format. Returns `None`
/// only when `formats` is empty.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::Format,
) -> Option<vk::SurfaceFormatKHR> {
    if let [only] = formats
        && only.format == vk::Format::UNDEFINED
    {
        debug!("Surface accepts any format, using {:?}", preferred);
        return Some(vk::SurfaceFormatKHR {
            format: preferred,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        });
    }

    let exact = formats.iter().find(|f| {
        f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });
    if let Some(&format) = exact {
        debug!("Selected preferred surface format: {:?}", preferred);
        return Some(format);
    }

    if let Some(&format) = formats.iter().find(|f| f.format == preferred) {
        warn!(
            "Preferred surface format {:?} only offered in {:?}",
            preferred, format.color_space
        );
        return Some(format);
    }

    let first = formats.first().copied()?;
    warn!(
        "Preferred surface format {:?} not supported, using {:?}",
        preferred, first.format
    );
    Some(first)
}

/// Chooses the present mode.
///
/// Returns the first entry of `priority` that the surface supports. Falls
/// back to FIFO, which every surface supports.
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    priority: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    if let Some(&mode) = priority.iter().find(|mode| available.contains(mode)) {
        debug!("Selected {:?} present mode", mode);
        return mode;
    }

    debug!("No requested present mode supported, using FIFO");
    vk::PresentModeKHR::FIFO
}

/// Chooses the presentable image extent.
///
/// Surfaces that report a current extent dictate it. Otherwise (a
/// `u32::MAX` sentinel) the window extent is clamped into the surface limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    let (min, max) = (caps.min_image_extent, caps.max_image_extent);
    let extent = vk::Extent2D {
        width: window.width.clamp(min.width, max.width),
        height: window.height.clamp(min.height, max.height),
    };

    debug!(
        "Surface leaves extent to the window: {}x{} -> {}x{}",
        window.width, window.height, extent.width, extent.height
    );

    extent
}

/// Determines the number of presentable images to request.
///
/// One more than the surface minimum, capped by its maximum (0 means
/// uncapped).
pub fn determine_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    match caps.max_image_count {
        0 => caps.min_image_count + 1,
        max => (caps.min_image_count + 1).min(max),
    }
}

/// Chooses the sharing mode for images touched by `families`.
///
/// Returns EXCLUSIVE with no family list when every family is the same,
/// otherwise CONCURRENT with the distinct families.
pub fn sharing_mode(families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let mut distinct: Vec<u32> = Vec::with_capacity(families.len());
    for &family in families {
        if !distinct.contains(&family) {
            distinct.push(family);
        }
    }

    if distinct.len() > 1 {
        (vk::SharingMode::CONCURRENT, distinct)
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}
