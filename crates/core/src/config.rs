//! Frame pipeline configuration.
//!
//! [`FrameConfig`] is plain data: it can be built in code, deserialized from
//! TOML, and is checked by [`FrameConfig::validate`] before a pipeline is
//! created from it. Every field has a default, so a TOML file only needs to
//! name the values it overrides.
//!
//! ```toml
//! frames_in_flight = 3
//! surface_format = "bgra8_srgb"
//! present_modes = ["mailbox", "fifo"]
//! composition = "blit"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of frame slots used when none is configured.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
/// Smallest accepted number of frame slots.
pub const MIN_FRAMES_IN_FLIGHT: usize = 2;
/// Largest accepted number of frame slots.
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Color format requested for the presentable surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceFormat {
    /// `B8G8R8A8_SRGB`
    #[default]
    Bgra8Srgb,
    /// `B8G8R8A8_UNORM`
    Bgra8Unorm,
    /// `R8G8B8A8_SRGB`
    Rgba8Srgb,
    /// `R8G8B8A8_UNORM`
    Rgba8Unorm,
}

/// Presentation mode, listed in priority order in [`FrameConfig::present_modes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    /// Replace the queued image, no tearing.
    Mailbox,
    /// No vsync, may tear.
    Immediate,
    /// Vsync. Always available.
    Fifo,
    /// Vsync unless a frame is late.
    FifoRelaxed,
}

/// How the rendered frame reaches the presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionMode {
    /// Render straight into the presentable image.
    #[default]
    Direct,
    /// Render into an offscreen image per frame slot, then copy it onto the
    /// presentable image on the transfer queue.
    Blit,
}

/// Frame pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Number of frame slots (CPU may run this many frames ahead of the GPU).
    pub frames_in_flight: usize,
    /// Preferred surface format. The first supported format is used when the
    /// surface does not offer it.
    pub surface_format: SurfaceFormat,
    /// Present modes in priority order. FIFO is used when none is supported.
    pub present_modes: Vec<PresentMode>,
    /// Direct rendering or offscreen render plus blit.
    pub composition: CompositionMode,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
    /// Upper bound on a frame slot fence wait. Exceeding it is fatal.
    pub fence_timeout_ms: u64,
    /// Upper bound on presentable image acquisition.
    pub acquire_timeout_ms: u64,
    /// Fixed offscreen extent for blit mode. `None` follows the surface.
    pub offscreen_extent: Option<[u32; 2]>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            surface_format: SurfaceFormat::default(),
            present_modes: vec![PresentMode::Mailbox, PresentMode::Fifo],
            composition: CompositionMode::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ms: 2_000,
            acquire_timeout_ms: 2_000,
            offscreen_extent: None,
        }
    }
}

impl FrameConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] for malformed TOML and [`Error::Config`] when
    /// the values fail [`validate`](Self::validate).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read, otherwise the same
    /// errors as [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded frame config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Checks that the configuration can drive a frame pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames_in_flight must be between {} and {}, got {}",
                MIN_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT, self.frames_in_flight
            )));
        }

        if self.present_modes.is_empty() {
            return Err(Error::Config(
                "present_modes must name at least one mode".to_string(),
            ));
        }

        if self.fence_timeout_ms == 0 || self.acquire_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be greater than 0".to_string()));
        }

        if let Some([width, height]) = self.offscreen_extent {
            if self.composition != CompositionMode::Blit {
                return Err(Error::Config(
                    "offscreen_extent requires composition = \"blit\"".to_string(),
                ));
            }
            if width == 0 || height == 0 {
                return Err(Error::Config(format!(
                    "offscreen_extent must be non-zero, got {}x{}",
                    width, height
                )));
            }
        }

        Ok(())
    }

    /// Returns true when frames are rendered offscreen and blitted.
    #[inline]
    pub fn uses_blit(&self) -> bool {
        self.composition == CompositionMode::Blit
    }
}
