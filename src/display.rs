//! Framebuffer geometry.
//!
//! Mode setting on the real framebuffer device happens outside this crate.
//! Whatever performs it hands back a [`DisplayGeometry`] once, at setup, and
//! the bridges treat it as fixed for their whole lifetime.

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Pixel formats the framebuffer can report.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 32 bpp, alpha ignored.
    Rgbx8888,
    /// 16 bpp.
    Rgb565,
}

impl PixelFormat {
    /// Graphics HAL format code.
    pub fn code(self) -> i32 {
        match self {
            Self::Rgbx8888 => 2,
            Self::Rgb565 => 4,
        }
    }

    /// Format the framebuffer uses for a given depth.
    pub fn from_bits_per_pixel(bpp: u32) -> Self {
        if bpp == 32 {
            Self::Rgbx8888
        } else {
            Self::Rgb565
        }
    }

    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgbx8888 => 4,
            Self::Rgb565 => 2,
        }
    }
}

/// Fixed framebuffer record produced by display setup.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DisplayGeometry {
    /// Visible width in pixels.
    pub width: u32,
    /// Visible height in lines.
    pub height: u32,
    /// Line stride in pixels.
    pub stride: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Horizontal density.
    pub xdpi: f32,
    /// Vertical density.
    pub ydpi: f32,
    /// Refresh rate in Hz.
    pub fps: f32,
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
            stride: 720,
            format: PixelFormat::Rgbx8888,
            xdpi: 160.0,
            ydpi: 160.0,
            fps: 60.0,
        }
    }
}

impl DisplayGeometry {
    /// Smallest swap interval the display accepts.
    pub const MIN_SWAP_INTERVAL: i32 = 1;
    /// Largest swap interval the display accepts.
    pub const MAX_SWAP_INTERVAL: i32 = 1;

    /// Bytes per line (`stride × bytes per pixel`).
    pub fn line_length(&self) -> usize {
        self.stride as usize * self.format.bytes_per_pixel() as usize
    }

    /// Bytes in one full frame.
    pub fn frame_len(&self) -> usize {
        self.line_length() * self.height as usize
    }

    /// Accept `interval` only if it lies in
    /// `[MIN_SWAP_INTERVAL, MAX_SWAP_INTERVAL]`.
    pub fn check_swap_interval(interval: i32) -> BridgeResult<()> {
        if (Self::MIN_SWAP_INTERVAL..=Self::MAX_SWAP_INTERVAL).contains(&interval) {
            Ok(())
        } else {
            Err(BridgeError::UnsupportedOperation(format!(
                "swap interval {interval} outside [{}, {}]",
                Self::MIN_SWAP_INTERVAL,
                Self::MAX_SWAP_INTERVAL
            )))
        }
    }
}

/// One-time display setup.
pub trait DisplaySetup {
    /// Query the framebuffer and return its geometry.
    fn setup(&self) -> DisplayGeometry;
}

/// Display setup backed by a configured geometry.
#[derive(Debug, Clone, Copy)]
pub struct FixedDisplay(pub DisplayGeometry);

impl DisplaySetup for FixedDisplay {
    fn setup(&self) -> DisplayGeometry {
        self.0
    }
}
