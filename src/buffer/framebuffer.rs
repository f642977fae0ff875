//! Framebuffer device backed by the socket renderer.

use crate::config::Config;
use crate::display::{DisplayGeometry, DisplaySetup};
use crate::error::BridgeResult;

use super::protocol::{BufferDescriptor, BufferMetadata};
use super::session::{BufferSession, PostStatus};

/// `sharebuffer` framebuffer: fixed geometry plus a renderer session.
#[derive(Debug)]
pub struct Framebuffer {
    geometry: DisplayGeometry,
    session: BufferSession,
}

impl Framebuffer {
    /// Run display setup once and pair the result with `session`.
    pub fn setup(display: &dyn DisplaySetup, session: BufferSession) -> Self {
        let geometry = display.setup();
        log::info!(
            "[buffer] framebuffer {}x{} stride {} format {:?}",
            geometry.width,
            geometry.height,
            geometry.stride,
            geometry.format
        );
        Self { geometry, session }
    }

    /// Framebuffer for the renderer configured in `config`.
    pub fn from_config(config: &Config, display: &dyn DisplaySetup) -> Self {
        Self::setup(display, BufferSession::from_config(config))
    }

    /// Geometry reported at setup.
    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    /// Metadata describing a full-screen buffer of this framebuffer.
    pub fn screen_metadata(&self) -> BufferMetadata {
        BufferMetadata {
            width: self.geometry.width,
            height: self.geometry.height,
            stride: self.geometry.stride,
            pixel_format: self.geometry.format.code(),
        }
    }

    /// Underlying renderer session.
    pub fn session(&self) -> &BufferSession {
        &self.session
    }

    /// Only an interval of 1 is supported.
    pub fn set_swap_interval(&self, interval: i32) -> BridgeResult<()> {
        DisplayGeometry::check_swap_interval(interval)
    }

    /// Hand one rendered buffer to the renderer.
    pub fn post(
        &self,
        descriptor: &BufferDescriptor<'_>,
        metadata: BufferMetadata,
    ) -> BridgeResult<PostStatus> {
        self.session.post(descriptor, metadata)
    }
}
