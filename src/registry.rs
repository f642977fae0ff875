//! Module registry.
//!
//! The display stack looks modules up by kind and opens devices by name.
//! Each kind has a fixed set of device names it answers to; anything else
//! is refused with [`BridgeError::UnsupportedOperation`].

use std::fmt;

use crate::buffer::{BufferSession, Framebuffer, ShmFramebuffer};
use crate::config::Config;
use crate::display::{DisplaySetup, FixedDisplay};
use crate::error::{BridgeError, BridgeResult};
use crate::sensor::{sensor_list, SensorInfo, SensorSession};

/// Device name the sensor module answers to.
pub const SENSORS_POLL_DEVICE: &str = "poll";

/// Device name of the buffer allocator, which buffer modules do not provide.
pub const GPU_ALLOCATOR_DEVICE: &str = "gpu0";

/// Default framebuffer device name.
pub const FRAMEBUFFER_DEVICE: &str = "fb0";

/// Modules this crate provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Accelerometer bridge.
    Sensors,
    /// Framebuffer that passes buffer handles to the renderer socket.
    ShareBuffer,
    /// Framebuffer that copies frames into shared memory.
    ShmBuffer,
}

impl ModuleKind {
    /// Every module kind.
    pub const ALL: [Self; 3] = [Self::Sensors, Self::ShareBuffer, Self::ShmBuffer];

    /// Human-readable module name.
    pub fn module_name(self) -> &'static str {
        match self {
            Self::Sensors => "sfdroid SENSORS Module",
            Self::ShareBuffer => "sharebuffer",
            Self::ShmBuffer => "shmbuffer",
        }
    }

    /// Whether `device` is a name this module can open.
    pub fn accepts(self, device: &str) -> bool {
        match self {
            Self::Sensors => device == SENSORS_POLL_DEVICE,
            Self::ShareBuffer | Self::ShmBuffer => !device.is_empty() && device != GPU_ALLOCATOR_DEVICE,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_name())
    }
}

/// An opened device.
#[derive(Debug)]
pub enum Device {
    /// Sensor poll device.
    Sensors(SensorSession),
    /// Socket-backed framebuffer.
    Framebuffer(Framebuffer),
    /// Shared-memory framebuffer.
    Shm(ShmFramebuffer),
}

impl Device {
    /// Module that produced this device.
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Sensors(_) => ModuleKind::Sensors,
            Self::Framebuffer(_) => ModuleKind::ShareBuffer,
            Self::Shm(_) => ModuleKind::ShmBuffer,
        }
    }
}

/// Opens devices against one configuration.
pub struct Registry {
    config: Config,
    display: Box<dyn DisplaySetup + Send + Sync>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Registry whose display setup reports the configured geometry.
    pub fn new(config: Config) -> Self {
        let display = FixedDisplay(config.display);
        Self {
            config,
            display: Box::new(display),
        }
    }

    /// Replace the display setup used by framebuffer modules.
    pub fn with_display(mut self, display: impl DisplaySetup + Send + Sync + 'static) -> Self {
        self.display = Box::new(display);
        self
    }

    /// Configuration devices are opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sensors the sensor module reports.
    pub fn sensors(&self) -> &'static [SensorInfo] {
        sensor_list()
    }

    /// Open `device` on module `kind`.
    ///
    /// Opening never connects; sessions dial lazily on first use.
    pub fn open(&self, kind: ModuleKind, device: &str) -> BridgeResult<Device> {
        if !kind.accepts(device) {
            return Err(BridgeError::UnsupportedOperation(format!(
                "{kind} has no device {device:?}"
            )));
        }
        log::debug!("opening {device} on {kind}");

        Ok(match kind {
            ModuleKind::Sensors => Device::Sensors(SensorSession::from_config(&self.config)),
            ModuleKind::ShareBuffer => Device::Framebuffer(Framebuffer::setup(
                self.display.as_ref(),
                BufferSession::from_config(&self.config),
            )),
            ModuleKind::ShmBuffer => Device::Shm(ShmFramebuffer::setup(
                self.display.as_ref(),
                &self.config.shm_path,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayGeometry, PixelFormat};

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            runtime_dir: dir.to_path_buf(),
            shm_path: dir.join("droid_screen"),
            ..Config::default()
        }
    }

    #[test]
    fn module_names() {
        assert_eq!(ModuleKind::Sensors.module_name(), "sfdroid SENSORS Module");
        assert_eq!(ModuleKind::ShareBuffer.to_string(), "sharebuffer");
        assert_eq!(ModuleKind::ShmBuffer.to_string(), "shmbuffer");
    }

    #[test]
    fn sensors_only_open_poll() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(config_in(dir.path()));

        let device = registry.open(ModuleKind::Sensors, "poll").expect("poll");
        let Device::Sensors(session) = device else {
            panic!("expected sensor device");
        };
        assert_eq!(session.endpoint(), dir.path().join("sensors_handle"));
        assert!(!session.is_connected());

        assert!(matches!(
            registry.open(ModuleKind::Sensors, "fb0"),
            Err(BridgeError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn buffer_modules_refuse_allocator_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(config_in(dir.path()));
        for kind in [ModuleKind::ShareBuffer, ModuleKind::ShmBuffer] {
            assert!(matches!(
                registry.open(kind, GPU_ALLOCATOR_DEVICE),
                Err(BridgeError::UnsupportedOperation(_))
            ));
        }
    }

    #[test]
    fn framebuffer_uses_display_setup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let geometry = DisplayGeometry {
            width: 480,
            height: 800,
            stride: 480,
            format: PixelFormat::Rgb565,
            ..DisplayGeometry::default()
        };
        let registry = Registry::new(config_in(dir.path())).with_display(FixedDisplay(geometry));

        let device = registry.open(ModuleKind::ShareBuffer, FRAMEBUFFER_DEVICE).expect("fb0");
        assert_eq!(device.kind(), ModuleKind::ShareBuffer);
        let Device::Framebuffer(fb) = device else {
            panic!("expected framebuffer");
        };
        assert_eq!(fb.geometry(), geometry);
        assert_eq!(fb.session().endpoint(), dir.path().join("gralloc_buffer_handle"));
    }

    #[test]
    fn shm_module_maps_configured_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::new(config_in(dir.path()));
        let Device::Shm(fb) = registry.open(ModuleKind::ShmBuffer, "fb0").expect("shm") else {
            panic!("expected shm framebuffer");
        };
        assert!(fb.is_mapped());
        assert_eq!(
            std::fs::metadata(dir.path().join("droid_screen")).expect("meta").len(),
            DisplayGeometry::default().frame_len() as u64
        );
    }
}
