//! Sensor polling bridge.
//!
//! Relays accelerometer samples from the sfdroid host to the guest sensor
//! framework over `<root>/sensors_handle`.
//!
//! ```text
//! sensor framework ──poll(n)──► SensorSession ──get:accelerometer──► sfdroid host
//!                  ◄─events───                ◄─acceleration:x:y:z:t─
//! ```
//!
//! See [`protocol`] for the framing and the text grammar.

pub mod protocol;
pub mod session;

pub use protocol::{Command, SensorEvent};
pub use session::SensorSession;

use crate::error::{BridgeError, BridgeResult};

/// Sensor handles known to the bridge.
///
/// The handle values are fixed by the guest sensor table. Only
/// [`SensorId::Acceleration`] is served by the host today; the others exist
/// so their handles are recognized and rejected with a clear message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorId {
    /// Three-axis accelerometer.
    Acceleration,
    /// Magnetometer.
    MagneticField,
    /// Orientation.
    Orientation,
    /// Ambient temperature.
    Temperature,
    /// Proximity.
    Proximity,
}

impl SensorId {
    /// Every entry of the sensor table, in handle order.
    pub const ALL: [Self; 5] = [
        Self::Acceleration,
        Self::MagneticField,
        Self::Orientation,
        Self::Temperature,
        Self::Proximity,
    ];

    /// Numeric handle used by the sensor framework.
    pub fn handle(self) -> i32 {
        match self {
            Self::Acceleration => 0,
            Self::MagneticField => 1,
            Self::Orientation => 2,
            Self::Temperature => 3,
            Self::Proximity => 4,
        }
    }

    /// Look up a sensor by framework handle.
    pub fn from_handle(handle: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.handle() == handle)
    }

    /// Name used in control commands.
    pub fn name(self) -> &'static str {
        match self {
            Self::Acceleration => "acceleration",
            Self::MagneticField => "magnetic-field",
            Self::Orientation => "orientation",
            Self::Temperature => "temperature",
            Self::Proximity => "proximity",
        }
    }

    /// Look up a sensor by command name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Whether the host actually serves this sensor.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Acceleration)
    }

    /// Resolve `handle` to a sensor the bridge can drive.
    pub fn supported(handle: i32) -> BridgeResult<Self> {
        match Self::from_handle(handle) {
            Some(sensor) if sensor.is_supported() => Ok(sensor),
            Some(sensor) => Err(BridgeError::UnsupportedOperation(format!(
                "sensor {} (handle {handle}) is not bridged",
                sensor.name()
            ))),
            None => Err(BridgeError::UnsupportedOperation(format!(
                "unknown sensor handle {handle}"
            ))),
        }
    }
}

/// Sensor type reported in the sensor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Accelerometer (framework type 1).
    Accelerometer,
}

/// Static description of a bridged sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorInfo {
    /// Human-readable name.
    pub name: &'static str,
    /// Vendor string.
    pub vendor: &'static str,
    /// Driver version.
    pub version: i32,
    /// Framework handle.
    pub handle: i32,
    /// Sensor type.
    pub kind: SensorKind,
    /// Maximum reported value.
    pub max_range: f32,
    /// Smallest reported step.
    pub resolution: f32,
    /// Power draw in mA.
    pub power: f32,
}

// Range and resolution are placeholders; the host forwards whatever the
// physical device reports.
static SENSOR_LIST: [SensorInfo; 1] = [SensorInfo {
    name: "sfdroid 3-axis Accelerometer",
    vendor: "sfdroid",
    version: 1,
    handle: 0,
    kind: SensorKind::Accelerometer,
    max_range: 500.0,
    resolution: 1.0 / 2000.0,
    power: 3.0,
}];

/// Sensors exposed to the framework. Only the accelerometer for now.
pub fn sensor_list() -> &'static [SensorInfo] {
    &SENSOR_LIST
}
