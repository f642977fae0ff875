//! Sensor bridge wire protocol.
//!
//! Every message in either direction is framed the same way:
//!
//! ```text
//! [u8 sync = len(text) + 1] [text bytes…] [0x00]
//! ```
//!
//! The receiver reads the sync byte, then issues one read of exactly
//! `sync` bytes. There is no reassembly: a short read means the stream is
//! out of step and the connection must be dropped.
//!
//! Requests (guest → host):
//! - `get:<sensor>`: ask for one sample
//! - `set:<sensor>:<0|1>`: enable or disable a sensor
//! - `setDelay:<sensor>:<nanoseconds>`: change the sampling period
//!
//! Responses (host → guest):
//! - `acceleration:<x>:<y>:<z>:<timestamp_ns>`
//! - anything else means "no sample available", e.g. the host is not ready

use std::fmt;
use std::io::Read;
use std::os::unix::net::UnixStream;

use crate::connector::send_all;
use crate::constants::MAX_FRAME_LEN;
use crate::error::{BridgeError, BridgeResult};

use super::SensorId;

/// Sensor name used by the poll request.
///
/// The host keys samples by this name, while enable/delay commands use the
/// sensor table name (`acceleration`).
pub const POLL_SENSOR_NAME: &str = "accelerometer";

/// A request sent to the sensor host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request one sample.
    Get {
        /// Sensor name.
        sensor: String,
    },
    /// Enable or disable a sensor.
    Set {
        /// Sensor name.
        sensor: String,
        /// New activation state.
        enabled: bool,
    },
    /// Change the sampling period.
    SetDelay {
        /// Sensor name.
        sensor: String,
        /// Period in nanoseconds.
        delay_ns: i64,
    },
}

impl Command {
    /// The per-slot poll request, `get:accelerometer`.
    pub fn poll() -> Self {
        Self::Get {
            sensor: POLL_SENSOR_NAME.to_owned(),
        }
    }

    /// Enable/disable request for `sensor`.
    pub fn set(sensor: SensorId, enabled: bool) -> Self {
        Self::Set {
            sensor: sensor.name().to_owned(),
            enabled,
        }
    }

    /// Sampling period request for `sensor`.
    pub fn set_delay(sensor: SensorId, delay_ns: i64) -> Self {
        Self::SetDelay {
            sensor: sensor.name().to_owned(),
            delay_ns,
        }
    }

    /// Parse request text as received by the host.
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let unsupported = || BridgeError::UnsupportedOperation(format!("unknown command: {text}"));
        let mut parts = text.split(':');
        let verb = parts.next().ok_or_else(unsupported)?;
        let sensor = parts.next().filter(|s| !s.is_empty()).ok_or_else(unsupported)?.to_owned();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(unsupported());
        }

        match (verb, arg) {
            ("get", None) => Ok(Self::Get { sensor }),
            ("set", Some("0")) => Ok(Self::Set { sensor, enabled: false }),
            ("set", Some("1")) => Ok(Self::Set { sensor, enabled: true }),
            ("setDelay", Some(ns)) => {
                let delay_ns = ns.parse::<i64>().map_err(|e| {
                    BridgeError::UnsupportedOperation(format!("bad delay in {text}: {e}"))
                })?;
                Ok(Self::SetDelay { sensor, delay_ns })
            }
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { sensor } => write!(f, "get:{sensor}"),
            Self::Set { sensor, enabled } => write!(f, "set:{sensor}:{}", u8::from(*enabled)),
            Self::SetDelay { sensor, delay_ns } => write!(f, "setDelay:{sensor}:{delay_ns}"),
        }
    }
}

/// A decoded sensor sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Three-axis acceleration in m/s².
    Acceleration {
        /// X axis.
        x: f32,
        /// Y axis.
        y: f32,
        /// Z axis.
        z: f32,
        /// Sample time in nanoseconds.
        timestamp: i64,
    },
}

impl SensorEvent {
    /// Sensor that produced this event.
    pub fn sensor(&self) -> SensorId {
        match self {
            Self::Acceleration { .. } => SensorId::Acceleration,
        }
    }

    /// Parse a response line. Returns `None` for anything that is not a
    /// well-formed event.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix("acceleration:")?;
        let mut fields = rest.split(':');
        let x = fields.next()?.parse().ok()?;
        let y = fields.next()?.parse().ok()?;
        let z = fields.next()?.parse().ok()?;
        let timestamp = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Self::Acceleration { x, y, z, timestamp })
    }
}

impl fmt::Display for SensorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acceleration { x, y, z, timestamp } => {
                write!(f, "acceleration:{x}:{y}:{z}:{timestamp}")
            }
        }
    }
}

// ─── Framing ────────────────────────────────────────────────────────────────

/// Frame `text` as `[sync][text][0]`.
///
/// Fails with [`BridgeError::ProtocolViolation`] when the framed length does
/// not fit in the sync byte, or when `text` contains a NUL.
pub fn encode_frame(text: &str) -> BridgeResult<Vec<u8>> {
    if text.as_bytes().contains(&0) {
        return Err(BridgeError::ProtocolViolation(
            "frame text contains a NUL byte".to_owned(),
        ));
    }
    let len = text.len() + 1;
    let sync = u8::try_from(len).map_err(|e| {
        BridgeError::ProtocolViolation(format!("frame of {len} bytes does not fit a sync byte: {e}"))
    })?;

    let mut buf = Vec::with_capacity(1 + len);
    buf.push(sync);
    buf.extend_from_slice(text.as_bytes());
    buf.push(0);
    Ok(buf)
}

/// Validate a received sync byte and return the payload length it announces.
pub fn frame_len(sync: u8) -> BridgeResult<usize> {
    let len = usize::from(sync);
    if len == 0 {
        return Err(BridgeError::ProtocolViolation("zero-length sensor frame".to_owned()));
    }
    if len > MAX_FRAME_LEN {
        return Err(BridgeError::ProtocolViolation(format!(
            "sensor frame too large: {len} bytes"
        )));
    }
    Ok(len)
}

/// Interpret a frame payload as text: drop the terminator and anything after
/// the first NUL.
pub fn decode_payload(payload: &[u8]) -> BridgeResult<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    std::str::from_utf8(&payload[..end])
        .map(str::to_owned)
        .map_err(|e| BridgeError::ProtocolViolation(format!("sensor frame is not UTF-8: {e}")))
}

/// Send one framed message.
pub fn write_frame(stream: &UnixStream, text: &str) -> BridgeResult<()> {
    let frame = encode_frame(text)?;
    send_all(stream, &frame).map_err(|e| BridgeError::from_io("send sensor frame", &e))
}

/// Receive one framed message and return its text.
///
/// A closed stream, a read error or a payload read that comes back short all
/// fail; the caller must drop the connection.
pub fn read_frame<R: Read>(reader: &mut R) -> BridgeResult<String> {
    let mut sync = [0u8; 1];
    let n = reader
        .read(&mut sync)
        .map_err(|e| BridgeError::from_io("recv sync byte", &e))?;
    if n == 0 {
        return Err(BridgeError::TransportFailure(
            "peer closed connection".to_owned(),
        ));
    }

    let len = frame_len(sync[0])?;
    let mut buf = [0u8; MAX_FRAME_LEN];
    let n = reader
        .read(&mut buf[..len])
        .map_err(|e| BridgeError::from_io("recv sensor frame", &e))?;
    if n < len {
        return Err(BridgeError::ProtocolViolation(format!(
            "short sensor frame: got {n} of {len} bytes"
        )));
    }

    decode_payload(&buf[..len])
}
