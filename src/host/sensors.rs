//! Sensor host: the compositor end of the sensor socket.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::BridgeError;
use crate::sensor::protocol::{read_frame, write_frame, Command, POLL_SENSOR_NAME};
use crate::sensor::SensorEvent;

/// Reply to a command the host does not understand.
pub const UNSUPPORTED_REPLY: &str = "unsupported";

/// Reply to a `get` for which no sample is available.
pub const NOT_READY_REPLY: &str = "notready";

/// Where the host's samples come from.
pub trait SampleSource {
    /// Current sample for the sensor named in a `get` request.
    fn sample(&mut self, sensor: &str) -> Option<SensorEvent>;
}

impl<F> SampleSource for F
where
    F: FnMut(&str) -> Option<SensorEvent>,
{
    fn sample(&mut self, sensor: &str) -> Option<SensorEvent> {
        self(sensor)
    }
}

/// Answers every accelerometer request with the same reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedSample(pub SensorEvent);

impl SampleSource for FixedSample {
    fn sample(&mut self, sensor: &str) -> Option<SensorEvent> {
        (sensor == POLL_SENSOR_NAME).then_some(self.0)
    }
}

/// Listening sensor host. Serves one guest connection at a time.
#[derive(Debug)]
pub struct SensorHost {
    listener: UnixListener,
    path: PathBuf,
}

impl SensorHost {
    /// Bind the sensor socket at `path`.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let listener = super::bind(&path)?;
        log::info!("[sensors] host listening on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one guest and serve it until it disconnects.
    ///
    /// Returns the `set`/`setDelay` commands the guest sent, in order.
    pub fn serve_one(&self, source: &mut dyn SampleSource) -> Result<Vec<Command>> {
        let (stream, _) = self.listener.accept().context("accept sensor client")?;
        log::info!("[sensors] guest connected");
        let commands = serve_connection(&stream, source);
        log::info!("[sensors] guest disconnected");
        Ok(commands)
    }

    /// Serve guests one after another, forever.
    pub fn run(&self, source: &mut dyn SampleSource) -> Result<()> {
        loop {
            self.serve_one(source)?;
        }
    }
}

impl Drop for SensorHost {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn serve_connection(stream: &UnixStream, source: &mut dyn SampleSource) -> Vec<Command> {
    let mut recorded = Vec::new();
    loop {
        let text = match read_frame(&mut &*stream) {
            Ok(text) => text,
            Err(BridgeError::TransportFailure(_)) => break,
            Err(e) => {
                log::warn!("[sensors] dropping guest: {e}");
                break;
            }
        };

        let reply = match Command::parse(&text) {
            Ok(Command::Get { sensor }) => Some(
                source
                    .sample(&sensor)
                    .map_or_else(|| NOT_READY_REPLY.to_owned(), |event| event.to_string()),
            ),
            Ok(command) => {
                log::info!("[sensors] {command}");
                recorded.push(command);
                None
            }
            Err(e) => {
                log::warn!("[sensors] {e}");
                Some(UNSUPPORTED_REPLY.to_owned())
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = write_frame(stream, &reply) {
                log::warn!("[sensors] reply failed: {e}");
                break;
            }
        }
    }
    recorded
}
