//! Guest-side sensor session.
//!
//! Owns at most one connection to the sensor host and drives the
//! request/response protocol over it. The connection is opened lazily by
//! whichever operation needs it first and thrown away on the first I/O
//! error; the next call dials again from scratch.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect ok──► Connected
//!      ▲                          │
//!      └──── send/recv error ─────┘
//! ```
//!
//! The framework may call into the same device from several threads, so all
//! state sits behind one mutex and each request/response pair runs with the
//! lock held.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::connector::{self, ConnectOptions};
use crate::constants::{DEFAULT_SAMPLE_DELAY, SENSOR_CONNECT_BACKOFF, SENSOR_RECV_TIMEOUT};
use crate::error::BridgeResult;

use super::protocol::{read_frame, write_frame, Command, SensorEvent};
use super::SensorId;

struct SensorState {
    connection: Option<UnixStream>,
    delay: Duration,
}

/// Connection to the sfdroid sensor host.
pub struct SensorSession {
    endpoint: PathBuf,
    options: ConnectOptions,
    backoff: Duration,
    state: Mutex<SensorState>,
}

impl std::fmt::Debug for SensorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSession")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl SensorSession {
    /// Session for the socket at `endpoint` with the default 1 s receive
    /// timeout and 100 ms connect backoff.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: ConnectOptions::with_timeout(SENSOR_RECV_TIMEOUT),
            backoff: SENSOR_CONNECT_BACKOFF,
            state: Mutex::new(SensorState {
                connection: None,
                delay: DEFAULT_SAMPLE_DELAY,
            }),
        }
    }

    /// Session configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sensor_socket_path())
            .with_connect_options(config.sensor_connect_options())
            .with_backoff(config.connect_backoff())
            .with_sample_delay(config.sample_delay())
    }

    /// Override the connect options.
    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the sleep applied after a failed connect.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the initial sampling period.
    pub fn with_sample_delay(self, delay: Duration) -> Self {
        self.state().delay = delay;
        self
    }

    /// Socket path this session dials.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.state().connection.is_some()
    }

    /// Sampling period used to pace [`SensorSession::poll`].
    pub fn sample_delay(&self) -> Duration {
        self.state().delay
    }

    /// Drop the current connection, if any.
    pub fn close(&self) {
        if self.state().connection.take().is_some() {
            log::debug!("[sensors] connection closed");
        }
    }

    /// Collect up to `max_events` samples.
    ///
    /// Each slot sleeps for the sampling period, sends `get:accelerometer`
    /// and parses one response. Polling stops early, returning what it has,
    /// when the host answers with something that is not an event or when the
    /// connection fails. An absent host yields an empty batch. Never errors.
    pub fn poll(&self, max_events: usize) -> Vec<SensorEvent> {
        let mut events = Vec::new();
        if max_events == 0 {
            return events;
        }

        let mut state = self.state();
        if !self.ensure_connected(&mut state) {
            // sfdroid not up
            return events;
        }

        let request = Command::poll().to_string();
        while events.len() < max_events {
            if !state.delay.is_zero() {
                thread::sleep(state.delay);
            }
            let Some(stream) = state.connection.as_ref() else {
                break;
            };

            let response = write_frame(stream, &request).and_then(|()| read_frame(&mut &*stream));
            match response {
                Ok(text) => match SensorEvent::parse(&text) {
                    Some(event) => events.push(event),
                    None => {
                        log::warn!("[sensors] unsupported response: {text}");
                        break;
                    }
                },
                Err(e) => {
                    log::error!("[sensors] poll failed after {} event(s): {e}", events.len());
                    state.connection = None;
                    break;
                }
            }
        }

        events
    }

    /// Enable or disable a sensor on the host.
    ///
    /// Unsupported handles are rejected without touching the connection.
    /// When the host is not reachable the request is dropped and `Ok(())` is
    /// returned; it is not replayed on a later connect.
    pub fn set_enabled(&self, handle: i32, enabled: bool) -> BridgeResult<()> {
        let sensor = SensorId::supported(handle)?;
        let mut state = self.state();
        if !self.ensure_connected(&mut state) {
            // sfdroid not up yet
            return Ok(());
        }
        Self::send(&mut state, &Command::set(sensor, enabled))
    }

    /// Change the sampling period.
    ///
    /// The local period used by [`SensorSession::poll`] is updated whether
    /// or not the host can be told about it. Negative periods pace as zero.
    pub fn set_sample_delay(&self, handle: i32, delay_ns: i64) -> BridgeResult<()> {
        let sensor = SensorId::supported(handle)?;
        let mut state = self.state();
        state.delay = Duration::from_nanos(u64::try_from(delay_ns).unwrap_or(0));
        if !self.ensure_connected(&mut state) {
            return Ok(());
        }
        Self::send(&mut state, &Command::set_delay(sensor, delay_ns))
    }

    // ── Internal ─────────────────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a connection if none is held. Sleeps the backoff on failure.
    fn ensure_connected(&self, state: &mut SensorState) -> bool {
        if state.connection.is_some() {
            return true;
        }
        match connector::connect(&self.endpoint, self.options) {
            Ok(stream) => {
                log::info!("[sensors] connected to {}", self.endpoint.display());
                state.connection = Some(stream);
                true
            }
            Err(e) => {
                log::debug!("[sensors] {e}");
                thread::sleep(self.backoff);
                false
            }
        }
    }

    /// Send a fire-and-forget command, dropping the connection on failure.
    fn send(state: &mut SensorState, command: &Command) -> BridgeResult<()> {
        let Some(stream) = state.connection.as_ref() else {
            return Ok(());
        };
        write_frame(stream, &command.to_string()).map_err(|e| {
            log::error!("[sensors] sending {command} failed: {e}");
            state.connection = None;
            e
        })
    }
}
