//! Configuration loading.
//!
//! Defaults come from [`crate::constants`]. An optional JSON file can
//! replace any of them, and a handful of environment variables override the
//! result so the host compositor can relocate its runtime directory without
//! touching files in the guest.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connector::ConnectOptions;
use crate::constants;
use crate::display::DisplayGeometry;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "SFDROID_CONFIG";

/// Bridge configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding both bridge sockets.
    pub runtime_dir: PathBuf,
    /// Backing file of the shared-memory framebuffer.
    pub shm_path: PathBuf,
    /// Sensor socket receive timeout in milliseconds. `0` disables it.
    pub sensor_timeout_ms: u64,
    /// Sleep after a failed sensor connect, in milliseconds.
    pub connect_backoff_ms: u64,
    /// Sampling period before the framework sets one, in nanoseconds.
    pub sample_delay_ns: u64,
    /// Framebuffer geometry reported at setup.
    pub display: DisplayGeometry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from(constants::SFDROID_ROOT),
            shm_path: PathBuf::from(constants::SHM_SCREEN_PATH),
            sensor_timeout_ms: constants::SENSOR_RECV_TIMEOUT.as_millis() as u64,
            connect_backoff_ms: constants::SENSOR_CONNECT_BACKOFF.as_millis() as u64,
            sample_delay_ns: constants::DEFAULT_SAMPLE_DELAY.as_nanos() as u64,
            display: DisplayGeometry::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Priority, lowest first:
    /// 1. built-in defaults
    /// 2. JSON file at `path`, or at `$SFDROID_CONFIG` when `path` is `None`
    /// 3. `SFDROID_ROOT`, `SFDROID_SHM_PATH`, `SFDROID_SENSOR_TIMEOUT_MS`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match file {
            Some(file) => Self::load_from_file(&file)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read a JSON config file. Missing keys keep their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("SFDROID_ROOT") {
            self.runtime_dir = PathBuf::from(root);
        }
        if let Some(shm) = lookup("SFDROID_SHM_PATH") {
            self.shm_path = PathBuf::from(shm);
        }
        if let Some(ms) = lookup("SFDROID_SENSOR_TIMEOUT_MS") {
            match ms.parse() {
                Ok(ms) => self.sensor_timeout_ms = ms,
                Err(e) => log::warn!("ignoring SFDROID_SENSOR_TIMEOUT_MS={ms}: {e}"),
            }
        }
    }

    /// Path of the sensor bridge socket.
    pub fn sensor_socket_path(&self) -> PathBuf {
        self.runtime_dir.join(constants::SENSORS_HANDLE_FILE)
    }

    /// Path of the buffer bridge socket.
    pub fn buffer_socket_path(&self) -> PathBuf {
        self.runtime_dir.join(constants::BUFFER_HANDLE_FILE)
    }

    /// Connect options for the sensor socket.
    pub fn sensor_connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            recv_timeout: (self.sensor_timeout_ms > 0)
                .then(|| Duration::from_millis(self.sensor_timeout_ms)),
        }
    }

    /// Connect options for the buffer socket. Reads there block.
    pub fn buffer_connect_options(&self) -> ConnectOptions {
        ConnectOptions::default()
    }

    /// Backoff after a failed sensor connect.
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Initial sampling period.
    pub fn sample_delay(&self) -> Duration {
        Duration::from_nanos(self.sample_delay_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_point_at_well_known_paths() {
        let config = Config::default();
        assert_eq!(
            config.sensor_socket_path(),
            PathBuf::from("/tmp/sfdroid/sensors_handle")
        );
        assert_eq!(
            config.buffer_socket_path(),
            PathBuf::from("/tmp/sfdroid/gralloc_buffer_handle")
        );
        assert_eq!(config.shm_path, PathBuf::from("/dev/shm/droid_screen"));
        assert_eq!(
            config.sensor_connect_options().recv_timeout,
            Some(Duration::from_secs(1))
        );
        assert_eq!(config.buffer_connect_options().recv_timeout, None);
        assert_eq!(config.connect_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sfdroid.json");
        std::fs::write(&path, r#"{ "runtime_dir": "/run/sfdroid", "sensor_timeout_ms": 0 }"#)
            .expect("write");

        let config = Config::load_from_file(&path).expect("load");
        assert_eq!(config.runtime_dir, PathBuf::from("/run/sfdroid"));
        assert_eq!(config.sensor_connect_options().recv_timeout, None);
        assert_eq!(config.shm_path, Config::default().shm_path);
        assert_eq!(config.display, DisplayGeometry::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").expect("write");
        Config::load_from_file(&path).expect_err("rejected");
    }

    #[test]
    fn environment_overrides_win() {
        let vars: HashMap<&str, &str> = [
            ("SFDROID_ROOT", "/var/run/sfdroid"),
            ("SFDROID_SHM_PATH", "/tmp/screen"),
            ("SFDROID_SENSOR_TIMEOUT_MS", "250"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| (*v).to_owned()));
        assert_eq!(
            config.sensor_socket_path(),
            PathBuf::from("/var/run/sfdroid/sensors_handle")
        );
        assert_eq!(config.shm_path, PathBuf::from("/tmp/screen"));
        assert_eq!(config.sensor_timeout_ms, 250);
    }

    #[test]
    fn unparsable_timeout_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "SFDROID_SENSOR_TIMEOUT_MS").then(|| "soon".to_owned()));
        assert_eq!(config.sensor_timeout_ms, 1000);
    }
}
