//! sfdroid-bridge developer CLI.
//!
//! Runs either end of both bridges by hand: poll the sensor host, post a
//! test buffer, or stand in for the compositor's sensor and renderer hosts.

use std::fs::File;
use std::io::Write;
use std::os::unix::io::{AsFd, FromRawFd};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sfdroid_bridge::buffer::StatusReply;
use sfdroid_bridge::host::{ReceivedBuffer, RendererHost, SensorHost};
use sfdroid_bridge::sensor::protocol::POLL_SENSOR_NAME;
use sfdroid_bridge::{
    BufferDescriptor, BufferMetadata, BufferSession, Config, SensorEvent, SensorId, SensorSession,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable redirecting log output to a file.
const LOG_FILE_ENV: &str = "SFDROID_LOG_FILE";

#[derive(Parser)]
#[command(name = "sfdroid-bridge")]
#[command(version = VERSION)]
#[command(about = "Sensor and buffer bridges between an Android guest and the sfdroid compositor")]
struct Cli {
    /// JSON config file (defaults to $SFDROID_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    Config,
    /// Enable the accelerometer and print events from the sensor host
    Poll {
        /// Number of events to request
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Sampling period in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,
    },
    /// Run a sensor host that reports a fixed acceleration
    ServeSensors {
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        x: f32,
        #[arg(long, default_value_t = 9.81, allow_hyphen_values = true)]
        y: f32,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        z: f32,
    },
    /// Run a renderer host that logs every frame it receives
    ServeRenderer {
        /// Answer every frame with FA
        #[arg(long)]
        reject: bool,
    },
    /// Post one memfd-backed test buffer to the renderer
    PostTest {
        #[arg(long, default_value_t = 64)]
        width: u32,
        #[arg(long, default_value_t = 64)]
        height: u32,
    },
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
        Commands::Poll { count, delay_ms } => poll(&config, count, delay_ms)?,
        Commands::ServeSensors { x, y, z } => serve_sensors(&config, x, y, z)?,
        Commands::ServeRenderer { reject } => serve_renderer(&config, reject)?,
        Commands::PostTest { width, height } => post_test(&config, width, height)?,
    }

    Ok(())
}

/// Log to stderr, or to `$SFDROID_LOG_FILE` when set.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        let log_file =
            File::create(&path).with_context(|| format!("create log file: {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn poll(config: &Config, count: usize, delay_ms: Option<u64>) -> Result<()> {
    let session = SensorSession::from_config(config);
    let handle = SensorId::Acceleration.handle();

    session.set_enabled(handle, true)?;
    if let Some(ms) = delay_ms {
        let ns = i64::try_from(ms.saturating_mul(1_000_000)).unwrap_or(i64::MAX);
        session.set_sample_delay(handle, ns)?;
    }

    let events = session.poll(count);
    if events.is_empty() {
        log::warn!("no events from {}", session.endpoint().display());
    }
    let mut stdout = std::io::stdout().lock();
    for event in &events {
        writeln!(stdout, "{event}")?;
    }

    session.set_enabled(handle, false)?;
    Ok(())
}

fn serve_sensors(config: &Config, x: f32, y: f32, z: f32) -> Result<()> {
    let host = SensorHost::bind(config.sensor_socket_path())?;
    let start = Instant::now();
    let mut source = move |sensor: &str| -> Option<SensorEvent> {
        (sensor == POLL_SENSOR_NAME).then(|| SensorEvent::Acceleration {
            x,
            y,
            z,
            timestamp: i64::try_from(start.elapsed().as_nanos()).unwrap_or(i64::MAX),
        })
    };
    host.run(&mut source)
}

fn serve_renderer(config: &Config, reject: bool) -> Result<()> {
    let host = RendererHost::bind(config.buffer_socket_path())?;
    let mut sink = move |buffer: ReceivedBuffer| {
        let meta = buffer.metadata;
        log::info!(
            "frame {}x{} stride {} format {}: {} fd(s), {} int(s)",
            meta.width,
            meta.height,
            meta.stride,
            meta.pixel_format,
            buffer.fds.len(),
            buffer.ints.len()
        );
        if reject {
            StatusReply::Failed
        } else {
            StatusReply::Ok
        }
    };
    host.run(&mut sink)
}

fn post_test(config: &Config, width: u32, height: u32) -> Result<()> {
    let format = config.display.format;
    let len = width as usize * height as usize * format.bytes_per_pixel() as usize;
    let mut buffer = memfd("sfdroid-post-test")?;
    buffer.set_len(len as u64).context("size test buffer")?;
    let pattern: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    buffer.write_all(&pattern).context("fill test buffer")?;

    let descriptor = BufferDescriptor::new(vec![buffer.as_fd()], vec![len as i32, 0])?;
    let metadata = BufferMetadata {
        width,
        height,
        stride: width,
        pixel_format: format.code(),
    };

    let session = BufferSession::from_config(config);
    let status = session.post(&descriptor, metadata)?;
    println!("{status:?}");
    Ok(())
}

/// Anonymous shared-memory file standing in for a graphics buffer.
fn memfd(name: &str) -> Result<File> {
    let name = std::ffi::CString::new(name).context("memfd name")?;
    // SAFETY: `name` is a valid NUL-terminated string for the call.
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error()).context("memfd_create");
    }
    // SAFETY: the descriptor was just created and nothing else owns it.
    Ok(unsafe { File::from_raw_fd(fd) })
}
