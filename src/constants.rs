//! Well-known paths, timeouts and protocol limits for the sfdroid bridges.
//!
//! Everything the host compositor and the guest modules must agree on lives
//! here so both sides of each socket read the same values.
//!
//! # Categories
//!
//! - **Endpoints**: socket and shared-memory paths
//! - **Timeouts**: receive bounds and reconnect backoff
//! - **Protocol limits**: frame and handle size caps

use std::time::Duration;

// ============================================================================
// Endpoints
// ============================================================================

/// Shared runtime directory holding both bridge sockets.
pub const SFDROID_ROOT: &str = "/tmp/sfdroid";

/// File name of the sensor bridge socket under [`SFDROID_ROOT`].
pub const SENSORS_HANDLE_FILE: &str = "sensors_handle";

/// File name of the buffer bridge socket under [`SFDROID_ROOT`].
pub const BUFFER_HANDLE_FILE: &str = "gralloc_buffer_handle";

/// Backing file of the shared-memory framebuffer.
pub const SHM_SCREEN_PATH: &str = "/dev/shm/droid_screen";

// ============================================================================
// Timeouts
// ============================================================================

/// Receive timeout applied to sensor bridge connections.
///
/// A host that stops answering is noticed after this long, so one poll
/// cycle never blocks longer than this per requested event.
pub const SENSOR_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep after a failed sensor connect before the caller may try again.
pub const SENSOR_CONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// Sample delay in effect until the framework calls `set_sample_delay`.
pub const DEFAULT_SAMPLE_DELAY: Duration = Duration::ZERO;

// ============================================================================
// Protocol limits
// ============================================================================

/// Largest sensor frame payload (terminator included) a receiver accepts.
pub const MAX_FRAME_LEN: usize = 256;

/// Maximum number of file descriptors in one buffer handle.
pub const MAX_HANDLE_FDS: usize = 1024;

/// Maximum number of integer words in one buffer handle.
pub const MAX_HANDLE_INTS: usize = 1024;

/// Version tag written at the start of every buffer message.
pub const BUFFER_WIRE_VERSION: u32 = 1;
