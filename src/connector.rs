//! Endpoint connector for the sfdroid local sockets.
//!
//! Dials a Unix domain stream socket, applies the receive timeout and hands
//! back the live stream. It never retries and never sleeps; backoff belongs
//! to the session that owns the connection.
//!
//! Writes go through [`send_all`], which passes `MSG_NOSIGNAL` on every call:
//! a host that vanishes mid-write surfaces as `EPIPE`, never as `SIGPIPE`.

use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, BridgeResult};

/// Per-endpoint connection settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// `SO_RCVTIMEO` for the stream. `None` keeps reads fully blocking.
    pub recv_timeout: Option<Duration>,
}

impl ConnectOptions {
    /// Options with a bounded receive timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            recv_timeout: Some(timeout),
        }
    }
}

/// Connect to the Unix stream socket at `path`.
///
/// Any failure to reach the peer (missing path, nobody listening, permission
/// denied, path longer than `sun_path`) is reported as
/// [`BridgeError::EndpointUnavailable`]. A timeout that cannot be applied is
/// logged and the connection is still returned.
pub fn connect(path: &Path, options: ConnectOptions) -> BridgeResult<UnixStream> {
    let stream = UnixStream::connect(path).map_err(|e| BridgeError::endpoint(path, &e))?;

    // A zero duration is rejected by set_read_timeout; treat it as "blocking".
    let timeout = options.recv_timeout.filter(|t| !t.is_zero());
    if let Err(e) = stream.set_read_timeout(timeout) {
        log::error!("failed to set receive timeout on {}: {e}", path.display());
    }

    log::debug!("connected to {}", path.display());
    Ok(stream)
}

/// Write all of `data` to `stream` without raising `SIGPIPE`.
pub fn send_all(stream: &UnixStream, mut data: &[u8]) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    while !data.is_empty() {
        // SAFETY: `data` is a live slice for the duration of the call and
        // `fd` belongs to `stream`, which outlives it.
        let n = unsafe {
            libc::send(
                fd,
                data.as_ptr().cast::<libc::c_void>(),
                data.len(),
                libc::MSG_NOSIGNAL,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::WriteZero));
        }
        data = &data[n as usize..];
    }
    Ok(())
}
