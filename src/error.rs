//! Error taxonomy shared by both bridges.
//!
//! None of these errors is fatal to the process. Sessions translate them
//! into "no sensor data this cycle" or "frame dropped"; callers only need
//! [`BridgeError::is_transient`] to decide whether to log loudly.

use std::io;
use std::path::{Path, PathBuf};

/// Errors surfaced by the bridge transport layer.
#[derive(Debug)]
pub enum BridgeError {
    /// Peer socket is absent or not listening.
    EndpointUnavailable {
        /// Socket path that was dialed.
        path: PathBuf,
        /// OS-level reason.
        reason: String,
    },
    /// Send or receive failed on an established connection.
    TransportFailure(String),
    /// Malformed or unrecognized payload.
    ProtocolViolation(String),
    /// Receive exceeded the configured bound.
    Timeout,
    /// Unknown sensor id, device name or out-of-range request.
    UnsupportedOperation(String),
}

impl BridgeError {
    /// Build an [`BridgeError::EndpointUnavailable`] from a failed connect.
    pub fn endpoint(path: &Path, err: &io::Error) -> Self {
        Self::EndpointUnavailable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Classify an I/O error raised on an established connection.
    ///
    /// `SO_RCVTIMEO` expiry shows up as `WouldBlock` on Linux and `TimedOut`
    /// elsewhere; both map to [`BridgeError::Timeout`].
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::TransportFailure(format!("{context}: {err}")),
        }
    }

    /// Returns `true` for conditions the caller should simply retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::EndpointUnavailable { .. } | Self::Timeout)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndpointUnavailable { path, reason } => {
                write!(f, "Endpoint unavailable: {}: {reason}", path.display())
            }
            Self::TransportFailure(msg) => write!(f, "Transport failure: {msg}"),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {msg}"),
            Self::Timeout => write!(f, "Receive timed out"),
            Self::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Result alias used throughout the library.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_timeouts_classify_as_timeout() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(matches!(BridgeError::from_io("recv", &err), BridgeError::Timeout));
        let err = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(BridgeError::from_io("recv", &err), BridgeError::Timeout));
    }

    #[test]
    fn broken_pipe_is_transport_failure() {
        let err = io::Error::from(io::ErrorKind::BrokenPipe);
        let classified = BridgeError::from_io("send", &err);
        assert!(matches!(classified, BridgeError::TransportFailure(_)));
        assert!(!classified.is_transient());
        assert!(classified.to_string().starts_with("Transport failure: send"));
    }

    #[test]
    fn endpoint_unavailable_is_transient() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        let e = BridgeError::endpoint(Path::new("/tmp/sfdroid/sensors_handle"), &err);
        assert!(e.is_transient());
        assert!(e.to_string().contains("/tmp/sfdroid/sensors_handle"));
    }
}
