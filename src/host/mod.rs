//! Host-side peers of both bridges.
//!
//! These are the receiving ends the compositor runs: a sensor host that
//! answers sample requests and a renderer host that accepts buffer
//! handles. The developer CLI serves them directly and the end-to-end tests
//! drive the guest sessions against them.

pub mod renderer;
pub mod sensors;

use std::os::unix::net::UnixListener;
use std::path::Path;

use anyhow::{Context, Result};

pub use renderer::{FrameSink, ReceivedBuffer, RendererConnection, RendererHost};
pub use sensors::{FixedSample, SampleSource, SensorHost};

/// Bind a listening socket at `path`.
///
/// Creates the parent directory, replaces a stale socket file from a
/// previous run and opens the socket to every local user, since guest
/// services run under their own uids.
pub(crate) fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create socket dir: {}", parent.display()))?;
    }

    // Remove stale socket file from a previous run.
    let _ = std::fs::remove_file(path);

    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind socket: {}", path.display()))?;

    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
            .with_context(|| format!("chmod socket: {}", path.display()))?;
    }

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn bind_creates_parent_and_replaces_stale_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sensors_handle");

        let first = bind(&path).expect("first bind");
        drop(first);
        // The socket file outlives the listener; binding again must succeed.
        assert!(path.exists());
        let _second = bind(&path).expect("rebind over stale socket");

        let mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(mode & 0o777, 0o666);
    }
}
