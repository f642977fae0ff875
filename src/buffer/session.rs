//! Guest-side buffer transfer session.
//!
//! Posts one frame per call to the host renderer: a single `sendmsg()` with
//! the frame's metadata and handle, followed by a blocking wait for the
//! renderer's 3-byte status.
//!
//! # Failure policy
//!
//! ```text
//! renderer absent       → Ok(NoRenderer)   frame dropped, nothing to close
//! renderer says "FA"    → Ok(Rejected)     connection kept for the next frame
//! I/O error, bad reply  → Err(..)          connection closed, redial next post
//! ```
//!
//! Rendering never waits on an absent consumer, and nothing is retried
//! within one call; the display pipeline's next post is the retry.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::connector::{self, ConnectOptions};
use crate::error::{BridgeError, BridgeResult};

use super::protocol::{encode_message, BufferDescriptor, BufferMetadata, StatusReply};
use super::scm::send_with_fds;

/// Outcome of a post that did not hit a transport or protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    /// Renderer accepted the frame.
    Displayed,
    /// Renderer answered `FA`.
    Rejected,
    /// No renderer is listening; the frame was dropped.
    NoRenderer,
}

impl PostStatus {
    /// Whether the post counts as success for the display pipeline.
    ///
    /// A missing renderer is success: the guest keeps rendering until the
    /// host shows up.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Displayed | Self::NoRenderer)
    }
}

/// Connection to the sfdroid buffer renderer.
pub struct BufferSession {
    endpoint: PathBuf,
    options: ConnectOptions,
    connection: Mutex<Option<UnixStream>>,
}

impl std::fmt::Debug for BufferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSession")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl BufferSession {
    /// Session for the renderer socket at `endpoint`. Reads block.
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            options: ConnectOptions::default(),
            connection: Mutex::new(None),
        }
    }

    /// Session configured from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.buffer_socket_path()).with_connect_options(config.buffer_connect_options())
    }

    /// Override the connect options, e.g. to bound the status wait.
    pub fn with_connect_options(mut self, options: ConnectOptions) -> Self {
        self.options = options;
        self
    }

    /// Socket path this session dials.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Drop the current connection, if any.
    pub fn close(&self) {
        self.connection().take();
    }

    /// Send one frame to the renderer and wait for its verdict.
    ///
    /// The descriptor's file descriptors are duplicated into the renderer;
    /// the caller's copies are never closed.
    pub fn post(
        &self,
        descriptor: &BufferDescriptor<'_>,
        metadata: BufferMetadata,
    ) -> BridgeResult<PostStatus> {
        let mut connection = self.connection();

        if connection.is_none() {
            log::info!("[buffer] connecting to renderer at {}", self.endpoint.display());
            match connector::connect(&self.endpoint, self.options) {
                Ok(stream) => *connection = Some(stream),
                Err(e) => {
                    log::debug!("[buffer] {e}");
                    return Ok(PostStatus::NoRenderer);
                }
            }
        }
        let Some(stream) = connection.as_ref() else {
            return Ok(PostStatus::NoRenderer);
        };

        match transfer(stream, descriptor, &metadata) {
            Ok(StatusReply::Ok) => Ok(PostStatus::Displayed),
            Ok(StatusReply::Failed) => {
                log::warn!(
                    "[buffer] renderer rejected {}x{} frame",
                    metadata.width,
                    metadata.height
                );
                Ok(PostStatus::Rejected)
            }
            Err(e) => {
                log::warn!("[buffer] post failed, dropping connection: {e}");
                *connection = None;
                Err(e)
            }
        }
    }

    fn connection(&self) -> MutexGuard<'_, Option<UnixStream>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One request/response exchange on an established connection.
fn transfer(
    stream: &UnixStream,
    descriptor: &BufferDescriptor<'_>,
    metadata: &BufferMetadata,
) -> BridgeResult<StatusReply> {
    let message = encode_message(metadata, descriptor);
    let sent = send_with_fds(stream, &message, descriptor.fds())
        .map_err(|e| BridgeError::from_io("send buffer", &e))?;
    if sent != message.len() {
        return Err(BridgeError::TransportFailure(format!(
            "short buffer send: {sent} of {} bytes",
            message.len()
        )));
    }

    let mut reply = [0u8; StatusReply::WIRE_LEN];
    let mut reader = stream;
    reader
        .read_exact(&mut reply)
        .map_err(|e| BridgeError::from_io("recv status", &e))?;
    StatusReply::decode(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::protocol::{decode_message, MAX_MESSAGE_LEN};
    use crate::buffer::scm::recv_with_fds;
    use crate::connector::send_all;
    use std::io::Write;
    use std::os::unix::io::AsFd;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn metadata() -> BufferMetadata {
        BufferMetadata {
            width: 4,
            height: 2,
            stride: 4,
            pixel_format: 2,
        }
    }

    /// Accept one client and answer each received frame with the next reply.
    fn spawn_renderer(
        listener: UnixListener,
        replies: Vec<&'static [u8]>,
    ) -> thread::JoinHandle<Vec<(usize, Vec<i32>)>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut seen = Vec::new();
            for reply in replies {
                let (data, fds) = recv_with_fds(&stream, MAX_MESSAGE_LEN, 8).expect("recv");
                if data.is_empty() {
                    break;
                }
                let msg = decode_message(&data).expect("decode");
                assert_eq!(msg.num_fds, fds.len());
                seen.push((fds.len(), msg.ints));
                send_all(&stream, reply).expect("reply");
            }
            seen
        })
    }

    #[test]
    fn absent_renderer_is_a_successful_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = BufferSession::new(dir.path().join("gralloc_buffer_handle"));
        let desc = BufferDescriptor::new(vec![], vec![]).expect("desc");
        let status = session.post(&desc, metadata()).expect("post");
        assert_eq!(status, PostStatus::NoRenderer);
        assert!(status.is_success());
        assert!(!session.is_connected());
    }

    #[test]
    fn ok_reply_is_displayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gralloc_buffer_handle");
        let renderer = spawn_renderer(UnixListener::bind(&path).expect("bind"), vec![b"OK\0"]);

        let file = tempfile::tempfile().expect("tempfile");
        let session = BufferSession::new(&path);
        let desc = BufferDescriptor::new(vec![file.as_fd()], vec![10, 20]).expect("desc");
        assert_eq!(session.post(&desc, metadata()).expect("post"), PostStatus::Displayed);
        assert!(session.is_connected());

        session.close();
        assert_eq!(renderer.join().expect("renderer"), vec![(1, vec![10, 20])]);

        // The caller's descriptor is untouched.
        (&file).write_all(b"still open").expect("write after post");
    }

    #[test]
    fn fa_reply_fails_but_keeps_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gralloc_buffer_handle");
        let renderer = spawn_renderer(
            UnixListener::bind(&path).expect("bind"),
            vec![b"FA\0", b"OK\0"],
        );

        let session = BufferSession::new(&path);
        let desc = BufferDescriptor::new(vec![], vec![1]).expect("desc");

        let first = session.post(&desc, metadata()).expect("first post");
        assert_eq!(first, PostStatus::Rejected);
        assert!(!first.is_success());
        assert!(session.is_connected());

        assert_eq!(session.post(&desc, metadata()).expect("second"), PostStatus::Displayed);
        session.close();
        assert_eq!(renderer.join().expect("renderer").len(), 2);
    }

    #[test]
    fn garbage_reply_closes_connection() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gralloc_buffer_handle");
        let renderer = spawn_renderer(UnixListener::bind(&path).expect("bind"), vec![b"WHY"]);

        let session = BufferSession::new(&path);
        let desc = BufferDescriptor::new(vec![], vec![]).expect("desc");
        let err = session.post(&desc, metadata()).expect_err("bad status");
        assert!(matches!(err, BridgeError::ProtocolViolation(_)));
        assert!(!session.is_connected());
        renderer.join().expect("renderer");
    }

    #[test]
    fn renderer_hangup_is_transport_failure_then_redial() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gralloc_buffer_handle");
        let listener = UnixListener::bind(&path).expect("bind");
        let hangup = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let _ = recv_with_fds(&stream, MAX_MESSAGE_LEN, 8);
            drop(stream);
            listener
        });

        let session = BufferSession::new(&path);
        let desc = BufferDescriptor::new(vec![], vec![]).expect("desc");
        let err = session.post(&desc, metadata()).expect_err("hangup");
        assert!(matches!(err, BridgeError::TransportFailure(_)));
        assert!(!session.is_connected());

        let listener = hangup.join().expect("hangup thread");
        let renderer = spawn_renderer(listener, vec![b"OK\0"]);
        assert_eq!(session.post(&desc, metadata()).expect("redial"), PostStatus::Displayed);
        session.close();
        renderer.join().expect("renderer");
    }
}
