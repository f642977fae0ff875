//! Renderer host: the compositor end of the buffer socket.
//!
//! Each guest message arrives in one `recvmsg()`. The guest never sends a
//! second frame before it has read the status of the first, so a message is
//! never split across, or merged with, its neighbours.

use std::os::unix::io::OwnedFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::buffer::protocol::{decode_message, BufferMetadata, StatusReply, MAX_MESSAGE_LEN};
use crate::buffer::scm::recv_with_fds;
use crate::connector::send_all;
use crate::constants::MAX_HANDLE_FDS;
use crate::error::{BridgeError, BridgeResult};

/// A buffer handle as seen by the renderer.
///
/// The descriptors are the renderer's own duplicates and close on drop.
#[derive(Debug)]
pub struct ReceivedBuffer {
    /// Frame geometry.
    pub metadata: BufferMetadata,
    /// Handle descriptors, in the order the guest attached them.
    pub fds: Vec<OwnedFd>,
    /// Handle integer words.
    pub ints: Vec<i32>,
}

/// Consumer of received frames. Its answer is sent back to the guest.
pub trait FrameSink {
    /// Display (or refuse) one frame.
    fn frame(&mut self, buffer: ReceivedBuffer) -> StatusReply;
}

impl<F> FrameSink for F
where
    F: FnMut(ReceivedBuffer) -> StatusReply,
{
    fn frame(&mut self, buffer: ReceivedBuffer) -> StatusReply {
        self(buffer)
    }
}

/// Listening renderer host.
#[derive(Debug)]
pub struct RendererHost {
    listener: UnixListener,
    path: PathBuf,
}

impl RendererHost {
    /// Bind the buffer socket at `path`.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let listener = super::bind(&path)?;
        log::info!("[renderer-host] listening on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next guest connection.
    pub fn accept(&self) -> Result<RendererConnection> {
        let (stream, _) = self.listener.accept().context("accept renderer client")?;
        log::info!("[renderer-host] guest connected");
        Ok(RendererConnection { stream })
    }

    /// Serve guests one after another, forever.
    pub fn run(&self, sink: &mut dyn FrameSink) -> Result<()> {
        loop {
            let connection = self.accept()?;
            match connection.serve(sink) {
                Ok(frames) => log::info!("[renderer-host] guest left after {frames} frame(s)"),
                Err(e) => log::warn!("[renderer-host] guest dropped: {e}"),
            }
        }
    }
}

impl Drop for RendererHost {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One accepted guest connection.
#[derive(Debug)]
pub struct RendererConnection {
    stream: UnixStream,
}

impl RendererConnection {
    /// Receive the next buffer. `Ok(None)` means the guest hung up.
    pub fn recv_buffer(&self) -> BridgeResult<Option<ReceivedBuffer>> {
        let (data, fds) = recv_with_fds(&self.stream, MAX_MESSAGE_LEN, MAX_HANDLE_FDS)
            .map_err(|e| BridgeError::from_io("recv buffer", &e))?;
        if data.is_empty() && fds.is_empty() {
            return Ok(None);
        }

        let message = decode_message(&data)?;
        if message.num_fds != fds.len() {
            return Err(BridgeError::ProtocolViolation(format!(
                "buffer handle announces {} fds but {} arrived",
                message.num_fds,
                fds.len()
            )));
        }

        Ok(Some(ReceivedBuffer {
            metadata: message.metadata,
            fds,
            ints: message.ints,
        }))
    }

    /// Send the status for the last received buffer.
    pub fn reply(&self, status: StatusReply) -> BridgeResult<()> {
        send_all(&self.stream, &status.encode()).map_err(|e| BridgeError::from_io("send status", &e))
    }

    /// Feed every buffer to `sink` and reply with its verdict until the
    /// guest hangs up. Returns the number of frames handled.
    ///
    /// A malformed message is answered with `FA` before the error is
    /// returned, so the guest is not left waiting.
    pub fn serve(&self, sink: &mut dyn FrameSink) -> BridgeResult<usize> {
        let mut frames = 0;
        loop {
            let buffer = match self.recv_buffer() {
                Ok(Some(buffer)) => buffer,
                Ok(None) => return Ok(frames),
                Err(e @ BridgeError::ProtocolViolation(_)) => {
                    let _ = self.reply(StatusReply::Failed);
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            let meta = buffer.metadata;
            let status = sink.frame(buffer);
            log::debug!(
                "[renderer-host] {}x{} stride {} format {} -> {status:?}",
                meta.width,
                meta.height,
                meta.stride,
                meta.pixel_format
            );
            self.reply(status)?;
            frames += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::protocol::{encode_message, BufferDescriptor};
    use crate::buffer::scm::send_with_fds;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::unix::io::AsFd;
    use std::thread;

    fn metadata() -> BufferMetadata {
        BufferMetadata {
            width: 2,
            height: 2,
            stride: 2,
            pixel_format: 2,
        }
    }

    fn read_status(stream: &UnixStream) -> [u8; 3] {
        let mut reply = [0u8; 3];
        let mut reader = stream;
        reader.read_exact(&mut reply).expect("status");
        reply
    }

    #[test]
    fn received_descriptors_reach_the_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = RendererHost::bind(dir.path().join("gralloc_buffer_handle")).expect("bind");
        let path = host.path().to_path_buf();

        let guest = thread::spawn(move || {
            let mut file = tempfile::tempfile().expect("tempfile");
            file.write_all(b"pixels").expect("write");
            let stream = UnixStream::connect(&path).expect("connect");
            let desc = BufferDescriptor::new(vec![file.as_fd()], vec![5, 6, 7]).expect("desc");
            let msg = encode_message(&metadata(), &desc);
            send_with_fds(&stream, &msg, desc.fds()).expect("send");
            read_status(&stream)
        });

        let connection = host.accept().expect("accept");
        let buffer = connection.recv_buffer().expect("recv").expect("buffer");
        assert_eq!(buffer.metadata, metadata());
        assert_eq!(buffer.ints, vec![5, 6, 7]);
        assert_eq!(buffer.fds.len(), 1);

        let mut file = std::fs::File::from(buffer.fds.into_iter().next().expect("fd"));
        file.seek(SeekFrom::Start(0)).expect("seek");
        let mut contents = String::new();
        file.read_to_string(&mut contents).expect("read");
        assert_eq!(contents, "pixels");

        connection.reply(StatusReply::Ok).expect("reply");
        assert_eq!(&guest.join().expect("guest"), b"OK\0");
    }

    #[test]
    fn serve_replies_with_sink_verdict_until_hangup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = RendererHost::bind(dir.path().join("gralloc_buffer_handle")).expect("bind");
        let path = host.path().to_path_buf();

        let guest = thread::spawn(move || {
            let stream = UnixStream::connect(&path).expect("connect");
            let mut replies = Vec::new();
            for word in [1, 2] {
                let desc = BufferDescriptor::new(vec![], vec![word]).expect("desc");
                send_with_fds(&stream, &encode_message(&metadata(), &desc), &[]).expect("send");
                replies.push(read_status(&stream));
            }
            replies
        });

        let mut sink = |buffer: ReceivedBuffer| {
            if buffer.ints == [1] {
                StatusReply::Ok
            } else {
                StatusReply::Failed
            }
        };
        let frames = host.accept().expect("accept").serve(&mut sink).expect("serve");
        assert_eq!(frames, 2);
        assert_eq!(guest.join().expect("guest"), vec![*b"OK\0", *b"FA\0"]);
    }

    #[test]
    fn malformed_message_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = RendererHost::bind(dir.path().join("gralloc_buffer_handle")).expect("bind");
        let path = host.path().to_path_buf();

        let guest = thread::spawn(move || {
            let stream = UnixStream::connect(&path).expect("connect");
            send_all(&stream, b"not a buffer").expect("send");
            read_status(&stream)
        });

        let mut sink = |_: ReceivedBuffer| StatusReply::Ok;
        let err = host.accept().expect("accept").serve(&mut sink).expect_err("bad message");
        assert!(matches!(err, BridgeError::ProtocolViolation(_)));
        assert_eq!(&guest.join().expect("guest"), b"FA\0");
    }
}
