//! Buffer bridge wire protocol.
//!
//! One frame is one `sendmsg()` carrying a fixed header, the buffer handle's
//! integer words, and the handle's file descriptors as `SCM_RIGHTS`
//! ancillary data. All integers are little-endian and fixed width:
//!
//! ```text
//! [u32 version = 1]
//! [u32 width] [u32 height] [u32 stride] [i32 pixel_format]      ← BufferMetadata
//! [u32 handle_header = 12] [u32 num_fds] [u32 num_ints]         ← handle header
//! [i32 × num_ints]                                              ← handle ints
//! ```
//!
//! Descriptor numbers never appear in the byte stream; the receiver gets its
//! own duplicates from the kernel, in the order they were attached.
//!
//! The renderer answers every frame with a 3-byte [`StatusReply`]:
//! `"OK\0"` or `"FA\0"`.

use std::os::unix::io::BorrowedFd;

use crate::constants::{BUFFER_WIRE_VERSION, MAX_HANDLE_FDS, MAX_HANDLE_INTS};
use crate::error::{BridgeError, BridgeResult};

/// Size of the handle header (`header_size`, `num_fds`, `num_ints`).
pub const HANDLE_HEADER_LEN: usize = 12;

/// Bytes preceding the handle ints: version + metadata + handle header.
pub const MESSAGE_HEADER_LEN: usize = 4 + BufferMetadata::WIRE_LEN + HANDLE_HEADER_LEN;

/// Largest message a receiver must be prepared to read.
pub const MAX_MESSAGE_LEN: usize = MESSAGE_HEADER_LEN + 4 * MAX_HANDLE_INTS;

/// Geometry of the frame carried by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferMetadata {
    /// Width in pixels.
    pub width: u32,
    /// Height in lines.
    pub height: u32,
    /// Line stride in pixels.
    pub stride: u32,
    /// Graphics HAL pixel format code.
    pub pixel_format: i32,
}

impl BufferMetadata {
    /// Encoded size.
    pub const WIRE_LEN: usize = 16;

    /// Append the encoded record to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.width.to_le_bytes());
        buf.extend_from_slice(&self.height.to_le_bytes());
        buf.extend_from_slice(&self.stride.to_le_bytes());
        buf.extend_from_slice(&self.pixel_format.to_le_bytes());
    }

    /// Decode from exactly [`Self::WIRE_LEN`] bytes.
    pub fn decode(bytes: &[u8; Self::WIRE_LEN]) -> Self {
        Self {
            width: read_u32(bytes, 0),
            height: read_u32(bytes, 4),
            stride: read_u32(bytes, 8),
            pixel_format: read_u32(bytes, 12) as i32,
        }
    }
}

/// A graphics buffer handle: file descriptors plus opaque layout words.
///
/// The descriptors are borrowed. Sending a descriptor hands the renderer a
/// duplicate; the originals stay open and remain the caller's to close.
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'fd> {
    fds: Vec<BorrowedFd<'fd>>,
    ints: Vec<i32>,
}

impl<'fd> BufferDescriptor<'fd> {
    /// Build a descriptor, enforcing the handle size limits.
    pub fn new(fds: Vec<BorrowedFd<'fd>>, ints: Vec<i32>) -> BridgeResult<Self> {
        check_counts(fds.len(), ints.len())?;
        Ok(Self { fds, ints })
    }

    /// Attached file descriptors, in wire order.
    pub fn fds(&self) -> &[BorrowedFd<'fd>] {
        &self.fds
    }

    /// Integer layout words.
    pub fn ints(&self) -> &[i32] {
        &self.ints
    }
}

/// Decoded byte portion of a buffer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Frame geometry.
    pub metadata: BufferMetadata,
    /// Number of descriptors the sender attached.
    pub num_fds: usize,
    /// Handle integer words.
    pub ints: Vec<i32>,
}

/// Encode the byte portion of a buffer message.
pub fn encode_message(metadata: &BufferMetadata, descriptor: &BufferDescriptor<'_>) -> Vec<u8> {
    let ints = descriptor.ints();
    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + 4 * ints.len());
    buf.extend_from_slice(&BUFFER_WIRE_VERSION.to_le_bytes());
    metadata.encode_into(&mut buf);
    buf.extend_from_slice(&(HANDLE_HEADER_LEN as u32).to_le_bytes());
    buf.extend_from_slice(&(descriptor.fds().len() as u32).to_le_bytes());
    buf.extend_from_slice(&(ints.len() as u32).to_le_bytes());
    for word in ints {
        buf.extend_from_slice(&word.to_le_bytes());
    }
    buf
}

/// Decode the byte portion of a buffer message.
///
/// The message must be complete: trailing or missing int words are a
/// protocol violation.
pub fn decode_message(bytes: &[u8]) -> BridgeResult<DecodedMessage> {
    if bytes.len() < MESSAGE_HEADER_LEN {
        return Err(violation(format!(
            "buffer message too short: {} bytes, expected >= {MESSAGE_HEADER_LEN}",
            bytes.len()
        )));
    }

    let version = read_u32(bytes, 0);
    if version != BUFFER_WIRE_VERSION {
        return Err(violation(format!("unsupported buffer wire version {version}")));
    }

    let mut meta = [0u8; BufferMetadata::WIRE_LEN];
    meta.copy_from_slice(&bytes[4..4 + BufferMetadata::WIRE_LEN]);
    let metadata = BufferMetadata::decode(&meta);

    let off = 4 + BufferMetadata::WIRE_LEN;
    let header_len = read_u32(bytes, off) as usize;
    if header_len != HANDLE_HEADER_LEN {
        return Err(violation(format!("unexpected handle header size {header_len}")));
    }
    let num_fds = read_u32(bytes, off + 4) as usize;
    let num_ints = read_u32(bytes, off + 8) as usize;
    check_counts(num_fds, num_ints)?;

    let body = &bytes[MESSAGE_HEADER_LEN..];
    if body.len() != 4 * num_ints {
        return Err(violation(format!(
            "buffer handle announces {num_ints} ints but carries {} bytes",
            body.len()
        )));
    }
    let ints = body
        .chunks_exact(4)
        .map(|w| i32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    Ok(DecodedMessage {
        metadata,
        num_fds,
        ints,
    })
}

/// Renderer's answer to one buffer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReply {
    /// Frame accepted (`"OK\0"`).
    Ok,
    /// Frame refused (`"FA\0"`).
    Failed,
}

impl StatusReply {
    /// Encoded size, terminator included.
    pub const WIRE_LEN: usize = 3;

    /// Wire bytes.
    pub fn encode(self) -> [u8; Self::WIRE_LEN] {
        match self {
            Self::Ok => *b"OK\0",
            Self::Failed => *b"FA\0",
        }
    }

    /// Parse a reply. Anything but `"OK\0"` or `"FA\0"` is a violation.
    pub fn decode(bytes: [u8; Self::WIRE_LEN]) -> BridgeResult<Self> {
        if bytes[2] != 0 {
            return Err(violation("status reply is not NUL terminated".to_owned()));
        }
        match &bytes[..2] {
            b"OK" => Ok(Self::Ok),
            b"FA" => Ok(Self::Failed),
            other => Err(violation(format!(
                "unknown status: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

fn check_counts(num_fds: usize, num_ints: usize) -> BridgeResult<()> {
    if num_fds > MAX_HANDLE_FDS {
        return Err(violation(format!(
            "buffer handle has {num_fds} fds, limit is {MAX_HANDLE_FDS}"
        )));
    }
    if num_ints > MAX_HANDLE_INTS {
        return Err(violation(format!(
            "buffer handle has {num_ints} ints, limit is {MAX_HANDLE_INTS}"
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

fn violation(msg: String) -> BridgeError {
    BridgeError::ProtocolViolation(msg)
}
