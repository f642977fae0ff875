//! Shared-memory framebuffer.
//!
//! Used when no socket renderer is configured: every post copies the whole
//! frame into a file-backed `MAP_SHARED` mapping (by default
//! `/dev/shm/droid_screen`) that the host maps on its side.
//!
//! Nothing coordinates the copy with the host's reads. A reader may observe
//! a frame that is half old, half new; the host is expected to tolerate that.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::display::{DisplayGeometry, DisplaySetup};
use crate::error::BridgeResult;

use super::protocol::BufferDescriptor;

/// A fixed-size, file-backed shared mapping.
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    path: PathBuf,
    // Keeps the descriptor open alongside the mapping.
    _file: File,
}

// SAFETY: the mapping is owned exclusively by this value; access goes
// through `&self`/`&mut self` like any other owned buffer.
unsafe impl Send for SharedRegion {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl Sync for SharedRegion {}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl SharedRegion {
    /// Create (or truncate) `path`, size it to `len` zero bytes and map it
    /// read/write.
    pub fn create(path: &Path, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "shared region must not be empty",
            ));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o666)
            .open(path)?;
        file.set_len(len as u64)?;
        Self::map(file, path, len)
    }

    /// Map an existing region file at its current size, e.g. from the
    /// consumer side.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = usize::try_from(file.metadata()?.len())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "shared region file is empty",
            ));
        }
        Self::map(file, path, len)
    }

    fn map(file: File, path: &Path, len: usize) -> io::Result<Self> {
        // SAFETY: fresh mapping of `len` bytes of an open file; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
        Ok(Self {
            ptr,
            len,
            path: path.to_path_buf(),
            _file: file,
        })
    }

    /// Mapping size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; empty regions cannot be created.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is a live mapping of `len` bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Copy `frame` to the start of the region. Returns the bytes copied,
    /// which is `min(frame.len(), self.len())`.
    pub fn write_frame(&mut self, frame: &[u8]) -> usize {
        let n = frame.len().min(self.len);
        self.as_mut_slice()[..n].copy_from_slice(&frame[..n]);
        n
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the range mapped in `map`.
        unsafe { libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.len) };
    }
}

/// CPU access to graphics buffers, provided by the buffer allocator.
pub trait BufferLocker {
    /// Lock `buffer` for reading over `width × height`, pass its bytes to
    /// `read`, then unlock.
    fn with_locked(
        &self,
        buffer: &BufferDescriptor<'_>,
        width: u32,
        height: u32,
        read: &mut dyn FnMut(&[u8]),
    ) -> BridgeResult<()>;
}

/// Framebuffer device that publishes frames through a [`SharedRegion`].
#[derive(Debug)]
pub struct ShmFramebuffer {
    geometry: DisplayGeometry,
    region: Mutex<Option<SharedRegion>>,
}

impl ShmFramebuffer {
    /// Run display setup and create the frame region at `path`.
    ///
    /// A region that cannot be created is logged, not returned: the device
    /// still opens and every post is dropped.
    pub fn setup(display: &dyn DisplaySetup, path: &Path) -> Self {
        let geometry = display.setup();
        let region = match SharedRegion::create(path, geometry.frame_len()) {
            Ok(region) => {
                log::info!(
                    "[shm] allocated {} byte frame region at {}",
                    region.len(),
                    path.display()
                );
                Some(region)
            }
            Err(e) => {
                log::error!("[shm] failed to map {}: {e}", path.display());
                None
            }
        };
        Self {
            geometry,
            region: Mutex::new(region),
        }
    }

    /// Geometry reported at setup.
    pub fn geometry(&self) -> DisplayGeometry {
        self.geometry
    }

    /// Only an interval of 1 is supported.
    pub fn set_swap_interval(&self, interval: i32) -> BridgeResult<()> {
        DisplayGeometry::check_swap_interval(interval)
    }

    /// Whether frames actually reach shared memory.
    pub fn is_mapped(&self) -> bool {
        self.region().is_some()
    }

    /// Copy one frame into the shared region.
    ///
    /// Without a mapping the frame is dropped and `Ok(())` returned. Lock
    /// failures from the allocator are passed through.
    pub fn post(&self, locker: &dyn BufferLocker, buffer: &BufferDescriptor<'_>) -> BridgeResult<()> {
        let mut guard = self.region();
        let Some(region) = guard.as_mut() else {
            log::warn!("[shm] not ready, dropping frame");
            return Ok(());
        };

        let expected = region.len();
        locker.with_locked(buffer, self.geometry.width, self.geometry.height, &mut |pixels: &[u8]| {
            let copied = region.write_frame(pixels);
            if copied < expected {
                log::warn!("[shm] short source buffer: {copied} of {expected} bytes");
            }
        })
    }

    fn region(&self) -> MutexGuard<'_, Option<SharedRegion>> {
        self.region.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
