//! Graphics buffer bridge.
//!
//! Two ways to get a rendered frame to the host:
//!
//! - [`framebuffer::Framebuffer`] passes the buffer handle itself (descriptors
//!   and layout words) to the renderer socket; see [`protocol`] and [`scm`].
//! - [`shm::ShmFramebuffer`] copies the pixels into a shared-memory file the
//!   host maps.

pub mod framebuffer;
pub mod protocol;
pub mod scm;
pub mod session;
pub mod shm;

pub use framebuffer::Framebuffer;
pub use protocol::{BufferDescriptor, BufferMetadata, StatusReply};
pub use session::{BufferSession, PostStatus};
pub use shm::{BufferLocker, SharedRegion, ShmFramebuffer};
