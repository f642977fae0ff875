//! sfdroid bridge - guest-side transport for the sfdroid compositor.
//!
//! An Android guest running inside a host compositor needs two things from
//! the host: sensor samples in, rendered frames out. This crate carries both
//! over Unix domain sockets in a shared runtime directory.
//!
//! # Architecture
//!
//! - **Sensor bridge** - request/response text frames on `sensors_handle`
//! - **Buffer bridge** - buffer handles with `SCM_RIGHTS` descriptors on
//!   `gralloc_buffer_handle`, or a shared-memory copy as fallback
//! - **Registry** - opens devices of either bridge by module kind and name
//! - **Host** - the receiving ends, for the developer CLI and tests
//!
//! Sessions dial lazily, drop their connection on the first I/O error and
//! redial on the next call. None of them spawns threads.
//!
//! # Modules
//!
//! - [`sensor`] - sensor table, wire protocol and [`SensorSession`]
//! - [`buffer`] - buffer wire protocol, [`BufferSession`] and framebuffers
//! - [`registry`] - module kinds and device factory
//! - [`config`] - configuration loading

// Library modules
pub mod buffer;
pub mod host;
pub mod registry;
pub mod sensor;

pub mod config;
pub mod connector;
pub mod constants;
pub mod display;
pub mod error;

// Re-export commonly used types
pub use buffer::{BufferDescriptor, BufferMetadata, BufferSession, PostStatus};
pub use config::Config;
pub use display::{DisplayGeometry, DisplaySetup, FixedDisplay, PixelFormat};
pub use error::{BridgeError, BridgeResult};
pub use registry::{Device, ModuleKind, Registry};
pub use sensor::{SensorEvent, SensorId, SensorSession};
