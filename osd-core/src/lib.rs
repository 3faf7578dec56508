//! OSD Core - host side of an on-chip debug system.
//!
//! This crate talks to the debug modules of a system-on-chip over a
//! [`Transport`], discovers what hardware is present, and drives a run:
//! reset, configure trace logs and memory, start the cores, and wait for
//! them to stop. A [`sim::SimulatedSoc`] stands in for real hardware.

pub mod config;
pub mod error;
pub mod image;
pub mod link;
pub mod modules;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sim;
pub mod trace;
pub mod transport;

// Re-export commonly used types
pub use config::{LogNaming, SessionConfig, VerificationPolicy};
pub use error::{Error, LoadError, Result, StateError, TransportError, VerificationError};
pub use image::Image;
pub use modules::{CoreTraceModule, MemoryModule, ModuleProxy, Proxy, TraceLog, TraceModule};
pub use protocol::{ModuleId, StopReason};
pub use registry::{Capability, MemoryRegion, Module, ModuleKind, Registry};
pub use session::{ImageLoadRequest, Session, SessionEvent, SessionState};
pub use transport::{TcpTransport, Transport};
