//! Transport layer.
//!
//! A transport moves addressed frames between the host and the debug
//! system. Delivery is in order per module id; there is no ordering
//! guarantee across different module ids.

pub mod tcp;

pub use tcp::TcpTransport;

use crate::error::TransportError;
use crate::protocol::Frame;
use std::time::Duration;

/// Bidirectional channel to the debug hardware.
///
/// Implementations serialise actual wire access internally so `send` may be
/// called from several threads at once.
pub trait Transport: Send + Sync {
    /// Send a frame towards its destination module.
    fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame addressed to the host.
    ///
    /// `Ok(None)` means nothing arrived in time; an error means the link is
    /// gone for good.
    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        (**self).send(frame)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        (**self).receive(timeout)
    }
}
