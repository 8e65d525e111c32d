//! Transport layer for I/O abstraction
//!
//! `Transport` is the byte-level seam (serial port, mock, simulator).
//! `Link` builds the upload protocol's line-oriented contract on top of it.

use crate::error::Result;

mod link;
mod mock;
mod serial;

pub use link::Link;
pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    ///
    /// Returns `Ok(0)` when nothing arrived within the transport's own
    /// read timeout.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0) // Default implementation
    }

    /// Release the underlying channel
    ///
    /// Every later operation must fail with `Error::TransportClosed`.
    fn close(&mut self) {}
}
