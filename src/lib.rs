//! Setu - Host-side uploader for the distributed inference MCUs
//!
//! Streams per-MCU mapping tables to the coordinator and quantized weight
//! blocks to each worker over a serial link, driving the download menu of
//! the on-device firmware.
//!
//! ## Layout
//!
//! - [`transport`]: byte-level I/O seam and the line-oriented [`transport::Link`]
//! - [`protocol`]: input record types and the `!`-delimited wire encoder
//! - [`session`]: handshake state machine and the [`session::SessionDriver`]
//! - [`devices`]: in-process model of the download firmware for tests and dry runs
//! - [`input`]: JSON-lines input discovery and loading

pub mod config;
pub mod devices;
pub mod error;
pub mod input;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::UploadConfig;
pub use error::{Error, Result};
pub use session::{DriverOutcome, Mode, SessionDriver, SessionReport, SessionState, UploadRecords};
