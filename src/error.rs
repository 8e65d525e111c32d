//! Error types for Setu

use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Setu error types
///
/// Transport faults (`Serial`, `Io`, `TransportClosed`) are always fatal to an
/// upload session. `Timeout` is only produced when strict response handling is
/// enabled; by default a silent device is recorded as an absent response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport was closed by its owner
    #[error("Transport closed")]
    TransportClosed,

    /// Device did not answer within the response window
    #[error("No device response during {phase}")]
    Timeout {
        /// Handshake phase that was waiting
        phase: &'static str,
    },

    /// Streamed field did not match the expected layout
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Input record could not be parsed
    #[error("Malformed record at {}:{line}: {source}", .path.display())]
    MalformedRecord {
        /// Input file
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Underlying JSON error
        source: serde_json::Error,
    },

    /// Input file does not exist
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl Error {
    /// Whether this error comes from the transport rather than the data
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Error::Serial(_) | Error::Io(_) | Error::TransportClosed
        )
    }
}
