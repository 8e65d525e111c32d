//! Host-to-MCU upload protocol
//!
//! ## Wire format
//!
//! The stream is plain ASCII. Values inside a field are separated by `' '`
//! and every field ends with `'!'`. The same byte also closes a mapping
//! batch, a worker layer-line and the whole transmission; the device tells
//! them apart by position only. [`Terminator`] keeps the meaning explicit on
//! the host side even though every kind puts the same byte on the wire.

pub mod constants;
pub mod encoder;
pub mod records;

use constants::{CMD_ERASE, CMD_PREPARE_COORDINATOR, CMD_PREPARE_WORKER, TERMINATOR};

pub use encoder::{encode_mapping, encode_mapping_batch, encode_weight, encode_weight_block};
pub use records::{
    Convolution, CoordinatorLine, KernelInfo, Linear, MappingRecord, Scalar, WeightRecord,
    WorkerLine,
};

/// Role of a `'!'` byte in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Ends one field of a record
    Field,
    /// Ends one mapping record batch (coordinator)
    Batch,
    /// Ends one layer-line of weight blocks (worker)
    Line,
    /// Ends the transmission
    Stream,
}

impl Terminator {
    /// Byte emitted on the wire
    #[inline]
    pub const fn byte(self) -> u8 {
        match self {
            Terminator::Field | Terminator::Batch | Terminator::Line | Terminator::Stream => {
                TERMINATOR
            }
        }
    }

    /// Single-byte packet for a bare terminator
    #[inline]
    pub const fn packet(self) -> [u8; 1] {
        [self.byte()]
    }
}

/// Menu command understood by the download firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Erase stored files
    Erase,
    /// Prepare to receive coordinator mapping tables
    PrepareCoordinator,
    /// Prepare to receive worker weights
    PrepareWorker,
}

impl Command {
    /// Byte emitted on the wire
    #[inline]
    pub const fn byte(self) -> u8 {
        match self {
            Command::Erase => CMD_ERASE,
            Command::PrepareCoordinator => CMD_PREPARE_COORDINATOR,
            Command::PrepareWorker => CMD_PREPARE_WORKER,
        }
    }

    /// Parse a received command byte
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            CMD_ERASE => Some(Command::Erase),
            CMD_PREPARE_COORDINATOR => Some(Command::PrepareCoordinator),
            CMD_PREPARE_WORKER => Some(Command::PrepareWorker),
            _ => None,
        }
    }
}
