//! Wire constants shared by the host uploader and the MCU download menu

/// Default serial baud rate of the download firmware
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// Menu commands (single ASCII byte, no framing)
pub const CMD_ERASE: u8 = b'e'; // Erase stored files; must be sent twice
pub const CMD_PREPARE_COORDINATOR: u8 = b'c'; // Enter coordinator mapping download
pub const CMD_PREPARE_WORKER: u8 = b's'; // Enter worker weight download

// Stream delimiters
pub const TERMINATOR: u8 = b'!'; // Field, batch, line and stream terminator
pub const VALUE_SEPARATOR: u8 = b' '; // Separates values inside one field

// Convolution / Linear discriminants of the kernel info field
pub const TAG_CONVOLUTION: u8 = b'C';
pub const TAG_LINEAR: u8 = b'L';

// Timing defaults (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 10_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10;

// Responses expected per handshake phase
pub const PHASE_RESPONSES: usize = 2;
pub const FINAL_RESPONSES: usize = 1;
