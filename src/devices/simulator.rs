//! In-process MCU running the download menu
//!
//! Behaves like the download firmware seen over its serial port: single-byte
//! menu commands answered with text lines, then a `!`-delimited data stream
//! decoded field by field. Used by the tests and by `--dry-run`.
//!
//! ## Menu
//!
//! | Byte | Response lines | Effect |
//! |------|----------------|--------|
//! | `e`  | 2 | Arms erase; a second `e` erases (2 more lines) |
//! | `c`  | 2 | Enters coordinator download |
//! | `s`  | 2 | Enters worker download |
//!
//! Reaching end of stream produces one completion line and returns to the
//! menu. A malformed field produces one `error:` line and aborts the download.
//! Fields that reach the menu after a download ended (for example the rest
//! of a worker file after an empty layer-line) are recorded in `errors()`
//! without a response line.

use super::decoder::{DecodedMapping, DecodedWeight, MappingDecoder, Progress, WeightDecoder};
use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::protocol::constants::TERMINATOR;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

enum DeviceMode {
    Menu { erase_armed: bool },
    Coordinator(MappingDecoder),
    Worker(WeightDecoder),
}

struct SimulatorInner {
    mode: DeviceMode,
    silent: bool,
    closed: bool,
    responses: VecDeque<u8>,
    field: Vec<u8>,
    stray: Vec<u8>,
    commands: Vec<Command>,
    erase_count: usize,
    mappings: Vec<DecodedMapping>,
    weight_lines: Vec<Vec<DecodedWeight>>,
    open_line: Vec<DecodedWeight>,
    completed_streams: usize,
    errors: Vec<String>,
}

/// Simulated download MCU
///
/// Clones share state: keep one handle for assertions and hand the other to
/// the session.
#[derive(Clone)]
pub struct DeviceSimulator {
    inner: Arc<Mutex<SimulatorInner>>,
}

impl DeviceSimulator {
    /// Create a simulator that answers every command
    pub fn new() -> Self {
        Self::with_responses(true)
    }

    /// Create a simulator that decodes everything but never answers
    pub fn silent() -> Self {
        Self::with_responses(false)
    }

    fn with_responses(respond: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimulatorInner {
                mode: DeviceMode::Menu { erase_armed: false },
                silent: !respond,
                closed: false,
                responses: VecDeque::new(),
                field: Vec::new(),
                stray: Vec::new(),
                commands: Vec::new(),
                erase_count: 0,
                mappings: Vec::new(),
                weight_lines: Vec::new(),
                open_line: Vec::new(),
                completed_streams: 0,
                errors: Vec::new(),
            })),
        }
    }

    /// Menu commands received so far
    pub fn commands(&self) -> Vec<Command> {
        self.inner.lock().commands.clone()
    }

    /// Number of confirmed erases
    pub fn erase_count(&self) -> usize {
        self.inner.lock().erase_count
    }

    /// Mapping records decoded so far
    pub fn mappings(&self) -> Vec<DecodedMapping> {
        self.inner.lock().mappings.clone()
    }

    /// Weight blocks decoded so far, grouped by layer-line
    pub fn weight_lines(&self) -> Vec<Vec<DecodedWeight>> {
        self.inner.lock().weight_lines.clone()
    }

    /// Downloads that reached end of stream
    pub fn completed_streams(&self) -> usize {
        self.inner.lock().completed_streams
    }

    /// Protocol violations seen
    pub fn errors(&self) -> Vec<String> {
        self.inner.lock().errors.clone()
    }

    /// Whether the device is waiting for menu input
    pub fn in_menu(&self) -> bool {
        matches!(self.inner.lock().mode, DeviceMode::Menu { .. })
    }
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorInner {
    fn respond(&mut self, line: &str) {
        log::trace!("Simulator -> {}", line);
        if !self.silent {
            self.responses.extend(line.as_bytes());
            self.responses.extend(b"\r\n");
        }
    }

    fn receive(&mut self, byte: u8) {
        if matches!(self.mode, DeviceMode::Menu { .. }) {
            self.menu_byte(byte);
        } else if byte == TERMINATOR {
            let field = String::from_utf8_lossy(&self.field).into_owned();
            self.field.clear();
            self.stream_field(&field);
        } else {
            self.field.push(byte);
        }
    }

    fn menu_byte(&mut self, byte: u8) {
        let DeviceMode::Menu { erase_armed } = self.mode else {
            return;
        };
        if byte == TERMINATOR {
            self.flush_stray();
            return;
        }
        // Command bytes only count at the start of a field, so text such as
        // `1e-05` left over from an ended stream never triggers an erase
        if self.stray.is_empty() {
            if let Some(command) = Command::from_byte(byte) {
                self.menu_command(command, erase_armed);
                return;
            }
            if byte.is_ascii_whitespace() {
                return;
            }
        }
        self.stray.push(byte);
        self.mode = DeviceMode::Menu { erase_armed: false };
    }

    /// Record a field that arrived while no download was running
    fn flush_stray(&mut self) {
        if self.stray.is_empty() {
            return;
        }
        let field = String::from_utf8_lossy(&self.stray).trim().to_string();
        self.stray.clear();
        log::debug!("Simulator ignored field outside a download: {:?}", field);
        self.errors.push(format!("data outside a download: {:?}", field));
    }

    fn menu_command(&mut self, command: Command, erase_armed: bool) {
        self.commands.push(command);

        match command {
            Command::Erase if erase_armed => {
                self.erase_count += 1;
                self.mappings.clear();
                self.weight_lines.clear();
                self.respond("Erasing stored files...");
                self.respond("Erase complete");
                self.mode = DeviceMode::Menu { erase_armed: false };
            }
            Command::Erase => {
                self.respond("Erase all stored files?");
                self.respond("Send 'e' again to confirm");
                self.mode = DeviceMode::Menu { erase_armed: true };
            }
            Command::PrepareCoordinator => {
                self.respond("Coordinator download selected");
                self.respond("Waiting for mapping data...");
                self.field.clear();
                self.mode = DeviceMode::Coordinator(MappingDecoder::new());
            }
            Command::PrepareWorker => {
                self.respond("Worker download selected");
                self.respond("Waiting for weight data...");
                self.field.clear();
                self.open_line.clear();
                self.mode = DeviceMode::Worker(WeightDecoder::new());
            }
        }
    }

    fn stream_field(&mut self, field: &str) {
        let outcome = match &mut self.mode {
            DeviceMode::Coordinator(decoder) => match decoder.push_field(field) {
                Ok(Progress::Record(mapping)) => {
                    self.mappings.push(mapping);
                    Ok(false)
                }
                Ok(Progress::StreamEnd) => Ok(true),
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            },
            DeviceMode::Worker(decoder) => match decoder.push_field(field) {
                Ok(Progress::Record(weight)) => {
                    self.open_line.push(weight);
                    Ok(false)
                }
                Ok(Progress::LineEnd) => {
                    let line = std::mem::take(&mut self.open_line);
                    self.weight_lines.push(line);
                    Ok(false)
                }
                Ok(Progress::StreamEnd) => Ok(true),
                Ok(Progress::Pending) => Ok(false),
                Err(e) => Err(e),
            },
            DeviceMode::Menu { .. } => Ok(false),
        };

        match outcome {
            Ok(true) => self.finish_stream(),
            Ok(false) => {}
            Err(e) => {
                let message = e.to_string();
                log::debug!("Simulator rejected field {:?}: {}", field, message);
                self.respond(&format!("error: {}", message));
                self.errors.push(message);
                self.mode = DeviceMode::Menu { erase_armed: false };
            }
        }
    }

    fn finish_stream(&mut self) {
        self.completed_streams += 1;
        let summary = match self.mode {
            DeviceMode::Coordinator(_) => {
                format!("Coordinator download complete: {} records", self.mappings.len())
            }
            _ => {
                let blocks: usize = self.weight_lines.iter().map(Vec::len).sum();
                format!(
                    "Worker download complete: {} lines, {} blocks",
                    self.weight_lines.len(),
                    blocks
                )
            }
        };
        self.respond(&summary);
        self.mode = DeviceMode::Menu { erase_armed: false };
    }
}

impl Transport for DeviceSimulator {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::TransportClosed);
        }
        let available = inner.responses.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.responses.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::TransportClosed);
        }
        for &byte in data {
            inner.receive(byte);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        if self.inner.lock().closed {
            return Err(Error::TransportClosed);
        }
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().responses.len())
    }

    fn close(&mut self) {
        self.inner.lock().closed = true;
    }
}
