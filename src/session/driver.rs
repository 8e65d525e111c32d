//! Session driver: picks the session type for a mode and runs it

use super::{SessionReport, UploadSession};
use crate::config::TimingConfig;
use crate::error::{Error, Result};
use crate::protocol::{CoordinatorLine, WorkerLine};
use crate::transport::Transport;
use std::fmt;
use std::str::FromStr;

/// Which kind of MCU is being programmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Coordinator: receives mapping tables
    Coordinator,
    /// Worker: receives weight blocks
    Worker,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "coordinator" => Ok(Mode::Coordinator),
            "w" | "worker" => Ok(Mode::Worker),
            other => Err(Error::InvalidParameter(format!(
                "unknown mode {:?} (expected coordinator|c or worker|w)",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Coordinator => write!(f, "coordinator"),
            Mode::Worker => write!(f, "worker"),
        }
    }
}

/// Parsed input for one upload
#[derive(Debug, Clone)]
pub enum UploadRecords {
    Coordinator(Vec<CoordinatorLine>),
    Worker(Vec<WorkerLine>),
}

impl UploadRecords {
    pub fn mode(&self) -> Mode {
        match self {
            UploadRecords::Coordinator(_) => Mode::Coordinator,
            UploadRecords::Worker(_) => Mode::Worker,
        }
    }

    /// Number of input lines
    pub fn len(&self) -> usize {
        match self {
            UploadRecords::Coordinator(lines) => lines.len(),
            UploadRecords::Worker(lines) => lines.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Final result of a driven session
#[derive(Debug)]
pub struct DriverOutcome {
    pub report: SessionReport,
    /// Fatal error, if the session did not reach `Done`
    pub failure: Option<Error>,
}

impl DriverOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Last response line seen from the device
    pub fn last_response(&self) -> Option<&str> {
        self.report.last_response()
    }
}

/// Runs one upload session per call
#[derive(Debug, Clone, Default)]
pub struct SessionDriver {
    timing: TimingConfig,
}

impl SessionDriver {
    pub fn new(timing: TimingConfig) -> Self {
        Self { timing }
    }

    /// Run a `mode` session over `transport`
    ///
    /// `mcu_index` selects the mapping of each coordinator line; worker
    /// uploads only use it for logging since the input file is already per
    /// worker.
    pub fn run<T: Transport>(
        &self,
        transport: T,
        mode: Mode,
        mcu_index: usize,
        records: &UploadRecords,
    ) -> DriverOutcome {
        let mut session = UploadSession::new(transport, mode, self.timing.clone());
        log::info!("Starting {} upload for MCU {}", mode, mcu_index);

        let result = match (mode, records) {
            (Mode::Coordinator, UploadRecords::Coordinator(lines)) => {
                session.upload_coordinator(lines, mcu_index)
            }
            (Mode::Worker, UploadRecords::Worker(lines)) => session.upload_worker(lines),
            (mode, records) => Err(Error::InvalidParameter(format!(
                "{} session given {} records",
                mode,
                records.mode()
            ))),
        };

        let report = session.into_report();
        match &result {
            Ok(()) => log::info!(
                "{} upload finished: {} records sent, {} lines skipped, last response {:?}",
                mode,
                report.records_sent,
                report.lines_skipped,
                report.last_response()
            ),
            Err(e) => log::error!("{} upload failed: {}", mode, e),
        }

        DriverOutcome {
            report,
            failure: result.err(),
        }
    }
}
