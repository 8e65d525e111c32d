//! Upload session: handshake state machine and record streaming
//!
//! ## Coordinator flow
//!
//! ```text
//! Idle --'e'--> ErasePending --2 lines--> --'e' + settle--> EraseConfirmed --2 lines-->
//!      --'c' + settle--> PreparePending --2 lines--> Ready --records--> Streaming
//!      --'!'--> EofSent --1 line--> Done
//! ```
//!
//! ## Worker flow
//!
//! ```text
//! Idle --'s' + settle--> PreparePending --2 lines--> Ready --blocks--> Streaming
//!      --'!'--> EofSent --1 line--> Done
//! ```
//!
//! Any transport fault moves the session to `Failed` and is returned to the
//! caller. A silent device is recorded as an absent response unless
//! `strict_responses` is set.

mod driver;

pub use driver::{DriverOutcome, Mode, SessionDriver, UploadRecords};

use crate::config::{Readiness, TimingConfig};
use crate::error::{Error, Result};
use crate::protocol::constants::{FINAL_RESPONSES, PHASE_RESPONSES};
use crate::protocol::{
    Command, CoordinatorLine, Terminator, WorkerLine, encode_mapping_batch, encode_weight_block,
};
use crate::transport::{Link, Transport};
use std::fmt;
use std::thread;
use std::time::Duration;

/// Handshake phase of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ErasePending,
    EraseConfirmed,
    PreparePending,
    Ready,
    Streaming,
    EofSent,
    Done,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of one session, available even after a failure
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub mode: Mode,
    pub state: SessionState,
    /// Mapping records or weight blocks written
    pub records_sent: usize,
    /// Coordinator lines without a mapping for the selected MCU
    pub lines_skipped: usize,
    /// Coordinator stream ended at a line with no mappings at all
    pub stopped_early: bool,
    pub bytes_sent: usize,
    /// Every response wait in order; `None` is a timeout
    pub responses: Vec<Option<String>>,
}

impl SessionReport {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: SessionState::Idle,
            records_sent: 0,
            lines_skipped: 0,
            stopped_early: false,
            bytes_sent: 0,
            responses: Vec::new(),
        }
    }

    /// Most recent line the device actually sent
    pub fn last_response(&self) -> Option<&str> {
        self.responses.iter().rev().find_map(|r| r.as_deref())
    }

    /// Number of response waits that timed out
    pub fn timeouts(&self) -> usize {
        self.responses.iter().filter(|r| r.is_none()).count()
    }
}

/// One upload over an exclusively owned link
pub struct UploadSession<T: Transport> {
    link: Link<T>,
    timing: TimingConfig,
    report: SessionReport,
}

impl<T: Transport> UploadSession<T> {
    /// Create a session in `Idle`
    pub fn new(transport: T, mode: Mode, timing: TimingConfig) -> Self {
        Self {
            link: Link::new(transport),
            timing,
            report: SessionReport::new(mode),
        }
    }

    pub fn state(&self) -> SessionState {
        self.report.state
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn into_report(self) -> SessionReport {
        self.report
    }

    /// Erase, prepare, then stream the mapping selected by `mcu_index` from
    /// every line
    ///
    /// A line whose mapping list is shorter than `mcu_index + 1` is skipped;
    /// a line with no mappings at all ends the stream.
    pub fn upload_coordinator(&mut self, lines: &[CoordinatorLine], mcu_index: usize) -> Result<()> {
        self.start(Mode::Coordinator)?;
        let result = self.coordinator_flow(lines, mcu_index);
        self.finish(result)
    }

    /// Prepare, then stream every weight block of every layer-line
    pub fn upload_worker(&mut self, lines: &[WorkerLine]) -> Result<()> {
        self.start(Mode::Worker)?;
        let result = self.worker_flow(lines);
        self.finish(result)
    }

    fn start(&self, mode: Mode) -> Result<()> {
        if self.report.state != SessionState::Idle {
            return Err(Error::InvalidParameter(format!(
                "session already in state {}",
                self.report.state
            )));
        }
        if self.report.mode != mode {
            return Err(Error::InvalidParameter(format!(
                "{} session cannot run a {} upload",
                self.report.mode, mode
            )));
        }
        Ok(())
    }

    fn finish(&mut self, result: Result<()>) -> Result<()> {
        self.report.bytes_sent = self.link.bytes_sent();
        if let Err(e) = &result {
            log::error!("Upload failed in state {}: {}", self.report.state, e);
            self.transition(SessionState::Failed);
        }
        result
    }

    fn coordinator_flow(&mut self, lines: &[CoordinatorLine], mcu_index: usize) -> Result<()> {
        log::info!(
            "Coordinator upload: {} lines, MCU index {}",
            lines.len(),
            mcu_index
        );

        // 1. Erase: request, then confirm
        self.send_command(Command::Erase)?;
        self.transition(SessionState::ErasePending);
        self.await_responses("erase request", PHASE_RESPONSES, Duration::ZERO)?;

        self.send_command(Command::Erase)?;
        self.transition(SessionState::EraseConfirmed);
        self.settle_and_await("Cleaning", "erase", PHASE_RESPONSES)?;

        // 2. Prepare to receive mappings
        self.send_command(Command::PrepareCoordinator)?;
        self.transition(SessionState::PreparePending);
        self.settle_and_await("Prepare to receive", "prepare", PHASE_RESPONSES)?;
        self.transition(SessionState::Ready);

        // 3. Stream
        self.transition(SessionState::Streaming);
        for (i, line) in lines.iter().enumerate() {
            if line.mapping.is_empty() {
                log::info!("Line {}: no mappings, ending stream", i + 1);
                self.report.stopped_early = true;
                break;
            }
            let Some(record) = line.mapping.get(mcu_index) else {
                log::warn!(
                    "Line {}: {} mappings, none for MCU {}; skipped",
                    i + 1,
                    line.mapping.len(),
                    mcu_index
                );
                self.report.lines_skipped += 1;
                continue;
            };

            let packet = encode_mapping_batch(record);
            log::debug!(
                "Line {}: {} phases, {} bytes",
                i + 1,
                record.phases(),
                packet.len()
            );
            self.link.send(&packet)?;
            self.report.records_sent += 1;
        }

        self.end_stream()
    }

    fn worker_flow(&mut self, lines: &[WorkerLine]) -> Result<()> {
        let blocks: usize = lines.iter().map(|l| l.weights.len()).sum();
        log::info!("Worker upload: {} lines, {} weight blocks", lines.len(), blocks);

        // 1. Prepare to receive weights
        self.send_command(Command::PrepareWorker)?;
        self.transition(SessionState::PreparePending);
        self.settle_and_await("Prepare to receive", "prepare", PHASE_RESPONSES)?;
        self.transition(SessionState::Ready);

        // 2. Stream each layer-line
        self.transition(SessionState::Streaming);
        for (i, line) in lines.iter().enumerate() {
            if line.weights.is_empty() {
                log::warn!(
                    "Line {}: no weight blocks; the device reads this line terminator as end of stream",
                    i + 1
                );
            }
            for weight in &line.weights {
                let packet = encode_weight_block(weight);
                log::debug!(
                    "Line {}: block {} ({} values, {} bytes)",
                    i + 1,
                    self.report.records_sent,
                    weight.data.len(),
                    packet.len()
                );
                self.link.send(&packet)?;
                self.report.records_sent += 1;
            }
            self.link.send(&Terminator::Line.packet())?;
        }

        self.end_stream()
    }

    fn end_stream(&mut self) -> Result<()> {
        self.link.send(&Terminator::Stream.packet())?;
        self.transition(SessionState::EofSent);
        log::info!(
            "Stream complete: {} records, {} bytes",
            self.report.records_sent,
            self.link.bytes_sent()
        );

        self.await_responses("final response", FINAL_RESPONSES, Duration::ZERO)?;
        self.transition(SessionState::Done);
        Ok(())
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        log::debug!("Sending command {:?} ({:?})", command, command.byte() as char);
        self.link.send(&[command.byte()])
    }

    /// Give the device time for a slow phase, then collect its responses
    fn settle_and_await(&mut self, label: &str, phase: &'static str, count: usize) -> Result<()> {
        match self.timing.readiness {
            Readiness::FixedDelay => {
                self.settle(label);
                self.await_responses(phase, count, Duration::ZERO)
            }
            Readiness::Acknowledged => {
                let grace = self.timing.settle_delay();
                self.await_responses(phase, count, grace)
            }
        }
    }

    /// Fixed settle delay with a once-per-second countdown
    fn settle(&self, label: &str) {
        let total = self.timing.settle_delay();
        if total.is_zero() {
            return;
        }
        let step = Duration::from_secs(1);
        let mut waited = Duration::ZERO;
        while waited < total {
            let chunk = step.min(total - waited);
            thread::sleep(chunk);
            waited += chunk;
            log::info!(
                "{}... {:.0}/{:.0}s",
                label,
                waited.as_secs_f32(),
                total.as_secs_f32()
            );
        }
    }

    /// Read `count` response lines; the first wait is extended by `grace`
    fn await_responses(&mut self, phase: &'static str, count: usize, grace: Duration) -> Result<()> {
        for i in 0..count {
            let timeout = if i == 0 {
                self.timing.response_timeout().saturating_add(grace)
            } else {
                self.timing.response_timeout()
            };

            let response = self.link.receive_line(timeout)?;
            match &response {
                Some(line) => log::info!("MCU: {}", line),
                None => {
                    log::warn!("MCU: no response during {} ({:?})", phase, timeout);
                    if self.timing.strict_responses {
                        self.report.responses.push(None);
                        return Err(Error::Timeout { phase });
                    }
                }
            }
            self.report.responses.push(response);
        }
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("Session {} -> {}", self.report.state, next);
        self.report.state = next;
    }
}
