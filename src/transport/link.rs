//! Line-oriented link over a byte transport
//!
//! The upload protocol is half-duplex: the host writes raw command and field
//! bytes, the MCU answers with text lines. `Link` owns the transport for the
//! lifetime of one session. Running two sessions against the same transport
//! (for example through cloned mock handles) is undefined behaviour: their
//! bytes and response lines interleave without any framing to separate them.

use super::Transport;
use crate::error::{Error, Result};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Sleep between empty reads while waiting for a response
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Exclusive, owned channel to one device
pub struct Link<T: Transport> {
    transport: T,
    bytes_sent: usize,
}

impl<T: Transport> Link<T> {
    /// Take ownership of a transport
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            bytes_sent: 0,
        }
    }

    /// Write every byte to the channel and flush
    ///
    /// Any transport failure is returned as-is; the caller treats it as fatal.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let n = self.transport.write(&bytes[written..])?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "transport accepted no bytes",
                )));
            }
            written += n;
        }
        self.transport.flush()?;
        self.bytes_sent += bytes.len();
        Ok(())
    }

    /// Wait up to `timeout` for one response line
    ///
    /// Returns `Ok(None)` if nothing usable arrived before the deadline and
    /// `Ok(Some(""))` if the device sent an empty line. Surrounding whitespace
    /// (including the `\r` of a `\r\n` ending) is stripped. Text still
    /// unterminated at the deadline is returned as the line when it is not
    /// blank. Bytes are consumed one at a time, so nothing after the `\n` is
    /// taken from the transport.
    pub fn receive_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        // A timeout too large to represent never expires
        let deadline = Instant::now().checked_add(timeout);
        let expired = |now: Instant| deadline.is_some_and(|d| now >= d);
        let mut line = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if self.transport.read(&mut byte)? == 1 {
                if byte[0] == b'\n' {
                    return Ok(Some(decode_line(&line)));
                }
                line.push(byte[0]);
            } else {
                let now = Instant::now();
                if expired(now) {
                    break;
                }
                let pause = deadline.map_or(POLL_INTERVAL, |d| POLL_INTERVAL.min(d - now));
                thread::sleep(pause);
                continue;
            }

            if expired(Instant::now()) {
                break;
            }
        }

        let partial = decode_line(&line);
        if partial.is_empty() {
            Ok(None)
        } else {
            log::debug!("Unterminated response at timeout: {:?}", partial);
            Ok(Some(partial))
        }
    }

    /// Total payload bytes written through this link
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Close the underlying transport
    pub fn close(&mut self) {
        self.transport.close();
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
