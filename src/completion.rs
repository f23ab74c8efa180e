//! Completion detection for a running acquisition.
//!
//! Once reset is released the FPGA runs the excitation and relaxation windows
//! on its own. [`CompletionWaiter`] polls the two done-flags at a fixed
//! interval until both are set, or gives up after a timeout. The DMA pointers
//! are sampled on every iteration so a timeout can report how far the engines
//! got.
//!
//! Polling uses a fixed interval with no backoff: the acquisition length is
//! known in advance and short, so latency stays bounded.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, SequencerError};
use crate::hardware::RegisterBus;
use crate::registers;

/// Default completion timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// DMA pointer values observed at completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionPointers {
    /// Stimulus engine pointer (`WRITER_WRITE_PTR`).
    pub write_ptr: u32,
    /// Capture engine pointer (`READER_READ_PTR`).
    pub read_ptr: u32,
}

impl CompletionPointers {
    /// Sample both pointer registers.
    pub fn read<R: RegisterBus + ?Sized>(bus: &R) -> Result<Self> {
        Ok(Self {
            write_ptr: bus.read_register(registers::WRITER_WRITE_PTR)?,
            read_ptr: bus.read_register(registers::READER_READ_PTR)?,
        })
    }
}

/// Fixed-interval poller for the writer/reader done-flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionWaiter {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for CompletionWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

impl CompletionWaiter {
    /// Create a waiter with the given timeout and poll interval.
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Timeout measured from the first poll.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Interval between polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll until both done-flags are set.
    ///
    /// Returns the pointer values read in the same iteration that observed
    /// both flags set.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Timeout`] carrying the last observed pointers
    /// if the flags have not both asserted within the timeout, or any register
    /// access error.
    pub fn wait<R: RegisterBus + ?Sized>(&self, bus: &R) -> Result<CompletionPointers> {
        let t0 = Instant::now();
        let mut polls: u64 = 0;

        loop {
            let writer_done = bus.read_register(registers::WRITER_DONE)? & registers::DONE_BIT;
            let reader_done = bus.read_register(registers::READER_DONE)? & registers::DONE_BIT;
            let pointers = CompletionPointers::read(bus)?;
            polls += 1;

            trace!(
                writer_done,
                reader_done,
                write_ptr = pointers.write_ptr,
                read_ptr = pointers.read_ptr,
                "Polled completion flags"
            );

            if writer_done != 0 && reader_done != 0 {
                debug!(polls, elapsed = ?t0.elapsed(), "Hardware signalled completion");
                return Ok(pointers);
            }

            let elapsed = t0.elapsed();
            if elapsed >= self.timeout {
                return Err(SequencerError::Timeout {
                    elapsed,
                    write_ptr: pointers.write_ptr,
                    read_ptr: pointers.read_ptr,
                });
            }

            thread::sleep(self.poll_interval);
        }
    }
}
