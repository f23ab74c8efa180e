//! Error types for the acquisition sequencer.
//!
//! [`SequencerError`] covers every failure mode of one ring-down acquisition,
//! from mapping the hardware windows through extracting the capture. Layout
//! planning has its own [`LayoutError`](crate::layout::LayoutError) and
//! waveform synthesis its own [`WaveformError`](crate::waveform::WaveformError);
//! both convert into `SequencerError` with `?`.
//!
//! ## Severity
//!
//! - **`Mapping`**: resource acquisition failed. Fatal, raised before any
//!   register is touched.
//! - **`IdentityMismatch`**: only raised when strict identity checking is
//!   enabled. By default a mismatch is logged as a warning and the sequence
//!   continues.
//! - **`InvalidState`**: an operation was invoked outside the device state it
//!   requires. This is a programming error.
//! - **`Layout`**: the requested parameters cannot be laid out in memory.
//! - **`Timeout`**: the hardware did not raise both done-flags in time. The
//!   sequence still runs the shutdown path before this reaches the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::device::DeviceState;
use crate::layout::LayoutError;
use crate::waveform::WaveformError;

/// Result type alias for sequencer operations.
pub type Result<T> = std::result::Result<T, SequencerError>;

/// Errors that can occur while driving a ring-down acquisition.
#[derive(Error, Debug)]
pub enum SequencerError {
    /// A hardware window could not be opened or mapped.
    #[error("Failed to map {len:#x} bytes at {base:#010x} from '{path}': {message}")]
    Mapping {
        path: PathBuf,
        base: u64,
        len: usize,
        message: String,
    },

    /// The identity register did not hold the expected constant (strict mode only).
    #[error("FPGA identity mismatch: expected {expected:#010x}, found {found:#010x} ('{label}')")]
    IdentityMismatch {
        expected: u32,
        found: u32,
        label: String,
    },

    /// Operation invoked in the wrong device state.
    #[error("Cannot {operation} while device is {actual}; requires {expected}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: DeviceState,
    },

    /// The memory plan is invalid.
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    /// The stimulus waveform could not be synthesized.
    #[error("Waveform error: {0}")]
    Waveform(#[from] WaveformError),

    /// Both done-flags did not assert within the allotted window.
    #[error("Timeout after {elapsed:?} waiting for DONE (WP={write_ptr:#x}, RP={read_ptr:#x})")]
    Timeout {
        elapsed: Duration,
        write_ptr: u32,
        read_ptr: u32,
    },

    /// Register or buffer access outside the mapped window.
    #[error("Access of {len} bytes at offset {offset:#x} outside {window} window of {size:#x} bytes")]
    Access {
        window: &'static str,
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Hardware resources were already released by `shutdown()`.
    #[error("Hardware resources already released")]
    Released,

    /// The operator declined the confirmation gate.
    #[error("Acquisition aborted by operator")]
    Aborted,

    /// The metadata record failed validation before anything was written.
    #[error("Invalid acquisition metadata: {0}")]
    Metadata(String),

    /// I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SequencerError {
    /// Check if this is a hardware completion timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error was raised by calling an operation in the wrong state.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { .. })
    }

    /// Check if the hardware windows could not be mapped.
    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_carries_pointers() {
        let err = SequencerError::Timeout {
            elapsed: Duration::from_millis(1500),
            write_ptr: 0x1234,
            read_ptr: 0x80,
        };
        let msg = err.to_string();
        assert!(msg.contains("WP=0x1234"));
        assert!(msg.contains("RP=0x80"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = SequencerError::InvalidState {
            operation: "start",
            expected: "CONFIGURED",
            actual: DeviceState::Reset,
        };
        assert_eq!(
            err.to_string(),
            "Cannot start while device is RESET; requires CONFIGURED"
        );
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_layout_error_converts() {
        let err: SequencerError = LayoutError::EmptyWaveform.into();
        assert!(matches!(err, SequencerError::Layout(LayoutError::EmptyWaveform)));
    }
}
