//! # Ring-Down DAQ
//!
//! Acquisition sequencer for a hardware-timed ring-down experiment on an
//! FPGA-attached data converter. The FPGA drives a sine burst into a resonator
//! for a fixed excitation window, opens a relay, and records the free decay
//! into memory shared with the stimulus waveform. This crate plans that memory,
//! programs the FPGA, waits for completion and extracts the capture.
//!
//! ## Crate Structure
//!
//! - **`registers`**: Named offsets of the AXI-Lite control registers.
//! - **`layout`**: Pure, burst-aligned memory planning (`plan`).
//! - **`waveform`**: Quantized sine-burst synthesis.
//! - **`hardware`**: `RegisterBus`/`MemoryRegion` traits, the `/dev/mem`
//!   backend (`MmioRegion`) and mocks for tests.
//! - **`device`**: `DeviceController`, the state machine that owns the
//!   hardware windows for one acquisition.
//! - **`completion`**: `CompletionWaiter`, bounded polling of the done-flags.
//! - **`capture`**: `CaptureExtractor`, chunked read-back of the capture.
//! - **`storage`** / **`metadata`**: Raw capture file and JSON metadata.
//! - **`acquisition`**: The end-to-end sequence with guaranteed shutdown.
//! - **`config`**: Layered Figment configuration.
//! - **`tracing_setup`**: Subscriber initialization for the binary.
//! - **`error`**: `SequencerError` and the crate `Result` alias.
//!
//! ## Example
//!
//! ```
//! use ringdown_daq::config::RingdownConfig;
//! use ringdown_daq::acquisition::Acquisition;
//! use ringdown_daq::device::{ControllerSettings, DeviceController};
//! use ringdown_daq::hardware::mock::{MockMemory, MockRegisters};
//! use std::time::Duration;
//!
//! let config = RingdownConfig::default();
//! let settings = ControllerSettings {
//!     reset_settle: Duration::ZERO,
//!     shutdown_settle: Duration::ZERO,
//!     ..config.controller_settings()
//! };
//! let controller = DeviceController::from_parts(
//!     MockRegisters::new(),
//!     MockMemory::new(config.hardware.ram_size as usize),
//!     settings,
//! );
//!
//! let capture = Acquisition::new(&config).run_in_memory(controller)?;
//! assert_eq!(capture.len(), 750_080);
//! # Ok::<(), ringdown_daq::SequencerError>(())
//! ```

pub mod acquisition;
pub mod capture;
pub mod completion;
pub mod config;
pub mod device;
pub mod error;
pub mod hardware;
pub mod layout;
pub mod metadata;
pub mod registers;
pub mod storage;
pub mod tracing_setup;
pub mod waveform;

pub use acquisition::{Acquisition, AcquisitionReport};
pub use device::{DeviceController, DeviceState, TimingWindow};
pub use error::{Result, SequencerError};
pub use layout::{plan, LayoutParams, MemoryLayout};
