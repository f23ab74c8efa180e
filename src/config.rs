//! Layered configuration using Figment
//!
//! Configuration is loaded from, in increasing precedence:
//! 1. Built-in defaults ([`RingdownConfig::default`])
//! 2. A TOML file (`config/ringdown.toml` by default; a missing file is skipped)
//! 3. Environment variables prefixed with `RINGDOWN_`, using `__` to separate
//!    sections from keys
//!
//! # Example
//! ```no_run
//! use ringdown_daq::config::RingdownConfig;
//!
//! // RINGDOWN_EXCITATION__FREQUENCY_HZ=4.2e6 overrides the file value
//! let config = RingdownConfig::load()?;
//! println!("Excitation: {} Hz", config.excitation.frequency_hz);
//! # Ok::<(), figment::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::completion::CompletionWaiter;
use crate::device::{ControllerSettings, TimingWindow};
use crate::layout::LayoutParams;
use crate::registers;
use crate::storage;
use crate::waveform::WaveformParams;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/ringdown.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RINGDOWN_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RingdownConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Physical addresses and controller timing
    pub hardware: HardwareConfig,
    /// Stimulus waveform and timing windows
    pub excitation: ExcitationConfig,
    /// Completion detection and extraction
    pub acquisition: AcquisitionConfig,
    /// Output files
    pub output: OutputConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Ring-Down DAQ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Hardware windows and controller behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// Device file exposing physical memory
    pub device_path: PathBuf,
    /// Physical address of the AXI-Lite control window
    pub register_base: u64,
    /// Physical address of the shared stimulus/capture memory
    pub ram_base: u64,
    /// Size of the shared memory in bytes
    pub ram_size: u64,
    /// Bytes per sample
    pub sample_size: usize,
    /// DMA burst size in bytes
    pub burst_bytes: usize,
    /// Expected identity register value
    pub expected_identity: u32,
    /// Abort on identity mismatch instead of warning
    pub strict_identity: bool,
    /// Settling delay after asserting reset, in milliseconds
    pub reset_settle_ms: u64,
    /// Settling delay during shutdown, in milliseconds
    pub shutdown_settle_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from(crate::hardware::mmio::DEV_MEM),
            register_base: 0x4000_0000,
            ram_base: 0x0100_0000,
            ram_size: 4 * 1024 * 1024,
            sample_size: 2,
            burst_bytes: crate::layout::DEFAULT_BURST_BYTES,
            expected_identity: registers::EXPECTED_IDENTITY,
            strict_identity: false,
            reset_settle_ms: 500,
            shutdown_settle_ms: 200,
        }
    }
}

/// Excitation burst and timing windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcitationConfig {
    /// Mode label recorded in metadata
    pub mode: String,
    /// Excitation frequency in Hz
    pub frequency_hz: f64,
    /// Waveform length written to memory, in seconds
    pub duration_s: f64,
    /// Peak drive amplitude in volts
    pub amplitude_pk_v: f64,
    /// DAC full-scale range in volts peak-to-peak
    pub full_scale_v: f64,
    /// DAC resolution in bits
    pub dac_bits: u32,
    /// Converter sample rate in Hz
    pub sample_rate_hz: f64,
    /// Relay-closed drive window in microseconds
    pub excitation_time_us: u32,
    /// Relay-open decay window in microseconds
    pub relaxation_time_us: u32,
}

impl Default for ExcitationConfig {
    fn default() -> Self {
        Self {
            mode: "RINGDOWN".to_string(),
            frequency_hz: 4.5e6,
            duration_s: 0.001,
            amplitude_pk_v: 0.05,
            full_scale_v: 2.0,
            dac_bits: 14,
            sample_rate_hz: 125e6,
            excitation_time_us: 300,
            relaxation_time_us: 3000,
        }
    }
}

/// How the end of the acquisition is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Poll the writer/reader done-flags
    #[default]
    Poll,
    /// Sleep through both timing windows and assume completion
    Sleep,
}

/// Completion detection and extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Completion detection strategy
    pub completion: CompletionMode,
    /// Completion timeout in seconds
    pub timeout_s: f64,
    /// Done-flag poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Zero the waveform once the excitation window has elapsed
    pub drive_cutoff: bool,
    /// Capture extraction chunk size in bytes
    pub capture_chunk_bytes: usize,
    /// Waveform upload chunk size in bytes
    pub waveform_chunk_bytes: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            completion: CompletionMode::Poll,
            timeout_s: 30.0,
            poll_interval_ms: 50,
            drive_cutoff: true,
            capture_chunk_bytes: crate::capture::DEFAULT_CHUNK_BYTES,
            waveform_chunk_bytes: crate::device::DEFAULT_WAVEFORM_CHUNK_BYTES,
        }
    }
}

/// Output file locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving the output files
    pub directory: PathBuf,
    /// Raw capture file name
    pub raw_file: String,
    /// Metadata file name; derived from `raw_file` when unset
    pub metadata_file: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            raw_file: "ringdown_data.raw".to_string(),
            metadata_file: None,
        }
    }
}

impl RingdownConfig {
    /// Load configuration from `config/ringdown.toml` and environment variables
    ///
    /// Example: RINGDOWN_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    /// The layered provider stack, exposed for inspection.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let hw = &self.hardware;
        if hw.sample_size == 0 || hw.burst_bytes == 0 || hw.ram_size == 0 {
            return Err("sample_size, burst_bytes and ram_size must be non-zero".to_string());
        }
        if hw.burst_bytes % hw.sample_size != 0 {
            return Err(format!(
                "burst_bytes {} is not a multiple of sample_size {}",
                hw.burst_bytes, hw.sample_size
            ));
        }
        for (name, base) in [("register_base", hw.register_base), ("ram_base", hw.ram_base)] {
            if base % 4096 != 0 {
                return Err(format!("{name} {base:#x} must be page aligned"));
            }
        }
        let region_end = hw.ram_base.checked_add(hw.ram_size);
        if region_end.map_or(true, |end| end > u64::from(u32::MAX) + 1) {
            return Err(format!(
                "Memory region {:#x}+{:#x} exceeds the 32-bit address registers",
                hw.ram_base, hw.ram_size
            ));
        }

        let ex = &self.excitation;
        if ex.mode.is_empty() {
            return Err("Mode label cannot be empty".to_string());
        }
        for (name, value) in [
            ("frequency_hz", ex.frequency_hz),
            ("duration_s", ex.duration_s),
            ("full_scale_v", ex.full_scale_v),
            ("sample_rate_hz", ex.sample_rate_hz),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }

        let acq = &self.acquisition;
        if !(acq.timeout_s.is_finite() && acq.timeout_s >= 0.0) {
            return Err(format!("Invalid timeout_s {}", acq.timeout_s));
        }
        if acq.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be non-zero".to_string());
        }
        if Duration::from_millis(acq.poll_interval_ms) > self.timeout() {
            return Err(format!(
                "poll_interval_ms {} exceeds timeout_s {}",
                acq.poll_interval_ms, acq.timeout_s
            ));
        }
        if acq.capture_chunk_bytes == 0 || acq.waveform_chunk_bytes == 0 {
            return Err("Chunk sizes must be non-zero".to_string());
        }

        if self.output.raw_file.is_empty() {
            return Err("output.raw_file cannot be empty".to_string());
        }
        Ok(())
    }

    /// Waveform synthesis parameters.
    pub fn waveform_params(&self) -> WaveformParams {
        let ex = &self.excitation;
        WaveformParams {
            frequency_hz: ex.frequency_hz,
            duration_s: ex.duration_s,
            amplitude_pk_v: ex.amplitude_pk_v,
            full_scale_v: ex.full_scale_v,
            dac_bits: ex.dac_bits,
            sample_rate_hz: ex.sample_rate_hz,
        }
    }

    /// Layout planner inputs for a waveform of `waveform_sample_count` samples.
    pub fn layout_params(&self, waveform_sample_count: usize) -> LayoutParams {
        LayoutParams {
            waveform_sample_count,
            sample_size: self.hardware.sample_size,
            burst_size_bytes: self.hardware.burst_bytes,
            relaxation_us: self.excitation.relaxation_time_us,
            sample_rate_hz: self.excitation.sample_rate_hz,
            ram_base: self.hardware.ram_base,
            ram_size: self.hardware.ram_size,
        }
    }

    /// Excitation and relaxation windows.
    pub fn timing(&self) -> TimingWindow {
        TimingWindow {
            excitation_us: self.excitation.excitation_time_us,
            relaxation_us: self.excitation.relaxation_time_us,
        }
    }

    /// Controller settling delays and identity policy.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            reset_settle: Duration::from_millis(self.hardware.reset_settle_ms),
            shutdown_settle: Duration::from_millis(self.hardware.shutdown_settle_ms),
            expected_identity: self.hardware.expected_identity,
            strict_identity: self.hardware.strict_identity,
        }
    }

    /// Completion timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.acquisition.timeout_s).unwrap_or(Duration::MAX)
    }

    /// Done-flag poller.
    pub fn completion_waiter(&self) -> CompletionWaiter {
        CompletionWaiter::new(
            self.timeout(),
            Duration::from_millis(self.acquisition.poll_interval_ms),
        )
    }

    /// Full path of the raw capture file.
    pub fn raw_path(&self) -> PathBuf {
        self.output.directory.join(&self.output.raw_file)
    }

    /// Full path of the metadata file.
    pub fn metadata_path(&self) -> PathBuf {
        match &self.output.metadata_file {
            Some(name) => self.output.directory.join(name),
            None => storage::metadata_path_for(&self.raw_path()),
        }
    }
}
