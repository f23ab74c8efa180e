//! Burst-aligned memory planning for the shared stimulus/capture region.
//!
//! The stimulus waveform and the ring-down capture share one physical memory
//! region. The waveform occupies the start of the region, padded to a whole
//! number of DMA bursts, and the capture region begins exactly where the padded
//! waveform ends:
//!
//! ```text
//!  ram_base
//!  │
//!  ▼
//!  ┌──────────────────────┬──────┬──────────────────────────────┬─────────┐
//!  │ waveform samples     │ pad  │ capture (ring-down)          │ unused  │
//!  └──────────────────────┴──────┴──────────────────────────────┴─────────┘
//!  ◄── waveform_byte_length ────►◄──── capture_byte_length ────►
//!                                ▲
//!                                capture_start_offset_relative
//! ```
//!
//! Planning is a pure function: identical [`LayoutParams`] always produce an
//! identical [`MemoryLayout`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Native burst granularity of the capture engine, in samples.
pub const BURST_SAMPLES: usize = 64;

/// Default DMA burst size in bytes.
pub const DEFAULT_BURST_BYTES: usize = 128;

/// Errors produced while planning a memory layout.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    /// The stimulus waveform has no samples.
    #[error("Waveform has no samples")]
    EmptyWaveform,

    /// Sample rate is zero, negative or not finite.
    #[error("Sample rate {0} Hz must be positive and finite")]
    InvalidSampleRate(f64),

    /// A size parameter that must be non-zero was zero.
    #[error("{0} must be non-zero")]
    ZeroSize(&'static str),

    /// The relaxation window produces no whole capture burst.
    #[error("Relaxation window of {relaxation_us} us yields no complete capture burst")]
    EmptyCapture { relaxation_us: u32 },

    /// The capture region runs past the end of physical memory.
    #[error("Capture region ends at offset {end:#x}, beyond memory size {ram_size:#x}")]
    CaptureExceedsMemory { end: u64, ram_size: u64 },

    /// Waveform bytes do not fit the planned stimulus region.
    #[error("Waveform of {len} bytes exceeds the {region}-byte stimulus region")]
    WaveformTooLong { len: u64, region: u64 },

    /// An address or burst count does not fit in a 32-bit register.
    #[error("{what} {value:#x} does not fit in a 32-bit register")]
    RegisterOverflow { what: &'static str, value: u64 },
}

/// Inputs to the layout planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutParams {
    /// Number of samples in the stimulus waveform.
    pub waveform_sample_count: usize,
    /// Bytes per sample.
    pub sample_size: usize,
    /// DMA burst size in bytes.
    pub burst_size_bytes: usize,
    /// Relaxation (capture) window in microseconds.
    pub relaxation_us: u32,
    /// Converter sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Physical base address of the shared memory region.
    pub ram_base: u64,
    /// Size of the shared memory region in bytes.
    pub ram_size: u64,
}

/// Burst-aligned placement of the stimulus and capture regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryLayout {
    /// Stimulus length padded to a whole number of bursts.
    pub waveform_byte_length: u64,
    /// Number of stimulus bursts.
    pub waveform_burst_count: u32,
    /// Absolute physical address of the capture region.
    pub capture_start_offset_absolute: u64,
    /// Capture region offset relative to the memory base.
    pub capture_start_offset_relative: u64,
    /// Number of capture bursts.
    pub capture_burst_count: u32,
    /// Capture length in bytes.
    pub capture_byte_length: u64,
    /// Relaxation samples after rounding up to [`BURST_SAMPLES`].
    pub aligned_relax_samples: u64,
}

impl MemoryLayout {
    /// Relative offset one past the last capture byte.
    pub fn capture_end(&self) -> u64 {
        self.capture_start_offset_relative + self.capture_byte_length
    }

    /// Absolute address of the stimulus region (the memory base).
    pub fn waveform_start_absolute(&self) -> u64 {
        self.capture_start_offset_absolute - self.capture_start_offset_relative
    }
}

/// Round `value` up to the next multiple of `align`, or `None` on overflow.
fn align_up(value: u64, align: u64) -> Option<u64> {
    value.div_ceil(align).checked_mul(align)
}

/// Number of samples covering `relaxation_us` at `sample_rate_hz`, rounded up.
pub fn relax_sample_count(relaxation_us: u32, sample_rate_hz: f64) -> u64 {
    // Multiply before dividing so exact products (e.g. 3000 us at 125 MS/s)
    // are not perturbed by the inexact 1e-6 factor.
    (f64::from(relaxation_us) * sample_rate_hz / 1e6).ceil() as u64
}

/// Compute the burst-aligned memory layout for one acquisition.
///
/// # Errors
///
/// Returns a [`LayoutError`] if the waveform is empty, the sample rate is not
/// positive, a size is zero, the capture region would not fit in memory, or an
/// address does not fit the 32-bit hardware registers.
///
/// # Example
///
/// ```
/// use ringdown_daq::layout::{plan, LayoutParams};
///
/// let layout = plan(&LayoutParams {
///     waveform_sample_count: 125_000,
///     sample_size: 2,
///     burst_size_bytes: 128,
///     relaxation_us: 3000,
///     sample_rate_hz: 125e6,
///     ram_base: 0x0100_0000,
///     ram_size: 4 * 1024 * 1024,
/// })?;
/// assert_eq!(layout.capture_byte_length, 750_080);
/// assert_eq!(layout.capture_burst_count, 5_860);
/// # Ok::<(), ringdown_daq::layout::LayoutError>(())
/// ```
pub fn plan(params: &LayoutParams) -> Result<MemoryLayout, LayoutError> {
    if params.waveform_sample_count == 0 {
        return Err(LayoutError::EmptyWaveform);
    }
    if !(params.sample_rate_hz.is_finite() && params.sample_rate_hz > 0.0) {
        return Err(LayoutError::InvalidSampleRate(params.sample_rate_hz));
    }
    if params.sample_size == 0 {
        return Err(LayoutError::ZeroSize("sample_size"));
    }
    if params.burst_size_bytes == 0 {
        return Err(LayoutError::ZeroSize("burst_size_bytes"));
    }

    let base = to_register("memory base address", params.ram_base)?;
    let sample_size = params.sample_size as u64;
    let burst = params.burst_size_bytes as u64;
    let exceeds = |end: u64| LayoutError::CaptureExceedsMemory {
        end,
        ram_size: params.ram_size,
    };

    let waveform_byte_length = (params.waveform_sample_count as u64)
        .checked_mul(sample_size)
        .and_then(|bytes| align_up(bytes, burst))
        .ok_or_else(|| exceeds(u64::MAX))?;
    let waveform_bursts = waveform_byte_length / burst;

    let raw_relax = relax_sample_count(params.relaxation_us, params.sample_rate_hz);
    let aligned_relax_samples =
        align_up(raw_relax, BURST_SAMPLES as u64).ok_or_else(|| exceeds(u64::MAX))?;
    let capture_byte_length = aligned_relax_samples
        .checked_mul(sample_size)
        .map(|bytes| bytes / burst * burst)
        .ok_or_else(|| exceeds(u64::MAX))?;
    let capture_bursts = capture_byte_length / burst;
    if capture_bursts == 0 {
        return Err(LayoutError::EmptyCapture {
            relaxation_us: params.relaxation_us,
        });
    }

    let capture_end = waveform_byte_length
        .checked_add(capture_byte_length)
        .ok_or_else(|| exceeds(u64::MAX))?;
    if capture_end > params.ram_size {
        return Err(exceeds(capture_end));
    }

    let capture_start = u64::from(base)
        .checked_add(waveform_byte_length)
        .ok_or(LayoutError::RegisterOverflow {
            what: "capture start address",
            value: u64::MAX,
        })?;
    to_register("capture start address", capture_start)?;

    let layout = MemoryLayout {
        waveform_byte_length,
        waveform_burst_count: to_register("waveform burst count", waveform_bursts)?,
        capture_start_offset_absolute: capture_start,
        capture_start_offset_relative: waveform_byte_length,
        capture_burst_count: to_register("capture burst count", capture_bursts)?,
        capture_byte_length,
        aligned_relax_samples,
    };

    Ok(layout)
}

fn to_register(what: &'static str, value: u64) -> Result<u32, LayoutError> {
    u32::try_from(value).map_err(|_| LayoutError::RegisterOverflow { what, value })
}
