//! Sine-burst stimulus synthesis.
//!
//! Produces the quantized DAC codes that the stimulus DMA engine streams out
//! during the excitation window:
//!
//! ```text
//! N        = floor(duration_s * sample_rate_hz)
//! dac_max  = 2^(dac_bits - 1) - 1
//! sample_n = trunc(sin(2π f n / fs) * amplitude_pk_v / full_scale_v * dac_max)
//! ```

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by waveform synthesis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaveformError {
    /// A parameter that must be positive and finite was not.
    #[error("{name} must be positive and finite, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    /// Requested amplitude is negative or exceeds full scale.
    #[error("Amplitude {amplitude_pk_v} V outside 0..={full_scale_v} V")]
    AmplitudeOutOfRange { amplitude_pk_v: f64, full_scale_v: f64 },

    /// DAC resolution is not representable in 16-bit samples.
    #[error("DAC resolution of {0} bits unsupported (2..=16)")]
    UnsupportedResolution(u32),

    /// Excitation frequency at or above Nyquist.
    #[error("Frequency {frequency_hz} Hz at or above Nyquist ({nyquist_hz} Hz)")]
    AboveNyquist { frequency_hz: f64, nyquist_hz: f64 },
}

/// Parameters of the excitation burst.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformParams {
    /// Excitation frequency in Hz.
    pub frequency_hz: f64,
    /// Length of the waveform written to memory, in seconds.
    pub duration_s: f64,
    /// Peak drive amplitude in volts.
    pub amplitude_pk_v: f64,
    /// DAC full-scale range in volts peak-to-peak.
    pub full_scale_v: f64,
    /// DAC resolution in bits.
    pub dac_bits: u32,
    /// DAC sample rate in Hz.
    pub sample_rate_hz: f64,
}

impl WaveformParams {
    /// Check the parameters without synthesizing.
    pub fn validate(&self) -> Result<(), WaveformError> {
        for (name, value) in [
            ("frequency_hz", self.frequency_hz),
            ("duration_s", self.duration_s),
            ("full_scale_v", self.full_scale_v),
            ("sample_rate_hz", self.sample_rate_hz),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(WaveformError::NotPositive { name, value });
            }
        }
        if !(self.amplitude_pk_v.is_finite()
            && self.amplitude_pk_v >= 0.0
            && self.amplitude_pk_v <= self.full_scale_v)
        {
            return Err(WaveformError::AmplitudeOutOfRange {
                amplitude_pk_v: self.amplitude_pk_v,
                full_scale_v: self.full_scale_v,
            });
        }
        if !(2..=16).contains(&self.dac_bits) {
            return Err(WaveformError::UnsupportedResolution(self.dac_bits));
        }
        let nyquist_hz = self.sample_rate_hz / 2.0;
        if self.frequency_hz >= nyquist_hz {
            return Err(WaveformError::AboveNyquist {
                frequency_hz: self.frequency_hz,
                nyquist_hz,
            });
        }
        Ok(())
    }

    /// Number of samples the waveform will contain.
    pub fn sample_count(&self) -> usize {
        (self.duration_s * self.sample_rate_hz).floor() as usize
    }

    /// Largest positive DAC code.
    pub fn dac_max(&self) -> f64 {
        f64::from((1u32 << (self.dac_bits - 1)) - 1)
    }
}

/// Synthesize the quantized sine burst.
pub fn synthesize(params: &WaveformParams) -> Result<Vec<i16>, WaveformError> {
    params.validate()?;

    let scale = params.amplitude_pk_v / params.full_scale_v * params.dac_max();
    let step = 2.0 * PI * params.frequency_hz / params.sample_rate_hz;

    Ok((0..params.sample_count())
        .map(|n| ((step * n as f64).sin() * scale) as i16)
        .collect())
}

/// Serialize samples as 16-bit little-endian bytes.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> WaveformParams {
        WaveformParams {
            frequency_hz: 4.5e6,
            duration_s: 0.001,
            amplitude_pk_v: 0.05,
            full_scale_v: 2.0,
            dac_bits: 14,
            sample_rate_hz: 125e6,
        }
    }

    #[test]
    fn test_sample_count_and_peak() {
        let samples = synthesize(&params()).unwrap();
        assert_eq!(samples.len(), 125_000);
        assert_eq!(samples[0], 0);

        // 0.05 / 2.0 * 8191 = 204.775 -> peak code 204
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= 204 && peak >= 200, "peak {peak}");
    }

    #[test]
    fn test_full_scale_quarter_period() {
        // fs/f = 4 samples per period: 0, +max, 0, -max
        let samples = synthesize(&WaveformParams {
            frequency_hz: 1.0,
            duration_s: 1.0,
            amplitude_pk_v: 1.0,
            full_scale_v: 1.0,
            dac_bits: 14,
            sample_rate_hz: 4.0,
        })
        .unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[1], 8191);
        assert_eq!(samples[3], -8191);
        assert!(samples[0].abs() <= 1 && samples[2].abs() <= 1);
    }

    #[test]
    fn test_rejects_invalid_params() {
        let mut p = params();
        p.frequency_hz = 70e6;
        assert!(matches!(synthesize(&p), Err(WaveformError::AboveNyquist { .. })));

        let mut p = params();
        p.amplitude_pk_v = 3.0;
        assert!(matches!(
            synthesize(&p),
            Err(WaveformError::AmplitudeOutOfRange { .. })
        ));

        let mut p = params();
        p.dac_bits = 17;
        assert_eq!(synthesize(&p), Err(WaveformError::UnsupportedResolution(17)));

        let mut p = params();
        p.duration_s = f64::NAN;
        assert!(matches!(
            synthesize(&p),
            Err(WaveformError::NotPositive { name: "duration_s", .. })
        ));
    }

    #[test]
    fn test_le_bytes() {
        assert_eq!(to_le_bytes(&[1, -2, 0x1234]), vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }
}
