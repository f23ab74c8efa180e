//! Acquisition metadata written next to the raw capture.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::completion::CompletionPointers;
use crate::device::TimingWindow;
use crate::error::Result;
use crate::layout::MemoryLayout;
use crate::waveform::WaveformParams;

/// Timestamp format used in the metadata record.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Describes one ring-down acquisition for downstream analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcquisitionMetadata {
    /// Mode label.
    pub mode: String,
    /// Excitation frequency in Hz.
    pub excitation_frequency_hz: f64,
    /// Peak drive amplitude in volts.
    pub amplitude_peak_v: f64,
    /// Excitation window in microseconds.
    pub excitation_time_us: u32,
    /// Relaxation window in microseconds.
    pub relaxation_time_us: u32,
    /// Converter sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Samples in the stimulus waveform.
    pub waveform_samples: usize,
    /// Burst-aligned stimulus length in bytes.
    pub waveform_bytes: u64,
    /// Stimulus bursts.
    pub waveform_bursts: u32,
    /// Capture length in bytes.
    pub capture_bytes: u64,
    /// Capture bursts.
    pub capture_bursts: u32,
    /// Capture region offset relative to the memory base.
    pub capture_start_offset_rel: u64,
    /// Relaxation samples after alignment.
    pub relax_samples_aligned: u64,
    /// Stimulus engine pointer at completion.
    pub final_write_ptr: u32,
    /// Capture engine pointer at completion.
    pub final_read_ptr: u32,
    /// Raw capture file name.
    pub raw_output_file: String,
    /// This metadata file name.
    pub json_output_file: String,
    /// Local acquisition time.
    pub timestamp: String,
    /// Version of the acquisition software.
    pub software_version: String,
}

impl Default for AcquisitionMetadata {
    fn default() -> Self {
        Self {
            mode: "RINGDOWN".to_string(),
            excitation_frequency_hz: 0.0,
            amplitude_peak_v: 0.0,
            excitation_time_us: 0,
            relaxation_time_us: 0,
            sample_rate_hz: 0.0,
            waveform_samples: 0,
            waveform_bytes: 0,
            waveform_bursts: 0,
            capture_bytes: 0,
            capture_bursts: 0,
            capture_start_offset_rel: 0,
            relax_samples_aligned: 0,
            final_write_ptr: 0,
            final_read_ptr: 0,
            raw_output_file: String::new(),
            json_output_file: String::new(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// A builder for constructing [`AcquisitionMetadata`] instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: AcquisitionMetadata,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: &str) -> Self {
        self.inner.mode = mode.to_string();
        self
    }

    pub fn excitation(mut self, params: &WaveformParams, waveform_samples: usize) -> Self {
        self.inner.excitation_frequency_hz = params.frequency_hz;
        self.inner.amplitude_peak_v = params.amplitude_pk_v;
        self.inner.sample_rate_hz = params.sample_rate_hz;
        self.inner.waveform_samples = waveform_samples;
        self
    }

    pub fn timing(mut self, timing: TimingWindow) -> Self {
        self.inner.excitation_time_us = timing.excitation_us;
        self.inner.relaxation_time_us = timing.relaxation_us;
        self
    }

    pub fn layout(mut self, layout: &MemoryLayout) -> Self {
        self.inner.waveform_bytes = layout.waveform_byte_length;
        self.inner.waveform_bursts = layout.waveform_burst_count;
        self.inner.capture_bytes = layout.capture_byte_length;
        self.inner.capture_bursts = layout.capture_burst_count;
        self.inner.capture_start_offset_rel = layout.capture_start_offset_relative;
        self.inner.relax_samples_aligned = layout.aligned_relax_samples;
        self
    }

    pub fn pointers(mut self, pointers: CompletionPointers) -> Self {
        self.inner.final_write_ptr = pointers.write_ptr;
        self.inner.final_read_ptr = pointers.read_ptr;
        self
    }

    /// Record the output file names; directories are dropped.
    pub fn output_files(mut self, raw: &Path, json: &Path) -> Self {
        self.inner.raw_output_file = file_name(raw);
        self.inner.json_output_file = file_name(json);
        self
    }

    pub fn build(self) -> AcquisitionMetadata {
        self.inner
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl AcquisitionMetadata {
    /// Check the record before it is written alongside a capture.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.mode.is_empty() {
            return Err("Mode label cannot be empty".to_string());
        }
        if self.raw_output_file.is_empty() || self.json_output_file.is_empty() {
            return Err("Output file names must be set".to_string());
        }
        if self.raw_output_file == self.json_output_file {
            return Err(format!(
                "Metadata file '{}' would overwrite the raw capture",
                self.json_output_file
            ));
        }
        if self.capture_bursts == 0 || self.waveform_samples == 0 {
            return Err("Layout fields are not populated".to_string());
        }
        Ok(())
    }

    /// Write the record as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Read a record written by [`write_json`](Self::write_json).
    pub fn read_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{plan, LayoutParams};

    fn layout() -> MemoryLayout {
        plan(&LayoutParams {
            waveform_sample_count: 125_000,
            sample_size: 2,
            burst_size_bytes: 128,
            relaxation_us: 3000,
            sample_rate_hz: 125e6,
            ram_base: 0x0100_0000,
            ram_size: 4 * 1024 * 1024,
        })
        .unwrap()
    }

    #[test]
    fn test_builder_fills_layout_fields() {
        let meta = MetadataBuilder::new()
            .layout(&layout())
            .timing(TimingWindow {
                excitation_us: 300,
                relaxation_us: 3000,
            })
            .pointers(CompletionPointers {
                write_ptr: 1,
                read_ptr: 2,
            })
            .build();
        assert_eq!(meta.mode, "RINGDOWN");
        assert_eq!(meta.waveform_bytes, 250_112);
        assert_eq!(meta.capture_bytes, 750_080);
        assert_eq!(meta.capture_bursts, 5_860);
        assert_eq!(meta.capture_start_offset_rel, 250_112);
        assert_eq!(meta.relax_samples_aligned, 375_040);
        assert_eq!(meta.relaxation_time_us, 3000);
        assert_eq!(meta.final_read_ptr, 2);
    }

    #[test]
    fn test_timestamp_format() {
        let meta = AcquisitionMetadata::default();
        assert!(chrono::NaiveDateTime::parse_from_str(&meta.timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    fn complete() -> MetadataBuilder {
        MetadataBuilder::new()
            .layout(&layout())
            .excitation(
                &WaveformParams {
                    frequency_hz: 4.5e6,
                    duration_s: 0.001,
                    amplitude_pk_v: 0.1,
                    full_scale_v: 1.0,
                    dac_bits: 14,
                    sample_rate_hz: 125e6,
                },
                125_000,
            )
            .output_files(Path::new("a.raw"), Path::new("a.json"))
    }

    #[test]
    fn test_validate() {
        assert!(AcquisitionMetadata::default().validate().is_err());
        assert!(complete().build().validate().is_ok());
        assert!(complete().mode("").build().validate().is_err());
        assert!(MetadataBuilder::new()
            .output_files(Path::new("a.raw"), Path::new("a.json"))
            .build()
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_colliding_file_names() {
        let err = complete()
            .output_files(Path::new("out/a.raw"), Path::new("out/a.raw"))
            .build()
            .validate()
            .unwrap_err();
        assert!(err.contains("overwrite"));
    }

    #[test]
    fn test_output_files_store_names_only() {
        let meta = MetadataBuilder::new()
            .output_files(
                Path::new("/tmp/run/ringdown_data.raw"),
                Path::new("/tmp/run/ringdown_data.json"),
            )
            .build();
        assert_eq!(meta.raw_output_file, "ringdown_data.raw");
        assert_eq!(meta.json_output_file, "ringdown_data.json");
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ringdown_data.json");
        let meta = MetadataBuilder::new().mode("RINGDOWN").layout(&layout()).build();
        meta.write_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"capture_bursts\": 5860"));
        assert_eq!(AcquisitionMetadata::read_json(&path).unwrap(), meta);
    }
}
