//! End-to-end ring-down acquisition.
//!
//! [`Acquisition`] strings the components together in the order the hardware
//! requires:
//!
//! 1. plan the memory layout and synthesize the stimulus (no hardware access)
//! 2. verify identity, reset, upload the waveform, program the registers
//! 3. ask the operator for confirmation
//! 4. release reset, cut the drive after the excitation window
//! 5. wait for completion, extract the capture to disk, write metadata
//!
//! The controller is shut down on every path out of [`Acquisition::run`],
//! successful or not.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::capture::CaptureResult;
use crate::completion::CompletionPointers;
use crate::config::{CompletionMode, RingdownConfig};
use crate::device::{DeviceController, IdentityReport};
use crate::error::{Result, SequencerError};
use crate::hardware::{MemoryRegion, RegisterBus};
use crate::layout::{self, MemoryLayout};
use crate::metadata::{AcquisitionMetadata, MetadataBuilder};
use crate::storage::RawCaptureWriter;
use crate::waveform;

/// Stimulus samples plus the layout they were planned into.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedWaveform {
    /// Quantized DAC codes.
    pub samples: Vec<i16>,
    /// Burst-aligned memory plan.
    pub layout: MemoryLayout,
}

impl PreparedWaveform {
    /// Samples as little-endian bytes, ready for upload.
    pub fn bytes(&self) -> Vec<u8> {
        waveform::to_le_bytes(&self.samples)
    }
}

/// Summary of a completed acquisition.
#[derive(Debug, Clone, Serialize)]
pub struct AcquisitionReport {
    /// Identity check outcome.
    pub identity: IdentityReport,
    /// Memory plan used.
    pub layout: MemoryLayout,
    /// Pointers observed at completion.
    pub pointers: CompletionPointers,
    /// Raw capture file.
    pub raw_path: PathBuf,
    /// Metadata file.
    pub metadata_path: PathBuf,
    /// Bytes written to the raw file.
    pub bytes_written: u64,
}

/// One ring-down acquisition driven by a [`RingdownConfig`].
#[derive(Debug, Clone, Copy)]
pub struct Acquisition<'a> {
    config: &'a RingdownConfig,
}

impl<'a> Acquisition<'a> {
    /// Create an acquisition bound to `config`.
    pub fn new(config: &'a RingdownConfig) -> Self {
        Self { config }
    }

    /// Synthesize the stimulus and plan the memory layout.
    ///
    /// Touches no hardware, so layout errors surface before any register
    /// write.
    pub fn prepare(&self) -> Result<PreparedWaveform> {
        let params = self.config.waveform_params();
        let samples = waveform::synthesize(&params)?;
        let layout = layout::plan(&self.config.layout_params(samples.len()))?;
        info!(
            samples = samples.len(),
            waveform_bytes = layout.waveform_byte_length,
            waveform_bursts = layout.waveform_burst_count,
            relax_samples_aligned = layout.aligned_relax_samples,
            capture_bytes = layout.capture_byte_length,
            capture_bursts = layout.capture_burst_count,
            "Memory layout planned"
        );
        Ok(PreparedWaveform { samples, layout })
    }

    /// Run the full sequence on `controller`, then shut it down.
    ///
    /// `confirm` is called once the device is configured and still held in
    /// reset; returning `false` aborts with [`SequencerError::Aborted`]
    /// without releasing reset.
    pub fn run<R, M, F>(
        &self,
        mut controller: DeviceController<R, M>,
        confirm: F,
    ) -> Result<AcquisitionReport>
    where
        R: RegisterBus,
        M: MemoryRegion,
        F: FnOnce(&MemoryLayout) -> bool,
    {
        let span = info_span!("acquisition", mode = %self.config.excitation.mode);
        let _guard = span.enter();

        let result = self.sequence(&mut controller, confirm);
        if let Err(e) = &result {
            warn!(error = %e, state = %controller.state(), "Acquisition failed; shutting down");
        }
        controller.shutdown();
        result
    }

    /// Run the sequence and keep the capture in memory instead of on disk.
    ///
    /// No confirmation is requested and no files are written.
    pub fn run_in_memory<R, M>(&self, mut controller: DeviceController<R, M>) -> Result<CaptureResult>
    where
        R: RegisterBus,
        M: MemoryRegion,
    {
        let result = self.prepare().and_then(|prepared| {
            let (_, pointers) = self.execute(&mut controller, &prepared, |_| true)?;
            CaptureResult::collect(
                controller.capture(self.config.acquisition.capture_chunk_bytes)?,
                pointers,
            )
        });
        controller.shutdown();
        result
    }

    fn sequence<R, M, F>(
        &self,
        controller: &mut DeviceController<R, M>,
        confirm: F,
    ) -> Result<AcquisitionReport>
    where
        R: RegisterBus,
        M: MemoryRegion,
        F: FnOnce(&MemoryLayout) -> bool,
    {
        let config = self.config;
        let prepared = self.prepare()?;
        let (identity, pointers) = self.execute(controller, &prepared, confirm)?;

        let raw_path = config.raw_path();
        let metadata_path = config.metadata_path();

        let metadata = self.metadata(&prepared, pointers, &raw_path, &metadata_path);
        metadata.validate().map_err(SequencerError::Metadata)?;

        let mut writer = RawCaptureWriter::create(&raw_path)?;
        for chunk in controller.capture(config.acquisition.capture_chunk_bytes)? {
            writer.write_chunk(&chunk?)?;
        }
        let bytes_written = writer.finish()?;

        metadata.write_json(&metadata_path)?;
        info!(path = %metadata_path.display(), "Metadata saved");

        Ok(AcquisitionReport {
            identity,
            layout: prepared.layout,
            pointers,
            raw_path,
            metadata_path,
            bytes_written,
        })
    }

    /// Identity check through completion. Leaves the controller in DONE.
    fn execute<R, M, F>(
        &self,
        controller: &mut DeviceController<R, M>,
        prepared: &PreparedWaveform,
        confirm: F,
    ) -> Result<(IdentityReport, CompletionPointers)>
    where
        R: RegisterBus,
        M: MemoryRegion,
        F: FnOnce(&MemoryLayout) -> bool,
    {
        let acq = &self.config.acquisition;
        let layout = &prepared.layout;

        let identity = controller.verify_identity()?;
        controller.reset()?;
        controller.load_waveform(layout, &prepared.bytes(), acq.waveform_chunk_bytes)?;
        controller.configure(layout, self.config.timing())?;

        if !confirm(layout) {
            info!("Operator declined; measurement not started");
            return Err(SequencerError::Aborted);
        }

        controller.start()?;
        if acq.drive_cutoff {
            controller.force_drive_off()?;
        }
        let pointers = match acq.completion {
            CompletionMode::Poll => {
                controller.wait_for_completion(&self.config.completion_waiter())?
            }
            CompletionMode::Sleep => controller.sleep_for_completion()?,
        };
        Ok((identity, pointers))
    }

    fn metadata(
        &self,
        prepared: &PreparedWaveform,
        pointers: CompletionPointers,
        raw_path: &Path,
        metadata_path: &Path,
    ) -> AcquisitionMetadata {
        MetadataBuilder::new()
            .mode(&self.config.excitation.mode)
            .excitation(&self.config.waveform_params(), prepared.samples.len())
            .timing(self.config.timing())
            .layout(&prepared.layout)
            .pointers(pointers)
            .output_files(raw_path, metadata_path)
            .build()
    }
}
