//! Ring-down device controller.
//!
//! [`DeviceController`] owns the register and memory windows for the lifetime
//! of one acquisition and is the only component that writes hardware
//! registers. It walks the device through a fixed state machine:
//!
//! ```text
//!            reset()          configure()           start()
//!   ┌───────┐ ───► ┌───────┐ ─────────► ┌────────────┐ ─────► ┌─────────┐
//!   │ open  │      │ RESET │            │ CONFIGURED │        │ RUNNING │
//!   └───────┘      └───────┘ ◄───────── └────────────┘        └─────────┘
//!                      ▲       reset()                             │ wait / timeout
//!                      │                                           ▼
//!   ┌──────┐  shutdown()│(from any state)                    ┌──────┐
//!   │ IDLE │ ◄──────────┴─────────────────────────────────── │ DONE │
//!   └──────┘                                                  └──────┘
//! ```
//!
//! Resources are released by [`DeviceController::shutdown`], which is safe to
//! call from any state and more than once. Dropping a controller that was not
//! shut down runs the same sequence.

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{self, CaptureExtractor};
use crate::completion::{CompletionPointers, CompletionWaiter};
use crate::error::{Result, SequencerError};
use crate::hardware::{MemoryRegion, MmioRegion, RegisterBus};
use crate::layout::{LayoutError, MemoryLayout};
use crate::registers;

/// Size of the AXI-Lite control window mapped by [`DeviceController::open`].
pub const REGISTER_WINDOW_SIZE: usize = 0x1000;

/// Default settling delay after asserting reset.
pub const DEFAULT_RESET_SETTLE: Duration = Duration::from_millis(500);

/// Default settling delay during shutdown.
pub const DEFAULT_SHUTDOWN_SETTLE: Duration = Duration::from_millis(200);

/// Default chunk size for waveform uploads (1 MiB).
pub const DEFAULT_WAVEFORM_CHUNK_BYTES: usize = 1024 * 1024;

/// Lifecycle state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// Held in reset, registers cleared.
    Reset,
    /// Registers programmed, still held in reset.
    Configured,
    /// Reset released; the FPGA is running the sequence.
    Running,
    /// Completion observed, or a timeout declared.
    Done,
    /// Shut down; resources released.
    Idle,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "RESET"),
            Self::Configured => write!(f, "CONFIGURED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Done => write!(f, "DONE"),
            Self::Idle => write!(f, "IDLE"),
        }
    }
}

/// Excitation and relaxation windows, in microseconds.
///
/// Both values are written verbatim into the FPGA timing registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimingWindow {
    /// Relay closed, drive applied.
    pub excitation_us: u32,
    /// Relay open, free decay recorded.
    pub relaxation_us: u32,
}

impl TimingWindow {
    /// Excitation window as a [`Duration`].
    pub fn excitation(&self) -> Duration {
        Duration::from_micros(u64::from(self.excitation_us))
    }

    /// Relaxation window as a [`Duration`].
    pub fn relaxation(&self) -> Duration {
        Duration::from_micros(u64::from(self.relaxation_us))
    }

    /// Excitation plus relaxation.
    pub fn total(&self) -> Duration {
        self.excitation() + self.relaxation()
    }
}

/// Controller behaviour that is not part of the memory plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Delay after asserting reset in [`DeviceController::reset`].
    pub reset_settle: Duration,
    /// Delay after reasserting reset in [`DeviceController::shutdown`].
    pub shutdown_settle: Duration,
    /// Value expected in the identity register.
    pub expected_identity: u32,
    /// Treat an identity mismatch as fatal.
    pub strict_identity: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            reset_settle: DEFAULT_RESET_SETTLE,
            shutdown_settle: DEFAULT_SHUTDOWN_SETTLE,
            expected_identity: registers::EXPECTED_IDENTITY,
            strict_identity: false,
        }
    }
}

/// Outcome of the identity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityReport {
    /// Raw identity register value.
    pub raw: u32,
    /// Decoded four-character label.
    pub label: String,
    /// Whether the value matched the expected constant.
    pub matched: bool,
}

struct Hardware<R, M> {
    registers: R,
    memory: M,
}

/// Parameters captured by `configure` for the later phases.
#[derive(Debug, Clone, Copy)]
struct Armed {
    layout: MemoryLayout,
    timing: TimingWindow,
}

/// Owner of the ring-down hardware for one acquisition.
pub struct DeviceController<R: RegisterBus, M: MemoryRegion> {
    hw: Option<Hardware<R, M>>,
    state: DeviceState,
    settings: ControllerSettings,
    armed: Option<Armed>,
    started_at: Option<Instant>,
}

impl DeviceController<MmioRegion, MmioRegion> {
    /// Map the control window and the shared memory region.
    ///
    /// # Arguments
    ///
    /// * `device_path` - Device file exposing physical memory, e.g. `/dev/mem`
    /// * `register_base` - Physical address of the AXI-Lite control window
    /// * `buffer_base` - Physical address of the shared memory region
    /// * `buffer_size` - Size of the shared memory region in bytes
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Mapping`] if either window cannot be mapped.
    /// Nothing is written to the hardware in that case, and a register window
    /// mapped before the failure is released.
    pub fn open(
        device_path: &Path,
        register_base: u64,
        buffer_base: u64,
        buffer_size: usize,
        settings: ControllerSettings,
    ) -> Result<Self> {
        info!(path = %device_path.display(), "Mapping FPGA memory regions");
        let registers = MmioRegion::map(device_path, register_base, REGISTER_WINDOW_SIZE)?;
        let memory = MmioRegion::map(device_path, buffer_base, buffer_size)?;
        Ok(Self::from_parts(registers, memory, settings))
    }
}

impl<R: RegisterBus, M: MemoryRegion> DeviceController<R, M> {
    /// Wrap already-acquired register and memory windows.
    pub fn from_parts(registers: R, memory: M, settings: ControllerSettings) -> Self {
        Self {
            hw: Some(Hardware { registers, memory }),
            state: DeviceState::Reset,
            settings,
            armed: None,
            started_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Controller settings.
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Layout programmed by the last `configure`, if any.
    pub fn layout(&self) -> Option<&MemoryLayout> {
        self.armed.as_ref().map(|a| &a.layout)
    }

    /// Whether `shutdown` has released the hardware windows.
    pub fn is_released(&self) -> bool {
        self.hw.is_none()
    }

    /// Size of the shared memory region, or `None` once released.
    pub fn memory_size(&self) -> Option<usize> {
        self.hw.as_ref().map(|hw| hw.memory.size())
    }

    fn hw(&self) -> Result<&Hardware<R, M>> {
        self.hw.as_ref().ok_or(SequencerError::Released)
    }

    fn hw_mut(&mut self) -> Result<&mut Hardware<R, M>> {
        self.hw.as_mut().ok_or(SequencerError::Released)
    }

    fn require(&self, operation: &'static str, allowed: &[DeviceState]) -> Result<()> {
        if self.hw.is_none() {
            return Err(SequencerError::Released);
        }
        if allowed.contains(&self.state) {
            return Ok(());
        }
        let expected = match allowed {
            [DeviceState::Reset] => "RESET",
            [DeviceState::Configured] => "CONFIGURED",
            [DeviceState::Running] => "RUNNING",
            [DeviceState::Done] => "DONE",
            _ => "RESET or CONFIGURED",
        };
        Err(SequencerError::InvalidState {
            operation,
            expected,
            actual: self.state,
        })
    }

    fn armed(&self) -> Result<Armed> {
        self.armed.ok_or(SequencerError::InvalidState {
            operation: "use layout",
            expected: "CONFIGURED",
            actual: self.state,
        })
    }

    fn write(&mut self, offset: usize, value: u32) -> Result<()> {
        self.hw_mut()?.registers.write_register(offset, value)
    }

    /// Read the identity register and compare it with the expected constant.
    ///
    /// A mismatch is logged as a warning and reported in the returned
    /// [`IdentityReport`]; the device may still be a compatible revision.
    ///
    /// # Errors
    ///
    /// With `strict_identity` set, a mismatch is returned as
    /// [`SequencerError::IdentityMismatch`].
    pub fn verify_identity(&self) -> Result<IdentityReport> {
        let raw = self.hw()?.registers.read_register(registers::MLA_CONST)?;
        let label = registers::identity_label(raw);
        let expected = self.settings.expected_identity;
        let matched = raw == expected;

        if matched {
            info!(identity = %label, "Device identity confirmed");
        } else {
            warn!(
                identity = %label,
                raw = %format!("{raw:#010x}"),
                expected = %format!("{expected:#010x}"),
                "Unrecognized FPGA identity constant; assuming compatible ring-down bitstream"
            );
            if self.settings.strict_identity {
                return Err(SequencerError::IdentityMismatch {
                    expected,
                    found: raw,
                    label,
                });
            }
        }

        Ok(IdentityReport {
            raw,
            label,
            matched,
        })
    }

    /// Assert reset and clear the address, burst-count, timing, relay and
    /// continuous-mode registers, then wait the reset settling delay.
    pub fn reset(&mut self) -> Result<()> {
        if self.hw.is_none() {
            return Err(SequencerError::Released);
        }
        info!(from = %self.state, "Resetting device and clearing configuration");

        self.write(registers::SOFT_RESET, 1)?;
        for offset in [
            registers::WRITER_MIN_ADDRESS,
            registers::WRITER_NUM_BURSTS,
            registers::READER_MIN_ADDRESS,
            registers::READER_NUM_BURSTS,
            registers::RELAXATION_TIME,
            registers::EXCITATION_TIME,
            registers::RELAY_ENABLED,
            registers::READER_CONTINUOUS_MODE,
            registers::WRITER_CONTINUOUS_MODE,
        ] {
            self.write(offset, 0)?;
        }
        settle(self.settings.reset_settle);

        self.state = DeviceState::Reset;
        self.armed = None;
        self.started_at = None;
        debug!("Device reset complete");
        Ok(())
    }

    /// Upload the stimulus waveform to the start of the shared region.
    ///
    /// The bytes are written in chunks of `chunk_size` (zero selects
    /// [`DEFAULT_WAVEFORM_CHUNK_BYTES`]) and the remainder of the burst-aligned
    /// waveform region is zeroed.
    ///
    /// # Errors
    ///
    /// Fails outside RESET/CONFIGURED, or with a [`LayoutError`] if the
    /// waveform is longer than the planned waveform region.
    pub fn load_waveform(
        &mut self,
        layout: &MemoryLayout,
        waveform: &[u8],
        chunk_size: usize,
    ) -> Result<()> {
        self.require("load waveform", &[DeviceState::Reset, DeviceState::Configured])?;

        let region = usize::try_from(layout.waveform_byte_length).map_err(|_| {
            LayoutError::RegisterOverflow {
                what: "waveform length",
                value: layout.waveform_byte_length,
            }
        })?;
        if waveform.len() > region {
            return Err(LayoutError::WaveformTooLong {
                len: waveform.len() as u64,
                region: layout.waveform_byte_length,
            }
            .into());
        }

        let chunk_size = if chunk_size == 0 {
            DEFAULT_WAVEFORM_CHUNK_BYTES
        } else {
            chunk_size
        };
        let memory = &mut self.hw_mut()?.memory;
        for (i, chunk) in waveform.chunks(chunk_size).enumerate() {
            memory.write_bytes(i * chunk_size, chunk)?;
        }
        memory.write_bytes(waveform.len(), &vec![0; region - waveform.len()])?;

        info!(
            bytes = waveform.len(),
            padded = region,
            bursts = layout.waveform_burst_count,
            "Excitation waveform written"
        );
        Ok(())
    }

    /// Program the stimulus/capture DMA engines, the timing windows, and the
    /// relay, continuous-mode and trigger registers.
    ///
    /// # Errors
    ///
    /// Fails with [`SequencerError::InvalidState`] unless the device is in
    /// RESET, or with a [`LayoutError`] if the layout does not fit the mapped
    /// memory or the registers. Both checks happen before any register write.
    pub fn configure(&mut self, layout: &MemoryLayout, timing: TimingWindow) -> Result<()> {
        self.require("configure", &[DeviceState::Reset])?;

        let memory_size = self.hw()?.memory.size() as u64;
        if layout.capture_end() > memory_size {
            return Err(LayoutError::CaptureExceedsMemory {
                end: layout.capture_end(),
                ram_size: memory_size,
            }
            .into());
        }
        let waveform_addr = register_value("memory base address", layout.waveform_start_absolute())?;
        let capture_addr =
            register_value("capture start address", layout.capture_start_offset_absolute)?;

        self.write(registers::WRITER_MIN_ADDRESS, waveform_addr)?;
        self.write(registers::WRITER_NUM_BURSTS, layout.waveform_burst_count)?;
        self.write(registers::READER_MIN_ADDRESS, capture_addr)?;
        self.write(registers::READER_NUM_BURSTS, layout.capture_burst_count)?;
        self.write(registers::EXCITATION_TIME, timing.excitation_us)?;
        self.write(registers::RELAXATION_TIME, timing.relaxation_us)?;
        self.write(registers::RELAY_ENABLED, 1)?;
        self.write(registers::READER_CONTINUOUS_MODE, 0)?;
        self.write(registers::WRITER_CONTINUOUS_MODE, 0)?;
        self.write(registers::TRIGGER_ENABLED, 0)?;

        info!(
            waveform_bursts = layout.waveform_burst_count,
            capture_addr = %format!("{capture_addr:#010x}"),
            capture_bursts = layout.capture_burst_count,
            excitation_us = timing.excitation_us,
            relaxation_us = timing.relaxation_us,
            "FPGA ring-down registers configured"
        );

        self.armed = Some(Armed {
            layout: *layout,
            timing,
        });
        self.state = DeviceState::Configured;
        Ok(())
    }

    /// Release reset. The FPGA starts driving the excitation burst.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[DeviceState::Configured])?;
        self.write(registers::SOFT_RESET, 0)?;
        self.started_at = Some(Instant::now());
        self.state = DeviceState::Running;
        info!("Measurement started; FPGA running");
        Ok(())
    }

    /// Zero the waveform region so the DAC output drops to zero.
    ///
    /// Waits until the excitation window has elapsed since [`start`](Self::start)
    /// before overwriting the samples.
    pub fn force_drive_off(&mut self) -> Result<()> {
        self.require("force drive off", &[DeviceState::Running])?;
        let armed = self.armed()?;

        if let Some(started_at) = self.started_at {
            let remaining = armed.timing.excitation().saturating_sub(started_at.elapsed());
            settle(remaining);
        }

        let len = armed.layout.waveform_byte_length as usize;
        self.hw_mut()?.memory.write_bytes(0, &vec![0; len])?;
        debug!(bytes = len, "Drive forced off");
        Ok(())
    }

    /// Poll the done-flags until both assert or the waiter times out.
    ///
    /// The device is DONE afterwards in either case.
    pub fn wait_for_completion(&mut self, waiter: &CompletionWaiter) -> Result<CompletionPointers> {
        self.require("wait for completion", &[DeviceState::Running])?;
        let result = waiter.wait(&self.hw()?.registers);
        self.state = DeviceState::Done;
        match &result {
            Ok(pointers) => info!(
                write_ptr = pointers.write_ptr,
                read_ptr = pointers.read_ptr,
                "Ring-down capture complete"
            ),
            Err(e) => warn!(error = %e, "Completion not observed"),
        }
        result
    }

    /// Sleep through the excitation and relaxation windows and assume the
    /// capture is complete, without reading the done-flags.
    ///
    /// For bitstreams whose done-flags are not wired. The pointers are sampled
    /// once at the end for diagnostics.
    pub fn sleep_for_completion(&mut self) -> Result<CompletionPointers> {
        self.require("sleep for completion", &[DeviceState::Running])?;
        let armed = self.armed()?;
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        settle(armed.timing.total().saturating_sub(elapsed));

        let pointers = CompletionPointers::read(&self.hw()?.registers)?;
        self.state = DeviceState::Done;
        info!(
            write_ptr = pointers.write_ptr,
            read_ptr = pointers.read_ptr,
            "Timing windows elapsed; assuming ring-down capture complete"
        );
        Ok(pointers)
    }

    /// Start extracting the capture region in chunks of `chunk_size` bytes.
    pub fn capture(&self, chunk_size: usize) -> Result<CaptureExtractor<'_, M>> {
        self.require("extract capture", &[DeviceState::Done])?;
        let layout = self.armed()?.layout;
        Ok(capture::extract(
            &self.hw()?.memory,
            layout.capture_start_offset_relative as usize,
            layout.capture_byte_length as usize,
            chunk_size,
        ))
    }

    /// Read every register in the map, in address order.
    pub fn snapshot(&self) -> Result<Vec<(&'static str, u32)>> {
        let hw = self.hw()?;
        registers::ALL
            .iter()
            .map(|&(name, offset)| Ok((name, hw.registers.read_register(offset)?)))
            .collect()
    }

    /// Return the device to a safe idle state and release the hardware windows.
    ///
    /// Reasserts reset, clears the relay and continuous-mode flags, waits the
    /// shutdown settling delay, then drops both windows. Register write
    /// failures are logged and do not stop the release. Calling this again is
    /// a no-op; the state is IDLE afterwards either way.
    pub fn shutdown(&mut self) {
        if let Some(mut hw) = self.hw.take() {
            info!(from = %self.state, "Resetting FPGA to safe idle state");
            for (offset, value) in [
                (registers::SOFT_RESET, 1),
                (registers::RELAY_ENABLED, 0),
                (registers::READER_CONTINUOUS_MODE, 0),
                (registers::WRITER_CONTINUOUS_MODE, 0),
            ] {
                if let Err(e) = hw.registers.write_register(offset, value) {
                    warn!(register = registers::name(offset), error = %e, "Shutdown write failed");
                }
            }
            self.state = DeviceState::Reset;
            settle(self.settings.shutdown_settle);
            drop(hw);
            info!("FPGA interface closed");
        }
        self.armed = None;
        self.started_at = None;
        self.state = DeviceState::Idle;
    }
}

impl<R: RegisterBus, M: MemoryRegion> Drop for DeviceController<R, M> {
    fn drop(&mut self) {
        if self.hw.is_some() {
            warn!(state = %self.state, "Device controller dropped without shutdown");
            self.shutdown();
        }
    }
}

impl<R: RegisterBus, M: MemoryRegion> fmt::Debug for DeviceController<R, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceController")
            .field("state", &self.state)
            .field("released", &self.hw.is_none())
            .field("layout", &self.armed.map(|a| a.layout))
            .finish()
    }
}

fn register_value(what: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| LayoutError::RegisterOverflow { what, value }.into())
}

fn settle(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockMemory, MockRegisters};
    use crate::layout::{plan, LayoutParams};

    fn fast() -> ControllerSettings {
        ControllerSettings {
            reset_settle: Duration::ZERO,
            shutdown_settle: Duration::ZERO,
            ..Default::default()
        }
    }

    fn layout() -> MemoryLayout {
        plan(&LayoutParams {
            waveform_sample_count: 1000,
            sample_size: 2,
            burst_size_bytes: 128,
            relaxation_us: 10,
            sample_rate_hz: 125e6,
            ram_base: 0x0100_0000,
            ram_size: 64 * 1024,
        })
        .unwrap()
    }

    const TIMING: TimingWindow = TimingWindow {
        excitation_us: 300,
        relaxation_us: 10,
    };

    fn controller() -> (
        DeviceController<MockRegisters, MockMemory>,
        MockRegisters,
        MockMemory,
    ) {
        let regs = MockRegisters::new();
        let mem = MockMemory::new(64 * 1024);
        let ctl = DeviceController::from_parts(regs.clone(), mem.clone(), fast());
        (ctl, regs, mem)
    }

    #[test]
    fn test_device_state_display() {
        assert_eq!(DeviceState::Configured.to_string(), "CONFIGURED");
        assert_eq!(DeviceState::Idle.to_string(), "IDLE");
    }

    #[test]
    fn test_reset_clears_registers() {
        let (mut ctl, regs, _) = controller();
        ctl.reset().unwrap();
        assert_eq!(regs.writes_to(registers::SOFT_RESET), vec![1]);
        for offset in [
            registers::WRITER_MIN_ADDRESS,
            registers::WRITER_NUM_BURSTS,
            registers::READER_MIN_ADDRESS,
            registers::READER_NUM_BURSTS,
            registers::RELAXATION_TIME,
            registers::EXCITATION_TIME,
            registers::RELAY_ENABLED,
            registers::READER_CONTINUOUS_MODE,
            registers::WRITER_CONTINUOUS_MODE,
        ] {
            assert_eq!(regs.writes_to(offset), vec![0], "{:?}", registers::name(offset));
        }
        assert_eq!(ctl.state(), DeviceState::Reset);
    }

    #[test]
    fn test_configure_programs_registers() {
        let (mut ctl, regs, _) = controller();
        let layout = layout();
        ctl.reset().unwrap();
        ctl.configure(&layout, TIMING).unwrap();

        assert_eq!(ctl.state(), DeviceState::Configured);
        assert_eq!(regs.value(registers::WRITER_MIN_ADDRESS), 0x0100_0000);
        assert_eq!(regs.value(registers::WRITER_NUM_BURSTS), layout.waveform_burst_count);
        assert_eq!(
            u64::from(regs.value(registers::READER_MIN_ADDRESS)),
            layout.capture_start_offset_absolute
        );
        assert_eq!(regs.value(registers::READER_NUM_BURSTS), layout.capture_burst_count);
        assert_eq!(regs.value(registers::EXCITATION_TIME), 300);
        assert_eq!(regs.value(registers::RELAXATION_TIME), 10);
        assert_eq!(regs.value(registers::RELAY_ENABLED), 1);
        assert_eq!(regs.writes_to(registers::TRIGGER_ENABLED), vec![0]);
        // Still held in reset.
        assert_eq!(regs.value(registers::SOFT_RESET), 1);
    }

    #[test]
    fn test_configure_requires_reset_state() {
        let (mut ctl, _, _) = controller();
        let layout = layout();
        ctl.configure(&layout, TIMING).unwrap();
        let err = ctl.configure(&layout, TIMING).unwrap_err();
        assert!(err.is_invalid_state());

        ctl.start().unwrap();
        assert!(ctl.configure(&layout, TIMING).unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_start_requires_configured() {
        let (mut ctl, regs, _) = controller();
        let err = ctl.start().unwrap_err();
        assert!(matches!(
            err,
            SequencerError::InvalidState {
                operation: "start",
                actual: DeviceState::Reset,
                ..
            }
        ));
        assert!(regs.writes_to(registers::SOFT_RESET).is_empty());

        ctl.configure(&layout(), TIMING).unwrap();
        ctl.start().unwrap();
        assert_eq!(ctl.state(), DeviceState::Running);
        assert!(regs.is_running());
        assert!(ctl.start().unwrap_err().is_invalid_state());
    }

    #[test]
    fn test_configure_rejects_layout_beyond_memory_before_writing() {
        let regs = MockRegisters::new();
        let mut ctl = DeviceController::from_parts(regs.clone(), MockMemory::new(1024), fast());
        let err = ctl.configure(&layout(), TIMING).unwrap_err();
        assert!(matches!(
            err,
            SequencerError::Layout(LayoutError::CaptureExceedsMemory { .. })
        ));
        assert!(regs.writes().is_empty());
        assert_eq!(ctl.state(), DeviceState::Reset);
    }

    #[test]
    fn test_load_waveform_pads_region() {
        let (mut ctl, _, mem) = controller();
        mem.fill(0, &[0xAA; 4096]);
        let layout = layout();
        let waveform = vec![0x11; 2000];
        ctl.load_waveform(&layout, &waveform, 300).unwrap();

        let snapshot = mem.snapshot();
        assert!(snapshot[..2000].iter().all(|&b| b == 0x11));
        assert!(snapshot[2000..2048].iter().all(|&b| b == 0));
        assert_eq!(layout.waveform_byte_length, 2048);
        assert_eq!(snapshot[2048], 0xAA);
    }

    #[test]
    fn test_load_waveform_rejects_oversized() {
        let (mut ctl, _, _) = controller();
        let err = ctl.load_waveform(&layout(), &vec![0; 4096], 0).unwrap_err();
        assert!(matches!(
            err,
            SequencerError::Layout(LayoutError::WaveformTooLong {
                len: 4096,
                region: 2048
            })
        ));
    }

    #[test]
    fn test_force_drive_off_waits_excitation_and_zeroes() {
        let (mut ctl, _, mem) = controller();
        let layout = layout();
        ctl.load_waveform(&layout, &[0x55; 2000], 0).unwrap();
        ctl.configure(&layout, TIMING).unwrap();
        ctl.start().unwrap();

        let start = Instant::now();
        ctl.force_drive_off().unwrap();
        assert!(start.elapsed() >= Duration::from_micros(250));
        assert!(mem.snapshot()[..2048].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wait_for_completion_moves_to_done() {
        let (mut ctl, _, _) = controller();
        ctl.configure(&layout(), TIMING).unwrap();
        ctl.start().unwrap();
        let waiter = CompletionWaiter::new(Duration::from_secs(1), Duration::from_millis(1));
        let pointers = ctl.wait_for_completion(&waiter).unwrap();
        assert_eq!(ctl.state(), DeviceState::Done);
        assert_eq!(pointers.write_ptr, 0x0100_0000 + 128);
    }

    #[test]
    fn test_timeout_still_moves_to_done() {
        let regs = MockRegisters::new().never_completing();
        let mut ctl = DeviceController::from_parts(regs, MockMemory::new(64 * 1024), fast());
        ctl.configure(&layout(), TIMING).unwrap();
        ctl.start().unwrap();
        let waiter = CompletionWaiter::new(Duration::from_millis(5), Duration::from_millis(1));
        assert!(ctl.wait_for_completion(&waiter).unwrap_err().is_timeout());
        assert_eq!(ctl.state(), DeviceState::Done);
    }

    #[test]
    fn test_capture_reads_planned_region() {
        let (mut ctl, _, mem) = controller();
        let layout = layout();
        mem.fill(layout.capture_start_offset_relative as usize, &[0x42; 4096]);
        assert!(ctl.capture(0).is_err());

        ctl.configure(&layout, TIMING).unwrap();
        ctl.start().unwrap();
        ctl.sleep_for_completion().unwrap();

        let bytes: Vec<u8> = ctl
            .capture(1000)
            .unwrap()
            .flat_map(|c| c.unwrap())
            .collect();
        assert_eq!(bytes.len() as u64, layout.capture_byte_length);
        assert!(bytes.iter().all(|&b| b == 0x42));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_releases() {
        let (mut ctl, regs, mem) = controller();
        ctl.configure(&layout(), TIMING).unwrap();
        ctl.start().unwrap();

        ctl.shutdown();
        assert_eq!(ctl.state(), DeviceState::Idle);
        assert!(ctl.is_released());
        assert_eq!(regs.handle_count(), 1);
        assert_eq!(mem.handle_count(), 1);
        assert_eq!(regs.value(registers::SOFT_RESET), 1);
        assert_eq!(regs.value(registers::RELAY_ENABLED), 0);
        let writes = regs.writes().len();

        ctl.shutdown();
        assert_eq!(ctl.state(), DeviceState::Idle);
        assert_eq!(regs.writes().len(), writes);
        assert!(matches!(ctl.reset(), Err(SequencerError::Released)));
    }

    #[test]
    fn test_drop_runs_shutdown() {
        let regs = MockRegisters::new();
        {
            let mut ctl =
                DeviceController::from_parts(regs.clone(), MockMemory::new(64 * 1024), fast());
            ctl.configure(&layout(), TIMING).unwrap();
            ctl.start().unwrap();
        }
        assert_eq!(regs.handle_count(), 1);
        assert_eq!(regs.value(registers::SOFT_RESET), 1);
        assert_eq!(regs.value(registers::RELAY_ENABLED), 0);
    }

    #[test]
    fn test_identity_mismatch_is_warning_by_default() {
        let regs = MockRegisters::new().with_identity(0x5245_4450);
        let ctl = DeviceController::from_parts(regs, MockMemory::new(16), fast());
        let report = ctl.verify_identity().unwrap();
        assert!(!report.matched);
        assert_eq!(report.label, "REDP");
    }

    #[test]
    fn test_identity_mismatch_strict() {
        let regs = MockRegisters::new().with_identity(0);
        let settings = ControllerSettings {
            strict_identity: true,
            ..fast()
        };
        let ctl = DeviceController::from_parts(regs, MockMemory::new(16), settings);
        assert!(matches!(
            ctl.verify_identity(),
            Err(SequencerError::IdentityMismatch { found: 0, .. })
        ));
    }

    #[test]
    fn test_identity_match() {
        let (ctl, _, _) = controller();
        let report = ctl.verify_identity().unwrap();
        assert!(report.matched);
        assert_eq!(report.label, "ÅABC");
    }

    #[test]
    fn test_snapshot_lists_all_registers() {
        let (ctl, _, _) = controller();
        let snapshot = ctl.snapshot().unwrap();
        assert_eq!(snapshot.len(), 18);
        assert_eq!(snapshot[0], ("MLA_CONST", registers::EXPECTED_IDENTITY));
    }
}
