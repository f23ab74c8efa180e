//! Mock Hardware Implementations
//!
//! Simulated register and memory windows for testing the sequencer without an
//! FPGA board.
//!
//! # Available Mocks
//!
//! - `MockRegisters` - AXI-Lite control window with simulated completion
//! - `MockMemory` - Shared DDR region backed by a `Vec<u8>`
//!
//! Both types are cheap handles onto shared state: clone one before handing it
//! to a [`DeviceController`](crate::device::DeviceController) and the clone can
//! still be inspected after the controller has released its copy.
//!
//! # Simulated Completion
//!
//! Releasing reset (writing 0 to `SOFT_RESET`) starts a simulated run. Every
//! read of `WRITER_DONE` counts as one poll; once the configured number of
//! polls is reached both done-flags read as set. The DMA pointer registers
//! advance by one burst per poll, from their configured start address, up to
//! the programmed burst count.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::{check_bounds, check_register, MemoryRegion, RegisterBus};
use crate::error::Result;
use crate::registers;

/// Burst size the mock pointers advance by.
const MOCK_BURST_BYTES: u32 = 128;

#[derive(Debug)]
struct RegisterState {
    values: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    done_after_polls: Option<u32>,
    polls: u32,
    running: bool,
}

/// Mock AXI-Lite register window.
///
/// # Example
///
/// ```
/// use ringdown_daq::hardware::mock::MockRegisters;
/// use ringdown_daq::hardware::RegisterBus;
/// use ringdown_daq::registers;
///
/// let mut regs = MockRegisters::new().completing_after(3);
/// regs.write_register(registers::SOFT_RESET, 0)?;
/// assert_eq!(regs.read_register(registers::WRITER_DONE)?, 0);
/// assert_eq!(regs.read_register(registers::WRITER_DONE)?, 0);
/// assert_eq!(regs.read_register(registers::WRITER_DONE)?, 1);
/// # Ok::<(), ringdown_daq::SequencerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MockRegisters {
    state: Rc<RefCell<RegisterState>>,
}

impl MockRegisters {
    /// Create a register window holding the expected identity constant that
    /// completes on the first poll after reset release.
    pub fn new() -> Self {
        let mut values = BTreeMap::new();
        values.insert(registers::MLA_CONST, registers::EXPECTED_IDENTITY);
        values.insert(registers::SOFT_RESET, 1);
        Self {
            state: Rc::new(RefCell::new(RegisterState {
                values,
                writes: Vec::new(),
                done_after_polls: Some(1),
                polls: 0,
                running: false,
            })),
        }
    }

    /// Set the value of the identity register.
    pub fn with_identity(self, identity: u32) -> Self {
        self.state
            .borrow_mut()
            .values
            .insert(registers::MLA_CONST, identity);
        self
    }

    /// Assert both done-flags on the `polls`-th poll after reset release.
    pub fn completing_after(self, polls: u32) -> Self {
        self.state.borrow_mut().done_after_polls = Some(polls.max(1));
        self
    }

    /// Never assert the done-flags.
    pub fn never_completing(self) -> Self {
        self.state.borrow_mut().done_after_polls = None;
        self
    }

    /// Current value of a register, without simulation side effects.
    pub fn value(&self, offset: usize) -> u32 {
        self.state
            .borrow()
            .values
            .get(&offset)
            .copied()
            .unwrap_or(0)
    }

    /// Every write in order, as `(offset, value)` pairs.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state.borrow().writes.clone()
    }

    /// Values written to one register, in order.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state
            .borrow()
            .writes
            .iter()
            .filter(|(addr, _)| *addr == offset)
            .map(|(_, value)| *value)
            .collect()
    }

    /// Number of done-flag polls observed since the last reset release.
    pub fn polls(&self) -> u32 {
        self.state.borrow().polls
    }

    /// Whether the simulated design is out of reset.
    pub fn is_running(&self) -> bool {
        self.state.borrow().running
    }

    /// Number of live handles onto this window (1 once a controller released its copy).
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.state)
    }

    fn pointer(state: &RegisterState, base_reg: usize, bursts_reg: usize) -> u32 {
        let base = state.values.get(&base_reg).copied().unwrap_or(0);
        let bursts = state.values.get(&bursts_reg).copied().unwrap_or(0);
        base.wrapping_add(state.polls.min(bursts).wrapping_mul(MOCK_BURST_BYTES))
    }

    fn is_done(state: &RegisterState) -> bool {
        state.running
            && state
                .done_after_polls
                .is_some_and(|after| state.polls >= after)
    }
}

impl Default for MockRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for MockRegisters {
    fn read_register(&self, offset: usize) -> Result<u32> {
        check_register(offset, registers::SPAN)?;
        let mut state = self.state.borrow_mut();
        let value = match offset {
            registers::WRITER_DONE => {
                if state.running {
                    state.polls += 1;
                }
                u32::from(Self::is_done(&state))
            }
            registers::READER_DONE => u32::from(Self::is_done(&state)),
            registers::WRITER_WRITE_PTR if state.running => Self::pointer(
                &state,
                registers::WRITER_MIN_ADDRESS,
                registers::WRITER_NUM_BURSTS,
            ),
            registers::READER_READ_PTR if state.running => Self::pointer(
                &state,
                registers::READER_MIN_ADDRESS,
                registers::READER_NUM_BURSTS,
            ),
            _ => state.values.get(&offset).copied().unwrap_or(0),
        };
        Ok(value)
    }

    fn write_register(&mut self, offset: usize, value: u32) -> Result<()> {
        check_register(offset, registers::SPAN)?;
        let mut state = self.state.borrow_mut();
        state.writes.push((offset, value));
        state.values.insert(offset, value);
        if offset == registers::SOFT_RESET {
            state.running = value == 0;
            if state.running {
                state.polls = 0;
            }
        }
        Ok(())
    }
}

/// Mock shared memory region.
#[derive(Debug, Clone)]
pub struct MockMemory {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl MockMemory {
    /// Create a zero-filled region of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: Rc::new(RefCell::new(vec![0; size])),
        }
    }

    /// Overwrite part of the region directly, bypassing bounds errors by
    /// truncating at the end of the region. Used to stage simulated captures.
    pub fn fill(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.bytes.borrow_mut();
        let end = (offset + data.len()).min(bytes.len());
        if offset < end {
            bytes[offset..end].copy_from_slice(&data[..end - offset]);
        }
    }

    /// Copy of the whole region.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    /// Number of live handles onto this region.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.bytes)
    }
}

impl MemoryRegion for MockMemory {
    fn size(&self) -> usize {
        self.bytes.borrow().len()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let bytes = self.bytes.borrow();
        check_bounds("buffer", offset, len, bytes.len())?;
        Ok(bytes[offset..offset + len].to_vec())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = self.bytes.borrow_mut();
        check_bounds("buffer", offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}
