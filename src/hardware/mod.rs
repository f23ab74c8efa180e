//! Hardware access layer.
//!
//! The sequencer talks to the FPGA through two narrow traits:
//!
//! - [`RegisterBus`] - 32-bit access to the AXI-Lite control window
//! - [`MemoryRegion`] - byte access to the shared DDR region
//!
//! [`mmio::MmioRegion`] implements both on top of a memory-mapped device file
//! (normally `/dev/mem`). [`mock`] provides in-memory implementations for
//! testing without physical hardware.

pub mod mmio;
pub mod mock;

pub use mmio::MmioRegion;

use crate::error::{Result, SequencerError};

/// 32-bit register access at byte offsets within a control window.
pub trait RegisterBus {
    /// Read the register at `offset`.
    fn read_register(&self, offset: usize) -> Result<u32>;

    /// Write `value` to the register at `offset`.
    fn write_register(&mut self, offset: usize, value: u32) -> Result<()>;
}

/// Byte-addressed access to a fixed-size memory region.
pub trait MemoryRegion {
    /// Size of the region in bytes.
    fn size(&self) -> usize;

    /// Copy `len` bytes starting at `offset` out of the region.
    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Copy `bytes` into the region starting at `offset`.
    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;
}

/// Check that `[offset, offset + len)` lies inside a window of `size` bytes.
pub(crate) fn check_bounds(
    window: &'static str,
    offset: usize,
    len: usize,
    size: usize,
) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(SequencerError::Access {
            window,
            offset,
            len,
            size,
        }),
    }
}

/// Check a 32-bit register access: in bounds and 4-byte aligned.
pub(crate) fn check_register(offset: usize, size: usize) -> Result<()> {
    if offset % 4 != 0 {
        return Err(SequencerError::Access {
            window: "register (unaligned)",
            offset,
            len: 4,
            size,
        });
    }
    check_bounds("register", offset, 4, size)
}
