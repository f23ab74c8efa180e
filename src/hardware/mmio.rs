//! Memory-mapped hardware windows.
//!
//! [`MmioRegion`] maps a physical address range of a device file into the
//! process. On the target board the file is `/dev/mem`, opened with `O_SYNC`
//! so the mapping is uncached. Any regular file of sufficient length can be
//! mapped the same way, which is how the test-suite exercises this backend.
//!
//! # Safety
//!
//! The mapping is owned exclusively by one `MmioRegion` and is unmapped when
//! it is dropped. Register accesses are 4-byte aligned volatile loads and
//! stores; bounds are checked before every access.

#![allow(unsafe_code)]

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, info};

use super::{check_bounds, check_register, MemoryRegion, RegisterBus};
use crate::error::{Result, SequencerError};

/// Default device file exposing physical memory.
pub const DEV_MEM: &str = "/dev/mem";

/// A mapped window of physical memory.
pub struct MmioRegion {
    mmap: MmapMut,
    path: PathBuf,
    base: u64,
}

impl MmioRegion {
    /// Map `len` bytes at physical address `base` of the device file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Mapping`] if the file cannot be opened, the
    /// base is not 4-byte aligned, `len` is zero, or the mapping fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ringdown_daq::hardware::{MmioRegion, RegisterBus};
    ///
    /// let axil = MmioRegion::map("/dev/mem", 0x4000_0000, 0x1000)?;
    /// let identity = axil.read_register(0x00)?;
    /// # Ok::<(), ringdown_daq::SequencerError>(())
    /// ```
    pub fn map(path: impl AsRef<Path>, base: u64, len: usize) -> Result<Self> {
        let path = path.as_ref();
        let mapping_error = |message: String| SequencerError::Mapping {
            path: path.to_path_buf(),
            base,
            len,
            message,
        };

        if len == 0 {
            return Err(mapping_error("window length must be non-zero".to_string()));
        }
        if base % 4 != 0 {
            return Err(mapping_error("base address must be 4-byte aligned".to_string()));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(path)
            .map_err(|e| mapping_error(e.to_string()))?;

        // SAFETY: the mapping is private to this struct and every access goes
        // through bounds-checked methods. Other processes mapping the same
        // physical range is outside our control, as with any /dev/mem user.
        let mmap = unsafe {
            MmapOptions::new()
                .offset(base)
                .len(len)
                .map_mut(&file)
                .map_err(|e| mapping_error(e.to_string()))?
        };

        info!(path = %path.display(), base = %format!("{base:#010x}"), len, "Mapped hardware window");

        Ok(Self {
            mmap,
            path: path.to_path_buf(),
            base,
        })
    }

    /// Physical base address of the window.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Path of the mapped device file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RegisterBus for MmioRegion {
    fn read_register(&self, offset: usize) -> Result<u32> {
        check_register(offset, self.mmap.len())?;
        // SAFETY: offset is in bounds and 4-byte aligned; the mapping base is
        // page aligned plus an aligned `base`, so the pointer is aligned.
        let value = unsafe { std::ptr::read_volatile(self.mmap.as_ptr().add(offset).cast::<u32>()) };
        Ok(value)
    }

    fn write_register(&mut self, offset: usize, value: u32) -> Result<()> {
        check_register(offset, self.mmap.len())?;
        // SAFETY: see read_register.
        unsafe {
            std::ptr::write_volatile(self.mmap.as_mut_ptr().add(offset).cast::<u32>(), value);
        }
        Ok(())
    }
}

impl MemoryRegion for MmioRegion {
    fn size(&self) -> usize {
        self.mmap.len()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds("buffer", offset, len, self.mmap.len())?;
        Ok(self.mmap[offset..offset + len].to_vec())
    }

    fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        check_bounds("buffer", offset, bytes.len(), self.mmap.len())?;
        self.mmap[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for MmioRegion {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), base = %format!("{:#010x}", self.base), "Unmapping hardware window");
    }
}

impl std::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioRegion")
            .field("path", &self.path)
            .field("base", &format!("{:#010x}", self.base))
            .field("len", &self.mmap.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn backing_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_register_roundtrip_through_file() {
        let file = backing_file(4096);
        let mut region = MmioRegion::map(file.path(), 0, 4096).unwrap();

        region.write_register(0x0C, 1).unwrap();
        region.write_register(0x44, 0xDEAD_BEEF).unwrap();
        assert_eq!(region.read_register(0x0C).unwrap(), 1);
        assert_eq!(region.read_register(0x44).unwrap(), 0xDEAD_BEEF);
        assert_eq!(region.read_register(0x40).unwrap(), 0);
    }

    #[test]
    fn test_register_bounds_and_alignment() {
        let file = backing_file(4096);
        let mut region = MmioRegion::map(file.path(), 0, 64).unwrap();
        assert!(region.read_register(64).is_err());
        assert!(region.read_register(3).is_err());
        assert!(region.write_register(62, 0).is_err());
    }

    #[test]
    fn test_mapping_at_offset() {
        let file = backing_file(8192);
        {
            let mut whole = MmioRegion::map(file.path(), 0, 8192).unwrap();
            whole.write_bytes(4096 + 16, &[1, 2, 3, 4]).unwrap();
        }
        let window = MmioRegion::map(file.path(), 4096, 4096).unwrap();
        assert_eq!(window.base(), 4096);
        assert_eq!(window.read_bytes(16, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_buffer_out_of_range() {
        let file = backing_file(4096);
        let mut region = MmioRegion::map(file.path(), 0, 4096).unwrap();
        assert!(region.read_bytes(4000, 97).is_err());
        assert!(region.write_bytes(4095, &[0, 0]).is_err());
        assert!(region.read_bytes(4000, 96).is_ok());
    }

    #[test]
    fn test_missing_device_is_mapping_error() {
        let err = MmioRegion::map("/nonexistent/ringdown-mem", 0x4000_0000, 0x1000).unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("/nonexistent/ringdown-mem"));
    }

    #[test]
    fn test_unaligned_base_rejected() {
        let file = backing_file(4096);
        let err = MmioRegion::map(file.path(), 2, 16).unwrap_err();
        assert!(err.is_mapping());
    }
}
