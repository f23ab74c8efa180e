//! Chunked extraction of the capture region.
//!
//! [`CaptureExtractor`] is a finite, non-restartable iterator over the capture
//! region of the shared memory. Each item is one chunk of at most
//! `chunk_size` bytes; the last chunk carries the remainder. Concatenating the
//! chunks always yields exactly `byte_length` bytes, whatever the chunk size.
//!
//! # Example
//!
//! ```
//! use ringdown_daq::capture::extract;
//! use ringdown_daq::hardware::mock::MockMemory;
//!
//! let memory = MockMemory::new(1024);
//! let chunks: Vec<_> = extract(&memory, 256, 300, 128).collect::<Result<_, _>>()?;
//! let lengths: Vec<usize> = chunks.iter().map(Vec::len).collect();
//! assert_eq!(lengths, vec![128, 128, 44]);
//! # Ok::<(), ringdown_daq::SequencerError>(())
//! ```

use tracing::debug;

use crate::completion::CompletionPointers;
use crate::error::Result;
use crate::hardware::MemoryRegion;

/// Default extraction chunk size (8 MiB).
pub const DEFAULT_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Lazy chunked reader over a region of a [`MemoryRegion`].
pub struct CaptureExtractor<'a, M: MemoryRegion + ?Sized> {
    buffer: &'a M,
    offset: usize,
    total: usize,
    read: usize,
    chunk_size: usize,
    failed: bool,
}

/// Start extracting `byte_length` bytes at `relative_offset` in chunks of
/// `chunk_size` bytes. A chunk size of zero selects [`DEFAULT_CHUNK_BYTES`].
pub fn extract<M: MemoryRegion + ?Sized>(
    buffer: &M,
    relative_offset: usize,
    byte_length: usize,
    chunk_size: usize,
) -> CaptureExtractor<'_, M> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_BYTES
    } else {
        chunk_size
    };
    CaptureExtractor {
        buffer,
        offset: relative_offset,
        total: byte_length,
        read: 0,
        chunk_size,
        failed: false,
    }
}

impl<M: MemoryRegion + ?Sized> CaptureExtractor<'_, M> {
    /// Bytes produced so far.
    pub fn bytes_read(&self) -> usize {
        self.read
    }

    /// Total bytes this extractor will produce.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Fraction of the capture read so far, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.read as f64 / self.total as f64
        }
    }

    fn remaining_chunks(&self) -> usize {
        if self.failed {
            0
        } else {
            (self.total - self.read).div_ceil(self.chunk_size)
        }
    }
}

impl<M: MemoryRegion + ?Sized> Iterator for CaptureExtractor<'_, M> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.read >= self.total {
            return None;
        }

        let len = self.chunk_size.min(self.total - self.read);
        match self.buffer.read_bytes(self.offset + self.read, len) {
            Ok(chunk) => {
                self.read += len;
                debug!(
                    bytes_read = self.read,
                    total = self.total,
                    progress = self.progress(),
                    "Capture extraction progress"
                );
                Some(Ok(chunk))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining_chunks();
        (n, Some(n))
    }
}

/// The raw capture plus the pointer values observed at completion.
///
/// Owned by the caller once returned; the controller keeps no copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResult {
    /// Raw capture bytes (16-bit signed little-endian samples).
    pub data: Vec<u8>,
    /// Pointers observed at completion.
    pub pointers: CompletionPointers,
}

impl CaptureResult {
    /// Drain an extractor into a single buffer.
    pub fn collect<M: MemoryRegion + ?Sized>(
        extractor: CaptureExtractor<'_, M>,
        pointers: CompletionPointers,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(extractor.total_bytes());
        for chunk in extractor {
            data.extend_from_slice(&chunk?);
        }
        Ok(Self { data, pointers })
    }

    /// Capture length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the capture is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the capture as 16-bit signed little-endian samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockMemory;

    #[test]
    fn test_uneven_chunks() {
        let memory = MockMemory::new(10_000_000);
        let chunk = 8 * 1024 * 1024;
        let lengths: Vec<usize> = extract(&memory, 0, 10_000_000, chunk)
            .map(|c| c.unwrap().len())
            .collect();
        assert_eq!(lengths, vec![8_388_608, 1_611_392]);
    }

    #[test]
    fn test_concatenation_independent_of_chunk_size() {
        let memory = MockMemory::new(4096);
        let pattern: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
        memory.fill(0, &pattern);

        for chunk in [1, 3, 64, 100, 1000, 1536, 1537, 4096, 10_000] {
            let extractor = extract(&memory, 512, 1537, chunk);
            let result = CaptureResult::collect(extractor, CompletionPointers::default()).unwrap();
            assert_eq!(result.len(), 1537, "chunk size {chunk}");
            assert_eq!(result.data, pattern[512..512 + 1537], "chunk size {chunk}");
        }
    }

    #[test]
    fn test_progress_is_monotonic() {
        let memory = MockMemory::new(1000);
        let mut extractor = extract(&memory, 0, 1000, 300);
        assert_eq!(extractor.size_hint(), (4, Some(4)));
        let mut last = extractor.progress();
        assert_eq!(last, 0.0);
        while let Some(chunk) = extractor.next() {
            chunk.unwrap();
            assert!(extractor.progress() > last);
            last = extractor.progress();
        }
        assert_eq!(last, 1.0);
        assert_eq!(extractor.bytes_read(), 1000);
        // Not restartable.
        assert!(extractor.next().is_none());
    }

    #[test]
    fn test_zero_length_yields_nothing() {
        let memory = MockMemory::new(16);
        assert_eq!(extract(&memory, 0, 0, 8).count(), 0);
    }

    #[test]
    fn test_read_error_ends_iteration() {
        let memory = MockMemory::new(1000);
        let mut extractor = extract(&memory, 900, 250, 100);
        assert!(extractor.next().unwrap().is_ok());
        assert!(extractor.next().unwrap().is_err());
        assert!(extractor.next().is_none());
    }

    #[test]
    fn test_samples_little_endian() {
        let result = CaptureResult {
            data: vec![0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80],
            pointers: CompletionPointers::default(),
        };
        let samples: Vec<i16> = result.samples().collect();
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }
}
