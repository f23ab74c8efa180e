//! Raw capture persistence.
//!
//! The capture is stored exactly as it sits in memory: 16-bit signed
//! little-endian samples, no header. Acquisition parameters go to a JSON file
//! alongside (see [`crate::metadata`]).

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

/// Metadata file path for a raw capture file: same stem, `.json` extension.
pub fn metadata_path_for(raw: &Path) -> PathBuf {
    raw.with_extension("json")
}

/// Buffered writer for the `.raw` capture file.
pub struct RawCaptureWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
}

impl RawCaptureWriter {
    /// Create (or truncate) the raw file, creating parent directories.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&path)?);
        debug!(path = %path.display(), "Raw capture file opened");
        Ok(Self {
            path,
            writer,
            bytes_written: 0,
        })
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one capture chunk.
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.writer.write_all(chunk)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush to disk and return the total byte count.
    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        info!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            "Ring-down data saved"
        );
        Ok(self.bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ringdown_data.raw");

        let mut writer = RawCaptureWriter::create(&path).unwrap();
        writer.write_chunk(&[1, 2, 3]).unwrap();
        writer.write_chunk(&[]).unwrap();
        writer.write_chunk(&[4, 5]).unwrap();
        assert_eq!(writer.bytes_written(), 5);
        assert_eq!(writer.finish().unwrap(), 5);

        assert_eq!(fs::read(&path).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_metadata_path() {
        assert_eq!(
            metadata_path_for(Path::new("out/ringdown_data.raw")),
            PathBuf::from("out/ringdown_data.json")
        );
        assert_eq!(
            metadata_path_for(Path::new("capture")),
            PathBuf::from("capture.json")
        );
    }
}
