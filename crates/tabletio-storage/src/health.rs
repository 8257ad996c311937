//! Read/write probe used to decide whether a directory is still usable

use rand::RngCore;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use tabletio_common::{Error, Result};

/// Attempts made by one health check before a directory is declared offline
pub const PROBE_RETRIES: usize = 10;

const PROBE_SIZE: usize = 4096;

/// Write a random block to `path`, sync it, read it back and compare
///
/// Filesystem failures surface as `Error::DiskIo`. A readback mismatch is a
/// `Corruption`, which the health check does not count as an I/O failure.
pub fn read_write_test_file(path: &Path) -> Result<()> {
    let mut payload = vec![0u8; PROBE_SIZE];
    rand::thread_rng().fill_bytes(&mut payload);

    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(&payload)?;
        file.sync_all()?;
    }

    let mut readback = Vec::with_capacity(PROBE_SIZE);
    OpenOptions::new()
        .read(true)
        .open(path)?
        .read_to_end(&mut readback)?;

    if readback != payload {
        return Err(Error::corruption(format!(
            "test file {} read back {} bytes that differ from what was written",
            path.display(),
            readback.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_probe_succeeds_on_writable_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".testfile");
        read_write_test_file(&path).unwrap();
        read_write_test_file(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), PROBE_SIZE as u64);
    }

    #[test]
    fn test_probe_reports_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".testfile");
        std::fs::create_dir(&path).unwrap();
        assert!(read_write_test_file(&path).unwrap_err().is_io_error());
    }
}
