//! Metadata Write-Ahead Log
//!
//! Append-only log for metadata operations with:
//! - Sequential LSN assignment
//! - CRC32C checksums per record
//! - Replay from any LSN
//! - Truncation after snapshot
//!
//! Record format:
//! ```text
//! +--------+------+--------+------+--------+
//! | Magic  | LSN  | Length | Data | CRC32C |
//! | 4B     | 8B   | 4B     | var  | 4B     |
//! +--------+------+--------+------+--------+
//! ```
//!
//! A torn or corrupt record ends the log: everything before it is replayed,
//! nothing after it is.

use super::types::{MetadataEntry, MetadataOp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tabletio_common::{Error, Result};
use tracing::warn;

/// WAL record magic number
const WAL_MAGIC: u32 = 0x5457_414C; // "TWAL"

/// Record header size (magic + lsn + length)
const RECORD_HEADER_SIZE: usize = 16;

/// Metadata WAL configuration
#[derive(Clone, Debug)]
pub struct WalConfig {
    /// Sync after every write
    pub sync_on_write: bool,
    /// WAL size above which compaction is due
    pub max_size_bytes: u64,
    /// Buffer size for writes
    pub write_buffer_size: usize,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            max_size_bytes: 64 * 1024 * 1024, // 64MB
            write_buffer_size: 64 * 1024,     // 64KB
        }
    }
}

/// A single WAL record
#[derive(Debug)]
pub struct WalRecord {
    pub lsn: u64,
    /// Serialized operation
    pub data: Vec<u8>,
}

impl WalRecord {
    /// Serialize record to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + self.data.len() + 4);
        buf.extend_from_slice(&WAL_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Read the next record from `reader`
    ///
    /// Returns `Ok(None)` at a clean end of file and at a torn tail.
    fn read_from(reader: &mut impl Read) -> Result<Option<Self>> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != WAL_MAGIC {
            warn!("invalid WAL magic {:#x}, stopping replay", magic);
            return Ok(None);
        }
        let mut lsn_bytes = [0u8; 8];
        lsn_bytes.copy_from_slice(&header[4..12]);
        let lsn = u64::from_le_bytes(lsn_bytes);
        let data_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]) as usize;

        let mut body = vec![0u8; data_len + 4];
        match reader.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                warn!("WAL record at lsn {} truncated, stopping replay", lsn);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let stored_crc = u32::from_le_bytes([
            body[data_len],
            body[data_len + 1],
            body[data_len + 2],
            body[data_len + 3],
        ]);
        body.truncate(data_len);

        let mut crc = crc32c::crc32c(&header);
        crc = crc32c::crc32c_append(crc, &body);
        if crc != stored_crc {
            warn!("WAL record at lsn {} has CRC mismatch, stopping replay", lsn);
            return Ok(None);
        }

        Ok(Some(Self { lsn, data: body }))
    }
}

/// Metadata Write-Ahead Log
pub struct MetadataWal {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    size: AtomicU64,
    /// Next LSN to assign
    next_lsn: AtomicU64,
    config: WalConfig,
}

impl MetadataWal {
    /// Create a new, empty WAL file
    pub fn create(path: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::storage(format!("failed to create WAL {}: {}", path.display(), e)))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(config.write_buffer_size, file)),
            path,
            size: AtomicU64::new(0),
            next_lsn: AtomicU64::new(1),
            config,
        })
    }

    /// Open an existing WAL file, positioning after its last valid record
    pub fn open(path: impl AsRef<Path>, config: WalConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut last_lsn = 0u64;
        let valid_len = Self::read_records(&path, |record| {
            last_lsn = record.lsn;
            Ok(())
        })?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::storage(format!("failed to open WAL {}: {}", path.display(), e)))?;
        // Drop a torn tail so new appends follow the last good record
        file.set_len(valid_len)?;
        let mut writer = BufWriter::with_capacity(config.write_buffer_size, file);
        std::io::Seek::seek(&mut writer, std::io::SeekFrom::End(0))?;

        Ok(Self {
            writer: Mutex::new(writer),
            path,
            size: AtomicU64::new(valid_len),
            next_lsn: AtomicU64::new(last_lsn + 1),
            config,
        })
    }

    /// Visit every valid record in the file; returns the byte length they cover
    fn read_records<F>(path: &Path, mut visit: F) -> Result<u64>
    where
        F: FnMut(WalRecord) -> Result<()>,
    {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut valid_len = 0u64;
        while let Some(record) = WalRecord::read_from(&mut reader)? {
            valid_len += (RECORD_HEADER_SIZE + record.data.len() + 4) as u64;
            visit(record)?;
        }
        Ok(valid_len)
    }

    /// Append a metadata operation to the WAL
    pub fn append(&self, op: &MetadataOp) -> Result<u64> {
        let data = op.to_bytes()?;
        // The LSN is assigned under the writer lock so records land in LSN order
        let mut writer = self.writer.lock();
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let bytes = WalRecord { lsn, data }.to_bytes();

        writer
            .write_all(&bytes)
            .map_err(|e| Error::storage(format!("WAL write failed: {}", e)))?;

        if self.config.sync_on_write {
            writer
                .flush()
                .map_err(|e| Error::storage(format!("WAL flush failed: {}", e)))?;
            writer
                .get_ref()
                .sync_data()
                .map_err(|e| Error::storage(format!("WAL sync failed: {}", e)))?;
        }

        self.size.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Append a batch of operations atomically
    pub fn append_batch(&self, ops: &[MetadataOp]) -> Result<u64> {
        if ops.is_empty() {
            return Ok(self.current_lsn());
        }
        self.append(&MetadataOp::Batch { ops: ops.to_vec() })
    }

    /// Flush and fsync
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .flush()
            .map_err(|e| Error::storage(format!("WAL flush failed: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::storage(format!("WAL sync failed: {}", e)))
    }

    /// Replay WAL from a given LSN, calling the callback for each operation
    pub fn replay<F>(&self, from_lsn: u64, mut callback: F) -> Result<u64>
    where
        F: FnMut(u64, MetadataOp) -> Result<()>,
    {
        self.writer
            .lock()
            .flush()
            .map_err(|e| Error::storage(format!("WAL flush failed: {}", e)))?;

        let mut last_lsn = from_lsn.saturating_sub(1);
        Self::read_records(&self.path, |record| {
            last_lsn = record.lsn;
            if record.lsn < from_lsn {
                return Ok(());
            }
            match MetadataOp::from_bytes(&record.data) {
                Some(op) => callback(record.lsn, op),
                None => {
                    warn!("undecodable WAL operation at lsn {}, skipping", record.lsn);
                    Ok(())
                }
            }
        })?;
        Ok(last_lsn)
    }

    /// Replay as flattened entries
    pub fn iter_entries<F>(&self, from_lsn: u64, mut callback: F) -> Result<u64>
    where
        F: FnMut(MetadataEntry) -> Result<()>,
    {
        self.replay(from_lsn, |lsn, op| {
            for entry in op.into_entries(lsn) {
                callback(entry)?;
            }
            Ok(())
        })
    }

    /// Drop every record below `snapshot_lsn`
    ///
    /// Called after a snapshot has durably captured those records. Survivors
    /// are rewritten into a side file which then replaces the log.
    pub fn truncate_before(&self, snapshot_lsn: u64) -> Result<()> {
        let new_path = self.path.with_extension("wal.new");

        // Hold the writer for the whole swap so no append is lost in between
        let mut writer = self.writer.lock();
        writer.flush()?;

        let mut survivors = Vec::new();
        Self::read_records(&self.path, |record| {
            if record.lsn >= snapshot_lsn {
                survivors.extend_from_slice(&record.to_bytes());
            }
            Ok(())
        })?;

        {
            let mut file = File::create(&new_path)
                .map_err(|e| Error::storage(format!("failed to create {}: {}", new_path.display(), e)))?;
            file.write_all(&survivors)?;
            file.sync_all()?;
        }

        std::fs::rename(&new_path, &self.path)
            .map_err(|e| Error::storage(format!("WAL rename failed: {}", e)))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(format!("failed to reopen WAL: {}", e)))?;
        *writer = BufWriter::with_capacity(self.config.write_buffer_size, file);
        self.size.store(survivors.len() as u64, Ordering::Relaxed);

        Ok(())
    }

    /// Make sure the next assigned LSN is above `lsn`
    ///
    /// A WAL emptied by truncation restarts at 1; records written after that
    /// must still sort after the snapshot that absorbed the old ones.
    pub fn ensure_lsn_after(&self, lsn: u64) {
        self.next_lsn.fetch_max(lsn + 1, Ordering::SeqCst);
    }

    /// Last assigned LSN
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Current WAL size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn needs_compaction(&self) -> bool {
        self.size() > self.config.max_size_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
