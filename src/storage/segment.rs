//! Segment files: numbered append-only logs, plus the fixed-name sidecar
//! files (hint file, merge-finished marker, btsn file) that reuse the same
//! record codec.

use std::path::{Path, PathBuf};

use super::io::{FileIO, IOManager, MmapIO};
use super::log_record::{decode_body, peek_header, LogRecord, RecordPos, MAX_HEADER_SIZE};
use crate::error::{Error, Result};

fn eof() -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"))
}

pub const DATA_FILE_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const BTSN_FILE_NAME: &str = "btsn";

/// Which `IOManager` backend a segment is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBackend {
    Buffered,
    Mmap,
}

/// An append-only, numbered log file. Exactly one segment per engine is
/// ever the *active* (writable) one; the rest are sealed and read-only.
pub struct Segment {
    pub id: u32,
    pub path: PathBuf,
    io: Box<dyn IOManager>,
    pub write_offset: u64,
}

/// Parses a 9-digit zero-padded segment id from a `.data` filename.
pub fn parse_segment_id(file_name: &str) -> Result<u32> {
    let stem = file_name.strip_suffix(DATA_FILE_SUFFIX).ok_or_else(|| {
        Error::DataFileCorrupt(format!("not a data file: {file_name}"))
    })?;
    stem.parse::<u32>()
        .map_err(|_| Error::DataFileCorrupt(format!("bad segment id: {file_name}")))
}

pub fn segment_file_name(id: u32) -> String {
    format!("{id:09}{DATA_FILE_SUFFIX}")
}

pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(segment_file_name(id))
}

impl Segment {
    /// Opens (creating if absent) segment `id` under `dir`, using the given
    /// I/O backend.
    pub fn open(dir: &Path, id: u32, backend: IoBackend) -> Result<Self> {
        let path = segment_path(dir, id);
        Self::open_at(path, id, backend)
    }

    /// Opens a fixed-name sidecar file (hint file, merge marker, btsn file)
    /// as a pseudo-segment with id 0; these never rotate and are never
    /// scanned for keydir recovery.
    pub fn open_named(dir: &Path, name: &str, backend: IoBackend) -> Result<Self> {
        Self::open_at(dir.join(name), 0, backend)
    }

    fn open_at(path: PathBuf, id: u32, backend: IoBackend) -> Result<Self> {
        let io: Box<dyn IOManager> = match backend {
            IoBackend::Buffered => Box::new(FileIO::open(&path)?),
            IoBackend::Mmap => Box::new(MmapIO::open(&path)?),
        };
        let write_offset = io.size()?;
        Ok(Self { id, path, io, write_offset })
    }

    /// Switches this segment from the mmap backend back to buffered I/O,
    /// preserving `write_offset`. Required before the active segment can
    /// accept writes.
    pub fn switch_to_buffered(&mut self) -> Result<()> {
        self.io.close()?;
        let io = FileIO::open(&self.path)?;
        self.write_offset = io.size()?;
        self.io = Box::new(io);
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Appends an already-encoded record, advancing `write_offset`.
    pub fn append(&mut self, encoded: &[u8]) -> Result<u64> {
        let offset = self.write_offset;
        let n = self.io.append(encoded)?;
        self.write_offset += n as u64;
        Ok(offset)
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.io.close()
    }

    /// Reads and decodes the record at `offset`. Returns the record and its
    /// total on-disk size. Fails with an `UnexpectedEof` I/O error (not
    /// `InvalidCrc`) once `offset` has reached the end of live records —
    /// callers scanning the segment treat that as "stop", per spec.
    pub fn read_record(&self, offset: u64) -> Result<(LogRecord, u64)> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Err(eof());
        }
        let header_read_size = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let mut header_buf = vec![0u8; header_read_size];
        self.io.read(&mut header_buf, offset)?;

        let shape = peek_header(&header_buf).ok_or_else(eof)?;
        let body_len = shape.key_size + shape.value_size;
        let mut body = vec![0u8; body_len];
        if body_len > 0 {
            self.io.read(&mut body, offset + shape.header_len as u64)?;
        }
        decode_body(&header_buf, &shape, &body)
    }

    /// Writes a hint record: `key` in the key slot, the encoded position in
    /// the value slot.
    pub fn write_hint(&mut self, key: &[u8], pos: RecordPos) -> Result<u64> {
        let record = LogRecord::normal(key.to_vec(), pos.encode().to_vec(), 0);
        let (encoded, _) = record.encode();
        self.append(&encoded)
    }

    /// Writes the next-batch-seq record: an 8-byte big-endian u64 in the
    /// value slot.
    pub fn write_batch_seq(&mut self, next_batch_seq: u64) -> Result<u64> {
        let record = LogRecord::normal(Vec::new(), next_batch_seq.to_be_bytes().to_vec(), 0);
        let (encoded, _) = record.encode();
        self.append(&encoded)
    }
}

/// True if `err` is the "ran off the end of the segment" sentinel
/// [`read_record`](Segment::read_record) returns, as opposed to a real I/O
/// failure or a CRC mismatch. Scanners use this to know when to stop.
pub fn is_eof(err: &Error) -> bool {
    matches!(err, Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
}
