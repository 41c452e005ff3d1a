//! Crate-wide error type.

use thiserror::Error;

/// Errors returned by the storage engine.
///
/// Names track the semantic error kinds a Bitcask-style engine needs to
/// distinguish, not the shape of the underlying failure — callers match on
/// these, not on `std::io::ErrorKind`.
#[derive(Error, Debug)]
pub enum Error {
    /// Put/Delete/Get (or a batch equivalent) was called with a zero-length key.
    #[error("key cannot be empty")]
    KeyEmpty,

    /// The requested key has no live entry in the keydir.
    #[error("key not found")]
    KeyNotFound,

    /// The keydir pointed at a segment id with no open handle. This violates
    /// the engine's own invariants and should never happen outside a bug.
    #[error("data file {0} not found")]
    DataFileNotFound(u32),

    /// A segment filename did not parse as a 9-digit, 32-bit id.
    #[error("data file corrupt: {0}")]
    DataFileCorrupt(String),

    /// A record's stored CRC disagreed with the recomputed CRC.
    #[error("invalid crc: log file may be corrupted")]
    InvalidCrc,

    /// A write batch was committed with more staged operations than
    /// `max_batch_num` allows.
    #[error("exceeded the max batch size")]
    ExceedMaxWriteBatchNum,

    /// A second `Merge` was attempted while one was already running.
    #[error("a merge operation is already in progress")]
    MergeInProgress,

    /// Another process already holds the exclusive directory lock.
    #[error("the database directory is already in use by another process")]
    DatabaseInUse,

    /// A delete found the key live in the keydir, then found it already gone
    /// by the time it removed the entry — a concurrent-mutation invariant
    /// violation, not a normal miss.
    #[error("failed to update in-memory index")]
    IndexUpdateFailed,

    /// `Options` failed validation (empty data_dir, zero max_file_size, or a
    /// merge_ratio outside `[0, 1]`).
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Passthrough I/O failure (open, read, write, fsync, rename, ...).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Passthrough failure from the on-disk B+-tree keydir backend.
    #[error("index error: {0}")]
    Index(#[from] sled::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
