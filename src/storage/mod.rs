//! An embeddable, Bitcask-model key-value storage engine: append-only log
//! segments on disk plus a fully in-memory (or on-disk B+-tree) keydir
//! mapping each live key to its most recent record's location.

mod batch;
mod engine;
pub(crate) mod index;
pub(crate) mod io;
pub(crate) mod lock;
pub(crate) mod log_record;
mod merge;
pub(crate) mod segment;
mod user_iterator;

pub use batch::WriteBatch;
pub use engine::{Engine, Stat};
pub use index::IndexType;
pub use user_iterator::Iterator;

use crate::error::{Error, Result};

/// Configuration for [`Engine::open`].
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory the engine's segments, keydir, and lock file live under.
    pub data_dir: std::path::PathBuf,
    /// A segment is rotated once the next append would exceed this size.
    pub max_file_size: u64,
    /// Fsync the active segment after every append.
    pub sync_every_write: bool,
    /// Fsync once this many bytes have been written since the last sync.
    /// Zero disables the threshold (only `sync_every_write` or an explicit
    /// `Sync` call then triggers an fsync).
    pub bytes_per_sync: u64,
    /// Which keydir backend to use.
    pub index_type: IndexType,
    /// Tuning for the on-disk B+-tree backend; ignored otherwise.
    pub bplus_tree_options: index::BPlusTreeOptions,
    /// Use the mmap I/O backend while scanning segments during recovery,
    /// then switch the active segment back to buffered I/O.
    pub mmap_at_startup: bool,
    /// Advisory threshold in `[0, 1]` for callers deciding when to trigger
    /// `Merge`; the engine itself never merges on its own.
    pub merge_ratio: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            data_dir: std::path::PathBuf::from("/tmp/fairy-kvdb"),
            max_file_size: 256 * 1024 * 1024,
            sync_every_write: false,
            bytes_per_sync: 0,
            index_type: IndexType::default(),
            bplus_tree_options: index::BPlusTreeOptions::default(),
            mmap_at_startup: false,
            merge_ratio: 0.5,
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::InvalidOptions("data_dir must not be empty".into()));
        }
        if self.max_file_size == 0 {
            return Err(Error::InvalidOptions("max_file_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.merge_ratio) {
            return Err(Error::InvalidOptions("merge_ratio must be in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Options for [`Engine::new_iterator`].
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only keys with this prefix are visited. Empty means no filter.
    pub prefix: Vec<u8>,
    pub reverse: bool,
}

/// Options for [`Engine::new_write_batch`].
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Caps the number of staged operations a single batch may hold.
    pub max_batch_num: usize,
    /// Fsync the active segment when the batch commits.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self { max_batch_num: 10_000, sync_writes: true }
    }
}
