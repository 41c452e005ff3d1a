//! The engine: owns segments, the keydir, the directory lock, and the
//! batch-seq counter. Every public operation here is one of the API surface
//! entries the CLI and write batches build on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use log::{debug, info};

use super::index::{IndexType, Keydir};
use super::lock::DirLock;
use super::log_record::{LogRecord, RecordPos, RecordType};
use super::merge;
use super::segment::{self, IoBackend, Segment};
use super::{Options, WriteBatch, WriteBatchOptions};
use crate::error::{Error, Result};

/// Engine-level mutable state guarded by a single reader/writer lock, per
/// the lock hierarchy: segments map, active segment, and the running
/// bytes-since-sync counter all move together under one lock.
pub(crate) struct EngineState {
    pub(crate) active: Option<Segment>,
    pub(crate) sealed: BTreeMap<u32, Segment>,
    bytes_since_sync: u64,
}

impl EngineState {
    fn segment(&self, id: u32) -> Option<&Segment> {
        match &self.active {
            Some(active) if active.id == id => Some(active),
            _ => self.sealed.get(&id),
        }
    }
}

/// Snapshot returned by [`Engine::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub key_count: usize,
    pub segment_count: usize,
    pub reclaimable_bytes: u64,
    pub on_disk_bytes: u64,
}

pub struct Engine {
    pub(crate) options: Options,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) keydir: Keydir,
    next_batch_seq: AtomicU64,
    pub(crate) is_merging: AtomicBool,
    reclaim_size: AtomicU64,
    _lock: DirLock,
}

impl Engine {
    /// Opens (creating if necessary) the engine rooted at `options.data_dir`,
    /// replaying any prior incomplete merge and rebuilding the keydir.
    pub fn open(options: Options) -> Result<Self> {
        options.validate()?;
        info!("opening database at {}", options.data_dir.display());
        std::fs::create_dir_all(&options.data_dir)?;
        let lock = DirLock::acquire(&options.data_dir)?;

        let non_merged_boundary = merge::replay_pending_merge(&options.data_dir)?;

        let backend = if options.mmap_at_startup { IoBackend::Mmap } else { IoBackend::Buffered };
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&options.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Ok(id) = segment::parse_segment_id(name) {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let mut sealed = BTreeMap::new();
        let mut active = None;
        for (i, id) in ids.iter().enumerate() {
            let seg = Segment::open(&options.data_dir, *id, backend)?;
            if i == ids.len() - 1 {
                active = Some(seg);
            } else {
                sealed.insert(*id, seg);
            }
        }

        let keydir = Keydir::open(options.index_type, &options.data_dir, &options.bplus_tree_options)?;
        let mut reclaim_size = 0u64;
        let next_batch_seq = match options.index_type {
            IndexType::BTree | IndexType::Art => {
                load_hint_file(&options.data_dir, &keydir)?;
                let (max_seen, reclaimed) = replay_segments(
                    &sealed,
                    active.as_ref(),
                    non_merged_boundary.unwrap_or(0),
                    &keydir,
                )?;
                reclaim_size = reclaimed;
                max_seen.map_or(0, |seq| seq + 1)
            }
            IndexType::BPlusTree => load_btsn_file(&options.data_dir)?,
        };

        if options.mmap_at_startup {
            if let Some(seg) = active.as_mut() {
                seg.switch_to_buffered()?;
            }
            for seg in sealed.values_mut() {
                seg.switch_to_buffered()?;
            }
        }

        info!("opened database with {} live key(s) across {} segment(s)", keydir.size()?, ids.len());

        Ok(Self {
            options,
            state: RwLock::new(EngineState { active, sealed, bytes_since_sync: 0 }),
            keydir,
            next_batch_seq: AtomicU64::new(next_batch_seq),
            is_merging: AtomicBool::new(false),
            reclaim_size: AtomicU64::new(reclaim_size),
            _lock: lock,
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let record = LogRecord::normal(key.to_vec(), value.to_vec(), 0);
        let pos = self.append_log_record(&record)?;
        let prev = self.keydir.put(key.to_vec(), pos)?;
        if let Some(prev) = prev {
            self.reclaim_size.fetch_add(prev.size, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        if self.keydir.get(key)?.is_none() {
            return Err(Error::KeyNotFound);
        }
        let record = LogRecord::tombstone(key.to_vec(), 0);
        let pos = self.append_log_record(&record)?;
        self.reclaim_size.fetch_add(pos.size, Ordering::Relaxed);
        let (prev, existed) = self.keydir.delete(key)?;
        if !existed {
            return Err(Error::IndexUpdateFailed);
        }
        if let Some(prev) = prev {
            self.reclaim_size.fetch_add(prev.size, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let pos = self.keydir.get(key)?.ok_or(Error::KeyNotFound)?;
        self.read_value_at(pos)
    }

    pub(crate) fn read_value_at(&self, pos: RecordPos) -> Result<Vec<u8>> {
        let state = self.state.read().unwrap();
        let segment = state.segment(pos.segment_id).ok_or(Error::DataFileNotFound(pos.segment_id))?;
        let (record, _) = segment.read_record(pos.offset)?;
        Ok(record.value)
    }

    /// Iterates the keydir in ascending key order, reading each value from
    /// disk and invoking `f`; stops as soon as `f` returns `false`.
    pub fn fold(&self, mut f: impl FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        let mut iter = self.keydir.iterator(false)?;
        iter.rewind();
        while iter.valid() {
            let value = self.read_value_at(iter.value())?;
            if !f(iter.key(), &value)? {
                break;
            }
            iter.next();
        }
        iter.close();
        Ok(())
    }

    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.keydir.iterator(false)?;
        iter.rewind();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        iter.close();
        Ok(keys)
    }

    pub fn new_iterator(&self, options: super::IteratorOptions) -> Result<super::Iterator<'_>> {
        super::Iterator::new(self, options)
    }

    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch::new(self, options)
    }

    /// Fsyncs the active segment, if one exists; a no-op on a fresh,
    /// never-written engine. The original source's `Sync` instead returned
    /// early whenever an active file *did* exist and only locked/synced
    /// when it was absent — the inverse of what "sync" should mean. This
    /// implements the corrected behavior.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.read().unwrap();
        if let Some(active) = &state.active {
            active.sync()?;
        }
        Ok(())
    }

    /// Persists the next batch-seq to the `btsn` file (consulted on next
    /// open only by the B+-tree backend; harmless otherwise), closes every
    /// segment and the keydir, and releases the directory lock.
    pub fn close(&self) -> Result<()> {
        info!("closing database at {}", self.options.data_dir.display());
        let mut state = self.state.write().unwrap();
        write_btsn_file(&self.options.data_dir, self.next_batch_seq.load(Ordering::SeqCst))?;
        if let Some(active) = &state.active {
            active.close()?;
        }
        for seg in state.sealed.values() {
            seg.close()?;
        }
        state.active = None;
        state.sealed.clear();
        self.keydir.close()?;
        Ok(())
    }

    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read().unwrap();
        let mut on_disk_bytes = 0u64;
        let mut segment_count = 0usize;
        if let Some(active) = &state.active {
            on_disk_bytes += active.file_size()?;
            segment_count += 1;
        }
        for seg in state.sealed.values() {
            on_disk_bytes += seg.file_size()?;
            segment_count += 1;
        }
        Ok(Stat {
            key_count: self.keydir.size()?,
            segment_count,
            reclaimable_bytes: self.reclaim_size.load(Ordering::Relaxed),
            on_disk_bytes,
        })
    }

    /// Copies every file in `data_dir` except the lock file into `dst_dir`,
    /// creating it if missing.
    pub fn copy_backup(&self, dst_dir: &Path) -> Result<()> {
        let _state = self.state.read().unwrap();
        std::fs::create_dir_all(dst_dir)?;
        for entry in walk_files(&self.options.data_dir)? {
            let rel = entry.strip_prefix(&self.options.data_dir).expect("entry under data_dir");
            if rel.file_name().and_then(|n| n.to_str()) == Some(super::lock::LOCK_FILE_NAME) {
                continue;
            }
            let dst = dst_dir.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&entry, &dst)?;
        }
        Ok(())
    }

    pub fn merge(&self) -> Result<()> {
        merge::merge(self)
    }

    pub(crate) fn fetch_next_batch_seq(&self) -> u64 {
        self.next_batch_seq.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn credit_reclaim(&self, size: u64) {
        self.reclaim_size.fetch_add(size, Ordering::Relaxed);
    }

    /// Appends an already-built record under the engine write lock, rotating
    /// the active segment if the write would overflow it.
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<RecordPos> {
        let mut state = self.state.write().unwrap();
        self.append_log_record_locked(&mut state, record)
    }

    /// Same as [`Self::append_log_record`] but takes an already-held write
    /// guard, so a caller (the write batch) can hold the engine write lock
    /// across several appends and have them land as one contiguous run.
    pub(crate) fn append_log_record_locked(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<RecordPos> {
        let (encoded, size) = record.encode();

        if state.active.is_none() {
            state.active = Some(Segment::open(&self.options.data_dir, 0, IoBackend::Buffered)?);
        }

        let active = state.active.as_ref().unwrap();
        if active.write_offset + size > self.options.max_file_size {
            let active = state.active.as_ref().unwrap();
            active.sync()?;
            let next_id = active.id + 1;
            let sealed = state.active.take().unwrap();
            debug!("sealing segment {} and rotating to segment {next_id}", sealed.id);
            state.sealed.insert(sealed.id, sealed);
            state.active = Some(Segment::open(&self.options.data_dir, next_id, IoBackend::Buffered)?);
        }

        let active = state.active.as_mut().unwrap();
        let segment_id = active.id;
        let offset = active.append(&encoded)?;

        state.bytes_since_sync += size;
        let should_sync = self.options.sync_every_write
            || (self.options.bytes_per_sync > 0 && state.bytes_since_sync >= self.options.bytes_per_sync);
        if should_sync {
            state.active.as_ref().unwrap().sync()?;
            state.bytes_since_sync = 0;
        }

        Ok(RecordPos { segment_id, offset, size })
    }
}

/// Replays segments from `non_merged_boundary` onward in ascending id order,
/// staging batched records until their `BatchEnd` is seen and discarding any
/// batch that never gets one. Returns the highest `batch_seq` observed and
/// the total bytes of records the replay found already superseded, so
/// `reclaim_size` comes back out of recovery instead of resetting to zero.
fn replay_segments(
    sealed: &BTreeMap<u32, Segment>,
    active: Option<&Segment>,
    non_merged_boundary: u32,
    keydir: &Keydir,
) -> Result<(Option<u64>, u64)> {
    let mut max_seen: Option<u64> = None;
    let mut reclaim_size = 0u64;
    let mut pending: BTreeMap<u64, Vec<(LogRecord, RecordPos)>> = BTreeMap::new();

    let mut segments: Vec<&Segment> =
        sealed.values().filter(|s| s.id >= non_merged_boundary).collect();
    if let Some(active) = active {
        if active.id >= non_merged_boundary {
            segments.push(active);
        }
    }

    for segment in segments {
        let mut offset = 0u64;
        loop {
            let (record, size) = match segment.read_record(offset) {
                Ok(v) => v,
                Err(e) if segment::is_eof(&e) => break,
                Err(e) => return Err(e),
            };
            if record.batch_seq > 0 {
                max_seen = Some(max_seen.map_or(record.batch_seq, |m| m.max(record.batch_seq)));
            }
            let pos = RecordPos { segment_id: segment.id, offset, size };

            match record.record_type {
                RecordType::BatchEnd => {
                    if let Some(batch) = pending.remove(&record.batch_seq) {
                        reclaim_size += apply_batch(keydir, batch)?;
                    }
                }
                RecordType::Normal | RecordType::Tombstone if record.batch_seq == 0 => {
                    reclaim_size += apply_record(keydir, record, pos)?;
                }
                RecordType::Normal | RecordType::Tombstone => {
                    pending.entry(record.batch_seq).or_default().push((record, pos));
                }
            }
            offset += size;
        }
    }

    if !pending.is_empty() {
        debug!("discarding {} unterminated batch(es) found during recovery", pending.len());
    }

    Ok((max_seen, reclaim_size))
}

fn apply_batch(keydir: &Keydir, records: Vec<(LogRecord, RecordPos)>) -> Result<u64> {
    let mut reclaim_size = 0u64;
    for (record, pos) in records {
        reclaim_size += apply_record(keydir, record, pos)?;
    }
    Ok(reclaim_size)
}

/// Applies one recovered record to `keydir`, returning the bytes it made
/// reclaimable: a tombstone's own size plus whatever record it supersedes,
/// mirroring the live credit-on-write logic in [`Engine::put`]/[`Engine::delete`].
fn apply_record(keydir: &Keydir, record: LogRecord, pos: RecordPos) -> Result<u64> {
    let mut reclaim_size = 0u64;
    match record.record_type {
        RecordType::Tombstone => {
            reclaim_size += pos.size;
            let (prev, _) = keydir.delete(&record.key)?;
            if let Some(prev) = prev {
                reclaim_size += prev.size;
            }
        }
        RecordType::Normal => {
            if let Some(prev) = keydir.put(record.key, pos)? {
                reclaim_size += prev.size;
            }
        }
        RecordType::BatchEnd => {}
    }
    Ok(reclaim_size)
}

fn load_hint_file(dir: &Path, keydir: &Keydir) -> Result<()> {
    let path = dir.join(segment::HINT_FILE_NAME);
    if !path.exists() {
        return Ok(());
    }
    let segment = Segment::open_named(dir, segment::HINT_FILE_NAME, IoBackend::Buffered)?;
    let mut offset = 0u64;
    loop {
        let (record, size) = match segment.read_record(offset) {
            Ok(v) => v,
            Err(e) if segment::is_eof(&e) => break,
            Err(e) => return Err(e),
        };
        if let Some(mut pos) = RecordPos::decode(&record.value) {
            pos.size = 0;
            keydir.put(record.key, pos)?;
        }
        offset += size;
    }
    Ok(())
}

const BTSN_FILE_NAME: &str = "btsn";

fn load_btsn_file(dir: &Path) -> Result<u64> {
    let path = dir.join(BTSN_FILE_NAME);
    if !path.exists() {
        return Ok(0);
    }
    let mut buf = [0u8; 8];
    {
        use std::io::Read;
        let mut f = std::fs::File::open(&path)?;
        f.read_exact(&mut buf)?;
    }
    std::fs::remove_file(&path)?;
    Ok(u64::from_be_bytes(buf))
}

fn write_btsn_file(dir: &Path, next_batch_seq: u64) -> Result<()> {
    use std::io::Write;
    let path = dir.join(BTSN_FILE_NAME);
    let mut f = std::fs::File::create(&path)?;
    f.write_all(&next_batch_seq.to_be_bytes())?;
    f.sync_all()?;
    Ok(())
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    Ok(out)
}
