//! Atomic batch writes (mini-transactions) layered on top of the engine's
//! append path. The log is the WAL: a batch's records share one `batch_seq`
//! and are committed by a trailing `BatchEnd` record recovery looks for.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::log_record::LogRecord;
use super::{Engine, WriteBatchOptions};
use crate::error::{Error, Result};

/// A staged operation, keyed by the key it applies to so a later `Put`/
/// `Delete` within the same batch simply overwrites the earlier one
/// (last-write-wins within the batch).
#[derive(Clone)]
enum PendingOp {
    Put(Vec<u8>),
    Delete,
}

/// Buffers `Put`/`Delete` calls and applies them to the log and keydir
/// together on [`WriteBatch::commit`]. A `BTreeMap` keeps the staged keys in
/// byte-lexicographic order, so two commits of the same staged mapping
/// always produce the same on-disk byte layout regardless of call order.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<BTreeMap<Vec<u8>, PendingOp>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(engine: &'a Engine, options: WriteBatchOptions) -> Self {
        Self { engine, options, pending: Mutex::new(BTreeMap::new()) }
    }

    /// Stages a `Put`. Not visible to `Get` until [`Self::commit`] succeeds.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        self.pending.lock().unwrap().insert(key.to_vec(), PendingOp::Put(value.to_vec()));
        Ok(())
    }

    /// Stages a `Delete`. If the key has no live entry in the keydir yet
    /// (i.e. it only exists as a `Put` staged earlier in this same batch),
    /// the staged `Put` is simply dropped — nothing durable refers to the
    /// key yet, so no tombstone is needed. Otherwise a tombstone is staged.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyEmpty);
        }
        let mut pending = self.pending.lock().unwrap();
        if self.engine.keydir.get(key)?.is_none() {
            pending.remove(key);
        } else {
            pending.insert(key.to_vec(), PendingOp::Delete);
        }
        Ok(())
    }

    /// Commits the staged operations as one contiguous run of log records
    /// terminated by a `BatchEnd`, then applies them to the keydir. Clears
    /// the staging buffer on success, so the same batch can be reused.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxWriteBatchNum);
        }

        let mut state = self.engine.state.write().unwrap();
        let batch_seq = self.engine.fetch_next_batch_seq();

        let mut applied = Vec::with_capacity(pending.len());
        for (key, op) in pending.iter() {
            let record = match op {
                PendingOp::Put(value) => LogRecord::normal(key.clone(), value.clone(), batch_seq),
                PendingOp::Delete => LogRecord::tombstone(key.clone(), batch_seq),
            };
            let pos = self.engine.append_log_record_locked(&mut state, &record)?;
            applied.push((key.clone(), op.clone(), pos));
        }

        let end_record = LogRecord::batch_end(batch_seq);
        self.engine.append_log_record_locked(&mut state, &end_record)?;

        if self.options.sync_writes {
            if let Some(active) = &state.active {
                active.sync()?;
            }
        }

        for (key, op, pos) in applied {
            match op {
                PendingOp::Put(_) => {
                    if let Some(prev) = self.engine.keydir.put(key, pos)? {
                        self.engine.credit_reclaim(prev.size);
                    }
                }
                PendingOp::Delete => {
                    self.engine.credit_reclaim(pos.size);
                    if let (Some(prev), _) = self.engine.keydir.delete(&key)? {
                        self.engine.credit_reclaim(prev.size);
                    }
                }
            }
        }

        drop(state);
        pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Options, WriteBatchOptions};
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Engine {
        let options = Options { data_dir: dir.path().to_path_buf(), ..Options::default() };
        Engine::open(options).unwrap()
    }

    #[test]
    fn uncommitted_batch_is_invisible() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"name", b"zhangSan").unwrap();
        assert!(matches!(engine.get(b"name"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn commit_applies_puts_and_deletes() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"name", b"zhangSan").unwrap();
        batch.put(b"age", b"18").unwrap();
        batch.put(b"sex", b"1").unwrap();
        batch.delete(b"age").unwrap();
        batch.commit().unwrap();

        assert_eq!(engine.get(b"name").unwrap(), b"zhangSan");
        assert!(matches!(engine.get(b"age"), Err(Error::KeyNotFound)));
        assert_eq!(engine.get(b"sex").unwrap(), b"1");
    }

    #[test]
    fn delete_of_batch_local_put_drops_without_tombstone() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.put(b"fresh", b"v").unwrap();
        batch.delete(b"fresh").unwrap();
        batch.commit().unwrap();
        assert!(matches!(engine.get(b"fresh"), Err(Error::KeyNotFound)));
    }

    #[test]
    fn empty_commit_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let batch = engine.new_write_batch(WriteBatchOptions::default());
        batch.commit().unwrap();
    }

    #[test]
    fn exceeding_max_batch_num_fails() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let options = WriteBatchOptions { max_batch_num: 1, sync_writes: false };
        let batch = engine.new_write_batch(options);
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        assert!(matches!(batch.commit(), Err(Error::ExceedMaxWriteBatchNum)));
    }

    #[test]
    fn batch_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = engine(&dir);
            let batch = engine.new_write_batch(WriteBatchOptions::default());
            batch.put(b"name", b"zhangSan").unwrap();
            batch.put(b"age", b"18").unwrap();
            batch.commit().unwrap();
            engine.close().unwrap();
        }
        let reopened = engine(&dir);
        assert_eq!(reopened.get(b"name").unwrap(), b"zhangSan");
        assert_eq!(reopened.get(b"age").unwrap(), b"18");
    }
}
