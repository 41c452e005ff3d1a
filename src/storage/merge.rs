//! Merge (compaction): rewrites live records from sealed segments into a
//! fresh `-merge` directory, emits a hint file, and commits with a
//! `merge-finished` marker. The actual swap into the live directory happens
//! lazily, the next time the engine is opened — see [`replay_pending_merge`].

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;

use log::{debug, info};

use super::engine::Engine;
use super::lock::LOCK_FILE_NAME;
use super::log_record::{LogRecord, RecordType};
use super::segment::{self, IoBackend, Segment};
use super::Options;
use crate::error::{Error, Result};

pub(crate) const MERGE_DIR_NAME: &str = "-merge";

/// Replays any merge left behind by a prior process, at the start of
/// [`Engine::open`]. If `<data_dir>/-merge/merge-finished` exists, the merge
/// completed: segments below the recorded boundary are deleted from the live
/// directory and the merge output takes their place. Otherwise any `-merge`
/// directory is leftover garbage from an interrupted merge and is discarded.
///
/// Returns the non-merged boundary if a merge was replayed, so the caller
/// knows to skip re-scanning the segments the merge already accounted for.
pub(crate) fn replay_pending_merge(data_dir: &Path) -> Result<Option<u32>> {
    let merge_dir = data_dir.join(MERGE_DIR_NAME);
    if !merge_dir.exists() {
        return Ok(None);
    }

    let finished_path = merge_dir.join(segment::MERGE_FINISHED_FILE_NAME);
    if !finished_path.exists() {
        debug!("discarding incomplete merge directory {}", merge_dir.display());
        fs::remove_dir_all(&merge_dir)?;
        return Ok(None);
    }

    let boundary = read_merge_finished_marker(&merge_dir)?;
    info!("replaying completed merge, non-merged boundary = {boundary}");

    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
        if let Ok(id) = segment::parse_segment_id(&name) {
            if id < boundary {
                fs::remove_file(entry.path())?;
            }
        }
    }

    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
        // The merge sub-engine's own lock and btsn files are private to its
        // (now-discarded) run; only the data files, hint file, and the
        // marker itself belong in the live directory.
        if name == LOCK_FILE_NAME || name == segment::BTSN_FILE_NAME {
            continue;
        }
        fs::rename(&path, data_dir.join(&name))?;
    }
    fs::remove_dir_all(&merge_dir)?;

    Ok(Some(boundary))
}

/// Runs a full merge pass against `engine`. Serialized by a CAS on
/// `is_merging`; a concurrent call fails with [`Error::MergeInProgress`].
pub(crate) fn merge(engine: &Engine) -> Result<()> {
    if engine.is_merging.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err()
    {
        return Err(Error::MergeInProgress);
    }
    let result = merge_inner(engine);
    engine.is_merging.store(false, Ordering::SeqCst);
    result
}

fn merge_inner(engine: &Engine) -> Result<()> {
    let data_dir = engine.options.data_dir.clone();

    // Step 1: seal the active segment and open a new one, under the write
    // lock. Everything below `non_merged_boundary` is eligible for merging
    // and is now stable — the active segment never participates.
    let (non_merged_boundary, candidate_ids) = {
        let mut state = engine.state.write().unwrap();
        if let Some(active) = &state.active {
            active.sync()?;
        }
        if let Some(active) = state.active.take() {
            state.sealed.insert(active.id, active);
        }
        let next_id = state.sealed.keys().next_back().map_or(0, |id| id + 1);
        state.active = Some(Segment::open(&data_dir, next_id, IoBackend::Buffered)?);
        let ids: Vec<u32> = state.sealed.keys().copied().filter(|&id| id < next_id).collect();
        (next_id, ids)
    };

    if candidate_ids.is_empty() {
        debug!("merge: nothing to merge");
        return Ok(());
    }

    let merge_dir = data_dir.join(MERGE_DIR_NAME);
    if merge_dir.exists() {
        fs::remove_dir_all(&merge_dir)?;
    }
    fs::create_dir_all(&merge_dir)?;

    let merge_options = Options {
        data_dir: merge_dir.clone(),
        max_file_size: engine.options.max_file_size,
        sync_every_write: false,
        ..Options::default()
    };
    let merge_engine = Engine::open(merge_options)?;
    let mut hint_segment = Segment::open_named(&merge_dir, segment::HINT_FILE_NAME, IoBackend::Buffered)?;

    let mut live_copied = 0u64;
    {
        let state = engine.state.read().unwrap();
        for id in candidate_ids {
            let segment = state.segment(id).ok_or(Error::DataFileNotFound(id))?;
            let mut offset = 0u64;
            loop {
                let (record, size) = match segment.read_record(offset) {
                    Ok(v) => v,
                    Err(e) if segment::is_eof(&e) => break,
                    Err(e) => return Err(e),
                };
                if record.record_type == RecordType::Normal {
                    if let Some(current) = engine.keydir.get(&record.key)? {
                        if current.segment_id == id && current.offset == offset {
                            let rewritten = LogRecord::normal(record.key.clone(), record.value, 0);
                            let new_pos = merge_engine.append_log_record(&rewritten)?;
                            hint_segment.write_hint(&record.key, new_pos)?;
                            live_copied += 1;
                        }
                    }
                }
                offset += size;
            }
        }
    }

    merge_engine.sync()?;
    hint_segment.sync()?;
    write_merge_finished_marker(&merge_dir, non_merged_boundary)?;
    merge_engine.close()?;

    info!("merge finished: {live_copied} live record(s) rewritten, boundary = {non_merged_boundary}");
    Ok(())
}

fn read_merge_finished_marker(merge_dir: &Path) -> Result<u32> {
    let segment = Segment::open_named(merge_dir, segment::MERGE_FINISHED_FILE_NAME, IoBackend::Buffered)?;
    let (record, _) = segment.read_record(0)?;
    let bytes: [u8; 4] = record
        .value
        .as_slice()
        .try_into()
        .map_err(|_| Error::DataFileCorrupt("malformed merge-finished marker".into()))?;
    Ok(u32::from_be_bytes(bytes))
}

fn write_merge_finished_marker(merge_dir: &Path, boundary: u32) -> Result<()> {
    let mut segment =
        Segment::open_named(merge_dir, segment::MERGE_FINISHED_FILE_NAME, IoBackend::Buffered)?;
    let record = LogRecord::normal(Vec::new(), boundary.to_be_bytes().to_vec(), 0);
    let (encoded, _) = record.encode();
    segment.append(&encoded)?;
    segment.sync()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::Options;
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, max_file_size: u64) -> Engine {
        let options =
            Options { data_dir: dir.path().to_path_buf(), max_file_size, ..Options::default() };
        Engine::open(options).unwrap()
    }

    #[test]
    fn merge_preserves_live_values_and_reclaims_garbage() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 4096);

        for i in 0..200 {
            engine.put(format!("key{i}").as_bytes(), format!("value{i}").as_bytes()).unwrap();
        }
        for i in 0..200 {
            engine.put(format!("key{i}").as_bytes(), format!("overwritten{i}").as_bytes()).unwrap();
        }
        for i in (0..200).step_by(3) {
            engine.delete(format!("key{i}").as_bytes()).unwrap();
        }

        engine.merge().unwrap();
        engine.close().unwrap();

        let reopened = open(&dir, 4096);
        for i in 0..200 {
            let key = format!("key{i}");
            if i % 3 == 0 {
                assert!(matches!(reopened.get(key.as_bytes()), Err(Error::KeyNotFound)));
            } else {
                assert_eq!(reopened.get(key.as_bytes()).unwrap(), format!("overwritten{i}").into_bytes());
            }
        }
        assert_eq!(reopened.stat().unwrap().reclaimable_bytes, 0);
    }

    #[test]
    fn concurrent_merge_is_rejected() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1 << 20);
        engine.put(b"a", b"1").unwrap();
        engine.is_merging.store(true, Ordering::SeqCst);
        assert!(matches!(merge(&engine), Err(Error::MergeInProgress)));
        engine.is_merging.store(false, Ordering::SeqCst);
    }

    #[test]
    fn merge_with_no_sealed_segments_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let engine = open(&dir, 1 << 20);
        engine.put(b"a", b"1").unwrap();
        engine.merge().unwrap();
        assert_eq!(engine.get(b"a").unwrap(), b"1");
    }
}
