//! The keydir: the engine's key → record-position map, plus a read-only
//! snapshot cursor over it.
//!
//! Three backends exist (ordered in-memory tree, adaptive radix tree,
//! on-disk B+-tree) but they are not exposed as trait objects. Per the
//! design notes this is a closed set, so it is expressed as a tagged enum:
//! callers pick a backend once at [`Keydir::open`] and every subsequent call
//! is a direct match with no dynamic dispatch.

mod art;
mod bplustree;
mod btree;

pub use bplustree::BPlusTreeOptions;

use std::path::Path;

use crate::error::Result;
use crate::storage::log_record::RecordPos;

/// Selects which keydir backend an [`crate::storage::Options`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// In-memory `BTreeMap`. Rebuilt by scanning the log on every open.
    #[default]
    BTree,
    /// In-memory adaptive radix tree. Also rebuilt by scanning the log.
    Art,
    /// On-disk B+-tree (via `sled`). Durable across restarts; the only
    /// backend that consults the `btsn` file.
    BPlusTree,
}

/// Ordered key → [`RecordPos`] map. See module docs for why this is an enum
/// rather than `Box<dyn Trait>`.
pub enum Keydir {
    BTree(btree::BTreeIndex),
    Art(art::ArtIndex),
    BPlusTree(bplustree::BPlusTreeIndex),
}

impl Keydir {
    /// Opens the backend selected by `index_type`. `dir` is the engine's
    /// data directory; only the B+-tree backend uses it.
    pub fn open(index_type: IndexType, dir: &Path, opts: &BPlusTreeOptions) -> Result<Self> {
        Ok(match index_type {
            IndexType::BTree => Keydir::BTree(btree::BTreeIndex::new()),
            IndexType::Art => Keydir::Art(art::ArtIndex::new()),
            IndexType::BPlusTree => Keydir::BPlusTree(bplustree::BPlusTreeIndex::open(dir, opts)?),
        })
    }

    /// Replaces any existing entry for `key`, returning it so the engine can
    /// credit `reclaim_size`.
    pub fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        match self {
            Keydir::BTree(i) => Ok(i.put(key, pos)),
            Keydir::Art(i) => Ok(i.put(key, pos)),
            Keydir::BPlusTree(i) => i.put(key, pos),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        match self {
            Keydir::BTree(i) => Ok(i.get(key)),
            Keydir::Art(i) => Ok(i.get(key)),
            Keydir::BPlusTree(i) => i.get(key),
        }
    }

    /// Removes `key`, reporting whether it was present so the engine can
    /// distinguish a real delete from a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<(Option<RecordPos>, bool)> {
        match self {
            Keydir::BTree(i) => Ok(i.delete(key)),
            Keydir::Art(i) => Ok(i.delete(key)),
            Keydir::BPlusTree(i) => i.delete(key),
        }
    }

    pub fn size(&self) -> Result<usize> {
        match self {
            Keydir::BTree(i) => Ok(i.size()),
            Keydir::Art(i) => Ok(i.size()),
            Keydir::BPlusTree(i) => i.size(),
        }
    }

    /// Takes a read-only snapshot cursor, ascending unless `reverse`.
    pub fn iterator(&self, reverse: bool) -> Result<KeydirIterator> {
        Ok(match self {
            Keydir::BTree(i) => KeydirIterator::BTree(i.iterator(reverse)),
            Keydir::Art(i) => KeydirIterator::Art(i.iterator(reverse)),
            Keydir::BPlusTree(i) => KeydirIterator::BPlusTree(i.iterator(reverse)?),
        })
    }

    pub fn close(&self) -> Result<()> {
        match self {
            Keydir::BTree(i) => i.close(),
            Keydir::Art(i) => i.close(),
            Keydir::BPlusTree(i) => i.close(),
        }
    }
}

/// A read-only snapshot cursor, fixed at the keys present when
/// [`Keydir::iterator`] was called. Concurrent writers do not invalidate it.
pub enum KeydirIterator {
    BTree(btree::BTreeIterator),
    Art(art::ArtIterator),
    BPlusTree(bplustree::BPlusTreeIterator),
}

impl KeydirIterator {
    /// Resets the cursor to the first key in its direction.
    pub fn rewind(&mut self) {
        match self {
            Self::BTree(it) => it.rewind(),
            Self::Art(it) => it.rewind(),
            Self::BPlusTree(it) => it.rewind(),
        }
    }

    /// Positions the cursor at the first key `>= target` (forward) or
    /// `<= target` (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        match self {
            Self::BTree(it) => it.seek(key),
            Self::Art(it) => it.seek(key),
            Self::BPlusTree(it) => it.seek(key),
        }
    }

    pub fn next(&mut self) {
        match self {
            Self::BTree(it) => it.next(),
            Self::Art(it) => it.next(),
            Self::BPlusTree(it) => it.next(),
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            Self::BTree(it) => it.valid(),
            Self::Art(it) => it.valid(),
            Self::BPlusTree(it) => it.valid(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Self::BTree(it) => it.key(),
            Self::Art(it) => it.key(),
            Self::BPlusTree(it) => it.key(),
        }
    }

    pub fn value(&self) -> RecordPos {
        match self {
            Self::BTree(it) => it.value(),
            Self::Art(it) => it.value(),
            Self::BPlusTree(it) => it.value(),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::BTree(it) => it.close(),
            Self::Art(it) => it.close(),
            Self::BPlusTree(it) => it.close(),
        }
    }
}
