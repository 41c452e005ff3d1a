//! In-memory adaptive radix tree keydir backend. Same recovery story as
//! [`super::btree`]: rebuilt by scanning the log on every open, but denser
//! and faster to walk for keys that share long common prefixes.

use radix_trie::{Trie, TrieCommon};

use crate::error::Result;
use crate::storage::log_record::RecordPos;

pub struct ArtIndex {
    trie: std::sync::RwLock<Trie<Vec<u8>, RecordPos>>,
}

impl ArtIndex {
    pub fn new() -> Self {
        Self { trie: std::sync::RwLock::new(Trie::new()) }
    }

    pub fn put(&self, key: Vec<u8>, pos: RecordPos) -> Option<RecordPos> {
        self.trie.write().unwrap().insert(key, pos)
    }

    pub fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.trie.read().unwrap().get(&key.to_vec()).copied()
    }

    pub fn delete(&self, key: &[u8]) -> (Option<RecordPos>, bool) {
        let prev = self.trie.write().unwrap().remove(&key.to_vec());
        let existed = prev.is_some();
        (prev, existed)
    }

    pub fn size(&self) -> usize {
        self.trie.read().unwrap().len()
    }

    /// `radix_trie` does not promise lexicographic traversal order, so the
    /// snapshot is explicitly sorted after collection — the keydir contract
    /// requires byte-lexicographic ordering regardless of backend.
    pub fn iterator(&self, reverse: bool) -> ArtIterator {
        let mut items: Vec<(Vec<u8>, RecordPos)> =
            self.trie.read().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        if reverse {
            items.reverse();
        }
        ArtIterator { items, reverse, pos: 0 }
    }

    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A cursor over a sorted snapshot taken at [`ArtIndex::iterator`] time.
pub struct ArtIterator {
    items: Vec<(Vec<u8>, RecordPos)>,
    reverse: bool,
    pos: usize,
}

impl ArtIterator {
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    pub fn seek(&mut self, key: &[u8]) {
        self.pos = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    pub fn next(&mut self) {
        if self.pos < self.items.len() {
            self.pos += 1;
        }
    }

    pub fn valid(&self) -> bool {
        self.pos < self.items.len()
    }

    pub fn key(&self) -> &[u8] {
        &self.items[self.pos].0
    }

    pub fn value(&self) -> RecordPos {
        self.items[self.pos].1
    }

    pub fn close(&mut self) {
        self.items.clear();
        self.pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: u64) -> RecordPos {
        RecordPos { segment_id: 0, offset, size: 0 }
    }

    #[test]
    fn put_get_delete() {
        let idx = ArtIndex::new();
        assert_eq!(idx.put(b"a".to_vec(), pos(1)), None);
        assert_eq!(idx.put(b"a".to_vec(), pos(2)), Some(pos(1)));
        assert_eq!(idx.get(b"a"), Some(pos(2)));
        assert_eq!(idx.delete(b"a"), (Some(pos(2)), true));
        assert_eq!(idx.get(b"a"), None);
    }

    #[test]
    fn iterator_is_lexicographically_sorted() {
        let idx = ArtIndex::new();
        for (k, v) in [("sex", 3), ("age", 1), ("name", 2)] {
            idx.put(k.as_bytes().to_vec(), pos(v));
        }
        let mut it = idx.iterator(false);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"age".to_vec(), b"name".to_vec(), b"sex".to_vec()]);
    }
}
