//! In-memory ordered keydir backend, backed by a `BTreeMap`. The default:
//! cheap, rebuilt by scanning the log on every open.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::storage::log_record::RecordPos;

pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }

    pub fn put(&self, key: Vec<u8>, pos: RecordPos) -> Option<RecordPos> {
        self.tree.write().unwrap().insert(key, pos)
    }

    pub fn get(&self, key: &[u8]) -> Option<RecordPos> {
        self.tree.read().unwrap().get(key).copied()
    }

    pub fn delete(&self, key: &[u8]) -> (Option<RecordPos>, bool) {
        let prev = self.tree.write().unwrap().remove(key);
        let existed = prev.is_some();
        (prev, existed)
    }

    pub fn size(&self) -> usize {
        self.tree.read().unwrap().len()
    }

    /// Copies the current keys and positions into a sorted vector, then
    /// hands out a cursor over that snapshot.
    pub fn iterator(&self, reverse: bool) -> BTreeIterator {
        let mut items: Vec<(Vec<u8>, RecordPos)> =
            self.tree.read().unwrap().iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        BTreeIterator { items, reverse, pos: 0 }
    }

    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A cursor over a sorted snapshot taken at [`BTreeIndex::iterator`] time.
pub struct BTreeIterator {
    items: Vec<(Vec<u8>, RecordPos)>,
    reverse: bool,
    pos: usize,
}

impl BTreeIterator {
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
    fn put_returns_prior_entry() {
        let idx = BTreeIndex::new();
        assert_eq!(idx.put(b"a".to_vec(), pos(1)), None);
        assert_eq!(idx.put(b"a".to_vec(), pos(2)), Some(pos(1)));
        assert_eq!(idx.get(b"a"), Some(pos(2)));
    }

    #[test]
    fn delete_reports_existence() {
        let idx = BTreeIndex::new();
        idx.put(b"a".to_vec(), pos(1));
        assert_eq!(idx.delete(b"a"), (Some(pos(1)), true));
        assert_eq!(idx.delete(b"a"), (None, false));
    }

    #[test]
    fn iterator_orders_and_seeks() {
        let idx = BTreeIndex::new();
        for (k, v) in [("age", 1), ("name", 2), ("sex", 3)] {
            idx.put(k.as_bytes().to_vec(), pos(v));
        }

        let mut it = idx.iterator(false);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"age".to_vec(), b"name".to_vec(), b"sex".to_vec()]);

        let mut it = idx.iterator(true);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"sex".to_vec(), b"name".to_vec(), b"age".to_vec()]);

        let mut it = idx.iterator(false);
        it.seek(b"n");
        assert_eq!(it.key(), b"name");
    }
}
