//! The user-facing iterator: a keydir cursor plus a prefix filter and
//! on-demand value resolution against the engine.

use std::sync::Mutex;

use super::index::KeydirIterator;
use super::{Engine, IteratorOptions};
use crate::error::Result;

/// Ordered traversal over live keys, optionally filtered to a prefix and
/// optionally reversed. A snapshot of the keydir as of [`Engine::new_iterator`]
/// — concurrent writers do not change what it sees.
pub struct Iterator<'a> {
    engine: &'a Engine,
    options: IteratorOptions,
    cursor: Mutex<KeydirIterator>,
}

impl<'a> Iterator<'a> {
    pub(crate) fn new(engine: &'a Engine, options: IteratorOptions) -> Result<Self> {
        let mut cursor = engine.keydir.iterator(options.reverse)?;
        cursor.rewind();
        let it = Self { engine, options, cursor: Mutex::new(cursor) };
        it.skip_to_matching_prefix();
        Ok(it)
    }

    /// Resets the cursor to the first matching key.
    pub fn rewind(&self) {
        self.cursor.lock().unwrap().rewind();
        self.skip_to_matching_prefix();
    }

    /// Positions the cursor at the first matching key `>= target` (forward)
    /// or `<= target` (reverse).
    pub fn seek(&self, key: &[u8]) {
        self.cursor.lock().unwrap().seek(key);
        self.skip_to_matching_prefix();
    }

    /// Advances to the next matching key.
    pub fn next(&self) {
        self.cursor.lock().unwrap().next();
        self.skip_to_matching_prefix();
    }

    pub fn valid(&self) -> bool {
        self.cursor.lock().unwrap().valid()
    }

    /// The current key, or `None` once the iterator is exhausted.
    pub fn key(&self) -> Option<Vec<u8>> {
        let cursor = self.cursor.lock().unwrap();
        cursor.valid().then(|| cursor.key().to_vec())
    }

    /// Reads the current key's value from disk under a read lock.
    pub fn value(&self) -> Result<Option<Vec<u8>>> {
        let pos = {
            let cursor = self.cursor.lock().unwrap();
            if !cursor.valid() {
                return Ok(None);
            }
            cursor.value()
        };
        Ok(Some(self.engine.read_value_at(pos)?))
    }

    pub fn close(&self) {
        self.cursor.lock().unwrap().close();
    }

    /// Advances past any key that doesn't match the configured prefix. A
    /// no-op when no prefix was configured.
    fn skip_to_matching_prefix(&self) {
        if self.options.prefix.is_empty() {
            return;
        }
        let mut cursor = self.cursor.lock().unwrap();
        while cursor.valid() && !cursor.key().starts_with(self.options.prefix.as_slice()) {
            cursor.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{IteratorOptions, Options};
    use super::*;
    use tempfile::TempDir;

    fn populate() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let options = Options { data_dir: dir.path().to_path_buf(), ..Options::default() };
        let engine = Engine::open(options).unwrap();
        engine.put(b"name", b"zhangSan").unwrap();
        engine.put(b"age", b"18").unwrap();
        engine.put(b"sex", b"1").unwrap();
        (dir, engine)
    }

    #[test]
    fn forward_order_is_lexicographic() {
        let (_dir, engine) = populate();
        let it = engine.new_iterator(IteratorOptions::default()).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().unwrap());
            it.next();
        }
        assert_eq!(keys, vec![b"age".to_vec(), b"name".to_vec(), b"sex".to_vec()]);
    }

    #[test]
    fn reverse_order_is_non_increasing() {
        let (_dir, engine) = populate();
        let options = IteratorOptions { prefix: Vec::new(), reverse: true };
        let it = engine.new_iterator(options).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().unwrap());
            it.next();
        }
        assert_eq!(keys, vec![b"sex".to_vec(), b"name".to_vec(), b"age".to_vec()]);
    }

    #[test]
    fn prefix_filters_to_matching_keys_only() {
        let (_dir, engine) = populate();
        let options = IteratorOptions { prefix: b"n".to_vec(), reverse: false };
        let it = engine.new_iterator(options).unwrap();
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().unwrap());
            it.next();
        }
        assert_eq!(keys, vec![b"name".to_vec()]);
    }

    #[test]
    fn value_reads_from_disk() {
        let (_dir, engine) = populate();
        let it = engine.new_iterator(IteratorOptions::default()).unwrap();
        it.seek(b"name");
        assert_eq!(it.value().unwrap(), Some(b"zhangSan".to_vec()));
    }
}
