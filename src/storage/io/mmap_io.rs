use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use memmap2::Mmap;

use super::IOManager;
use crate::error::{Error, Result};

/// A read-only memory-mapped view of a file, used only to accelerate the
/// initial recovery scan. Every write-path method fails or no-ops; the
/// engine must switch a segment back to [`super::FileIO`] before accepting
/// writes (see `Engine::open`).
pub struct MmapIO {
    mmap: Mutex<Option<Mmap>>,
}

impl MmapIO {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).create(true).open(path)?;
        let len = file.metadata()?.len();
        // mmap of a zero-length file is invalid on most platforms; treat it
        // as "no mapping yet" and fall back to reporting a zero size.
        let mmap = if len == 0 { None } else { Some(unsafe { Mmap::map(&file)? }) };
        Ok(Self { mmap: Mutex::new(mmap) })
    }
}

impl IOManager for MmapIO {
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let guard = self.mmap.lock().unwrap();
        let Some(mmap) = guard.as_ref() else { return Ok(0) };
        let offset = offset as usize;
        if offset >= mmap.len() {
            return Ok(0);
        }
        let n = buf.len().min(mmap.len() - offset);
        buf[..n].copy_from_slice(&mmap[offset..offset + n]);
        Ok(n)
    }

    fn append(&self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "mmap io manager is read-only",
        )))
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        let guard = self.mmap.lock().unwrap();
        Ok(guard.as_ref().map_or(0, |m| m.len() as u64))
    }

    fn close(&self) -> Result<()> {
        *self.mmap.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn reads_back_written_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("000000000.data");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(b"hello world").unwrap();
        }
        let io = MmapIO::open(&path).unwrap();
        let mut buf = [0u8; 5];
        io.read(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(io.size().unwrap(), 11);
    }
}
