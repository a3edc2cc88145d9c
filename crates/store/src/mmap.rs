//! Memory-mapped B+tree backend with explicit transactions.
//!
//! Reads and writes each run inside their own transaction. A write
//! transaction commits on success and aborts (drops) on any error, so a
//! failed batch leaves the map untouched. Cursors begin a read
//! transaction when opened and hold it until dropped, which pins the
//! snapshot the traversal runs against.
//!
//! The engine hands out references into the map that are only valid while
//! the owning transaction lives; every method here copies key and value
//! bytes into owned buffers before they cross the adapter boundary.

use std::fs;
use std::ops::Bound;
use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use arbordb_types::BackendKind;

use crate::adapter::{Backend, BackendCursor, Entry};
use crate::error::{Error, Result};

const MAX_DBS: u32 = 4;

/// Memory-mapped store over an environment directory.
pub struct MmapBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl MmapBackend {
    /// Opens or creates the environment at `dir` with the given map size.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the environment cannot be created or
    /// opened.
    pub fn open(dir: &Path, map_size: usize) -> Result<Self> {
        fs::create_dir_all(dir).map_err(Error::unavailable)?;
        // Safety contract of the engine: the environment directory must
        // not be opened twice in one process, which the registry above
        // this type guarantees.
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(MAX_DBS).open(dir) }
            .map_err(Error::unavailable)?;

        let mut wtxn = env.write_txn().map_err(Error::backend)?;
        let db = env
            .create_database::<Bytes, Bytes>(&mut wtxn, Some("globals"))
            .map_err(Error::backend)?;
        wtxn.commit().map_err(Error::backend)?;

        tracing::debug!(dir = %dir.display(), "opened mmap backend");
        Ok(Self { env, db })
    }
}

impl Backend for MmapBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Mmap
    }

    fn describe(&self) -> String {
        "mmap (LMDB engine via heed)".to_string()
    }

    fn get(&self, key: &[u8], out: &mut Vec<u8>) -> Result<bool> {
        out.clear();
        let rtxn = self.env.read_txn().map_err(Error::backend)?;
        match self.db.get(&rtxn, key).map_err(Error::backend)? {
            Some(value) => {
                out.extend_from_slice(value);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut wtxn = self.env.write_txn().map_err(Error::backend)?;
        self.db.put(&mut wtxn, key, value).map_err(Error::backend)?;
        wtxn.commit().map_err(Error::backend)
    }

    fn del(&self, key: &[u8]) -> Result<bool> {
        let mut wtxn = self.env.write_txn().map_err(Error::backend)?;
        let present = self.db.delete(&mut wtxn, key).map_err(Error::backend)?;
        wtxn.commit().map_err(Error::backend)?;
        Ok(present)
    }

    fn del_many(&self, keys: &[Vec<u8>]) -> Result<u64> {
        let mut wtxn = self.env.write_txn().map_err(Error::backend)?;
        let mut removed = 0;
        for key in keys {
            if self.db.delete(&mut wtxn, key).map_err(Error::backend)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(Error::backend)?;
        Ok(removed)
    }

    fn cursor(&self) -> Result<Box<dyn BackendCursor>> {
        let rtxn = self.env.clone().static_read_txn().map_err(Error::backend)?;
        Ok(Box::new(MmapCursor { rtxn, db: self.db, pos: None }))
    }

    fn close(&self) -> Result<()> {
        self.env.force_sync().map_err(Error::backend)?;
        tracing::debug!("closing mmap backend");
        Ok(())
    }
}

/// Cursor pinning one read transaction for its whole lifetime.
struct MmapCursor {
    rtxn: RoTxn<'static>,
    db: Database<Bytes, Bytes>,
    pos: Option<Vec<u8>>,
}

impl MmapCursor {
    fn forward(&self, range: (Bound<&[u8]>, Bound<&[u8]>)) -> Result<Option<Entry>> {
        let mut iter = self.db.range(&self.rtxn, &range).map_err(Error::backend)?;
        match iter.next() {
            Some(Ok((k, v))) => Ok(Some(Entry { key: k.to_vec(), value: v.to_vec() })),
            Some(Err(e)) => Err(Error::backend(e)),
            None => Ok(None),
        }
    }

    fn backward(&self, range: (Bound<&[u8]>, Bound<&[u8]>)) -> Result<Option<Entry>> {
        let mut iter = self.db.rev_range(&self.rtxn, &range).map_err(Error::backend)?;
        match iter.next() {
            Some(Ok((k, v))) => Ok(Some(Entry { key: k.to_vec(), value: v.to_vec() })),
            Some(Err(e)) => Err(Error::backend(e)),
            None => Ok(None),
        }
    }

    fn settle(&mut self, entry: Option<Entry>) -> Result<Option<Entry>> {
        self.pos = entry.as_ref().map(|e| e.key.clone());
        Ok(entry)
    }
}

impl BackendCursor for MmapCursor {
    fn seek_ge(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let entry = self.forward((Bound::Included(key), Bound::Unbounded))?;
        self.settle(entry)
    }

    fn next(&mut self) -> Result<Option<Entry>> {
        let Some(pos) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = self.forward((Bound::Excluded(pos.as_slice()), Bound::Unbounded))?;
        self.settle(entry)
    }

    fn prev(&mut self) -> Result<Option<Entry>> {
        let Some(pos) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = self.backward((Bound::Unbounded, Bound::Excluded(pos.as_slice())))?;
        self.settle(entry)
    }

    fn first(&mut self) -> Result<Option<Entry>> {
        let entry = match self.db.first(&self.rtxn).map_err(Error::backend)? {
            Some((k, v)) => Some(Entry { key: k.to_vec(), value: v.to_vec() }),
            None => None,
        };
        self.settle(entry)
    }

    fn last(&mut self) -> Result<Option<Entry>> {
        let entry = match self.db.last(&self.rtxn).map_err(Error::backend)? {
            Some((k, v)) => Some(Entry { key: k.to_vec(), value: v.to_vec() }),
            None => None,
        };
        self.settle(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, MmapBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = MmapBackend::open(dir.path(), 16 * 1024 * 1024).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_put_get_del() {
        let (_dir, b) = open_temp();
        let mut out = Vec::new();

        assert!(!b.get(b"k", &mut out).unwrap());
        b.put(b"k", b"v").unwrap();
        assert!(b.get(b"k", &mut out).unwrap());
        assert_eq!(out, b"v");

        assert!(b.del(b"k").unwrap());
        assert!(!b.del(b"k").unwrap());
    }

    #[test]
    fn test_cursor_pins_snapshot() {
        let (_dir, b) = open_temp();
        b.put(b"a", b"1").unwrap();
        b.put(b"c", b"2").unwrap();

        let mut cur = b.cursor().unwrap();
        assert_eq!(cur.seek_ge(b"a").unwrap().unwrap().key, b"a");

        // A write committed after the cursor's snapshot is invisible to it.
        b.put(b"b", b"mid").unwrap();
        assert_eq!(cur.next().unwrap().unwrap().key, b"c");

        // A fresh cursor sees it.
        drop(cur);
        let mut cur = b.cursor().unwrap();
        assert_eq!(cur.seek_ge(b"b").unwrap().unwrap().key, b"b");
    }

    #[test]
    fn test_cursor_step_both_ways() {
        let (_dir, b) = open_temp();
        for (k, v) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
            b.put(k, v).unwrap();
        }
        let mut cur = b.cursor().unwrap();
        assert_eq!(cur.first().unwrap().unwrap().key, b"a");
        assert_eq!(cur.next().unwrap().unwrap().key, b"b");
        assert_eq!(cur.next().unwrap().unwrap().key, b"c");
        assert!(cur.next().unwrap().is_none());
        assert_eq!(cur.last().unwrap().unwrap().key, b"c");
        assert_eq!(cur.prev().unwrap().unwrap().key, b"b");
        assert_eq!(cur.prev().unwrap().unwrap().key, b"a");
        assert!(cur.prev().unwrap().is_none());
    }

    #[test]
    fn test_entries_outlive_cursor() {
        let (_dir, b) = open_temp();
        b.put(b"k", b"value-bytes").unwrap();
        let entry = {
            let mut cur = b.cursor().unwrap();
            cur.seek_ge(b"k").unwrap().unwrap()
        };
        // The copy must stay valid after the read txn is gone.
        assert_eq!(entry.value, b"value-bytes");
    }

    #[test]
    fn test_del_many_is_one_transaction() {
        let (_dir, b) = open_temp();
        b.put(b"a", b"1").unwrap();
        b.put(b"b", b"2").unwrap();
        assert_eq!(b.del_many(&[b"a".to_vec(), b"b".to_vec()]).unwrap(), 2);
        let mut out = Vec::new();
        assert!(!b.get(b"a", &mut out).unwrap());
        assert!(!b.get(b"b", &mut out).unwrap());
    }

    #[test]
    fn test_write_while_cursor_open() {
        // A cursor's read txn must not block point writes.
        let (_dir, b) = open_temp();
        b.put(b"a", b"1").unwrap();
        let mut cur = b.cursor().unwrap();
        assert!(cur.seek_ge(b"a").unwrap().is_some());
        b.put(b"b", b"2").unwrap();
        b.del(b"a").unwrap();
        drop(cur);
        let mut out = Vec::new();
        assert!(b.get(b"b", &mut out).unwrap());
    }
}
