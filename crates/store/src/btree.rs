//! B-tree backend with implicit per-call transactions.
//!
//! Every point operation begins and finishes its own transaction, so a
//! caller never holds transactional state across calls. Cursors capture a
//! read snapshot when opened and keep it until dropped; they implement
//! stepping as bounded re-seeks from the last yielded key, which keeps the
//! cursor independent of any engine-side iterator lifetime.

use std::fs;
use std::ops::Bound;
use std::path::Path;

use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition};

use arbordb_types::BackendKind;

use crate::adapter::{Backend, BackendCursor, Entry};
use crate::error::{Error, Result};

const GLOBALS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("globals");

/// B-tree store over a single database file.
pub struct BtreeBackend {
    db: Database,
}

impl BtreeBackend {
    /// Opens or creates the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the file cannot be created or opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(Error::unavailable)?;
            }
        }
        let db = Database::create(path).map_err(Error::unavailable)?;

        // Make sure the table exists so read transactions never race its
        // first creation.
        let txn = db.begin_write().map_err(Error::backend)?;
        txn.open_table(GLOBALS).map_err(Error::backend)?;
        txn.commit().map_err(Error::backend)?;

        tracing::debug!(path = %path.display(), "opened btree backend");
        Ok(Self { db })
    }
}

impl Backend for BtreeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Btree
    }

    fn describe(&self) -> String {
        "btree (redb engine)".to_string()
    }

    fn get(&self, key: &[u8], out: &mut Vec<u8>) -> Result<bool> {
        out.clear();
        let txn = self.db.begin_read().map_err(Error::backend)?;
        let table = txn.open_table(GLOBALS).map_err(Error::backend)?;
        match table.get(key).map_err(Error::backend)? {
            Some(guard) => {
                out.extend_from_slice(guard.value());
                Ok(true)
            },
            None => Ok(false),
        }
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(Error::backend)?;
        {
            let mut table = txn.open_table(GLOBALS).map_err(Error::backend)?;
            table.insert(key, value).map_err(Error::backend)?;
        }
        txn.commit().map_err(Error::backend)
    }

    fn del(&self, key: &[u8]) -> Result<bool> {
        let txn = self.db.begin_write().map_err(Error::backend)?;
        let present = {
            let mut table = txn.open_table(GLOBALS).map_err(Error::backend)?;
            let removed = table.remove(key).map_err(Error::backend)?.is_some();
            removed
        };
        txn.commit().map_err(Error::backend)?;
        Ok(present)
    }

    fn del_many(&self, keys: &[Vec<u8>]) -> Result<u64> {
        let txn = self.db.begin_write().map_err(Error::backend)?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(GLOBALS).map_err(Error::backend)?;
            for key in keys {
                if table.remove(key.as_slice()).map_err(Error::backend)?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(Error::backend)?;
        Ok(removed)
    }

    fn cursor(&self) -> Result<Box<dyn BackendCursor>> {
        let txn = self.db.begin_read().map_err(Error::backend)?;
        let table = txn.open_table(GLOBALS).map_err(Error::backend)?;
        Ok(Box::new(BtreeCursor { _txn: txn, table, pos: None }))
    }

    fn close(&self) -> Result<()> {
        tracing::debug!("closing btree backend");
        Ok(())
    }
}

/// Cursor over one read snapshot of the B-tree.
struct BtreeCursor {
    // Retained so the snapshot outlives the table handle.
    _txn: ReadTransaction,
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    pos: Option<Vec<u8>>,
}

impl BtreeCursor {
    fn probe(
        &self,
        range: (Bound<&[u8]>, Bound<&[u8]>),
        backwards: bool,
    ) -> Result<Option<Entry>> {
        let mut iter = self.table.range::<&[u8]>(range).map_err(Error::backend)?;
        let item = if backwards { iter.next_back() } else { iter.next() };
        match item {
            Some(Ok((k, v))) => {
                Ok(Some(Entry { key: k.value().to_vec(), value: v.value().to_vec() }))
            },
            Some(Err(e)) => Err(Error::backend(e)),
            None => Ok(None),
        }
    }

    fn settle(&mut self, entry: Option<Entry>) -> Result<Option<Entry>> {
        self.pos = entry.as_ref().map(|e| e.key.clone());
        Ok(entry)
    }
}

impl BackendCursor for BtreeCursor {
    fn seek_ge(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let entry = self.probe((Bound::Included(key), Bound::Unbounded), false)?;
        self.settle(entry)
    }

    fn next(&mut self) -> Result<Option<Entry>> {
        let Some(pos) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = self.probe((Bound::Excluded(pos.as_slice()), Bound::Unbounded), false)?;
        self.settle(entry)
    }

    fn prev(&mut self) -> Result<Option<Entry>> {
        let Some(pos) = self.pos.clone() else {
            return Ok(None);
        };
        let entry = self.probe((Bound::Unbounded, Bound::Excluded(pos.as_slice())), true)?;
        self.settle(entry)
    }

    fn first(&mut self) -> Result<Option<Entry>> {
        let entry = match self.table.first().map_err(Error::backend)? {
            Some((k, v)) => Some(Entry { key: k.value().to_vec(), value: v.value().to_vec() }),
            None => None,
        };
        self.settle(entry)
    }

    fn last(&mut self) -> Result<Option<Entry>> {
        let entry = match self.table.last().map_err(Error::backend)? {
            Some((k, v)) => Some(Entry { key: k.value().to_vec(), value: v.value().to_vec() }),
            None => None,
        };
        self.settle(entry)
    }
}
