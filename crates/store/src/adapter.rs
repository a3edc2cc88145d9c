//! The uniform backend interface.
//!
//! Transaction scoping is an implementation detail of each backend: the
//! B-tree engine wraps every point call in its own transaction, while the
//! mmap engine keeps a read transaction alive inside each cursor. Callers
//! see only this trait.

use arbordb_types::BackendKind;

use crate::error::Result;

/// One key/value pair copied out of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The full key bytes.
    pub key: Vec<u8>,
    /// The value bytes.
    pub value: Vec<u8>,
}

/// Uniform operation set over an ordered byte-keyed store.
///
/// Implementations are internally oblivious to concurrency; callers
/// serialize access (or not) above this trait.
pub trait Backend: Send + Sync {
    /// Which engine this is.
    fn kind(&self) -> BackendKind;

    /// Human-readable engine description for version strings.
    fn describe(&self) -> String;

    /// Reads the value for `key` into `out`, returning false when the key
    /// is absent. `out` is cleared first; absent keys leave it empty.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on any engine failure other than not-found.
    fn get(&self, key: &[u8], out: &mut Vec<u8>) -> Result<bool>;

    /// Stores `value` under `key`, replacing any existing value.
    ///
    /// # Errors
    ///
    /// Returns `Backend` or `TxnConflict` on engine failure.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Deletes `key`, returning whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `Backend` or `TxnConflict` on engine failure.
    fn del(&self, key: &[u8]) -> Result<bool>;

    /// Deletes a batch of keys inside one write transaction, returning
    /// how many were present.
    ///
    /// # Errors
    ///
    /// Returns `Backend` or `TxnConflict` on engine failure.
    fn del_many(&self, keys: &[Vec<u8>]) -> Result<u64>;

    /// Opens a cursor over a stable snapshot of the store. The cursor
    /// owns its snapshot, so it may outlive the borrow used to open it.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the snapshot cannot be created.
    fn cursor(&self) -> Result<Box<dyn BackendCursor>>;

    /// Flushes and releases engine resources. Dropping the backend has
    /// the same effect; this exists so teardown failures are observable.
    ///
    /// # Errors
    ///
    /// Returns `Backend` if the engine reports a teardown failure.
    fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind()).finish_non_exhaustive()
    }
}

/// A positioned cursor over the ordered key space.
///
/// Every method copies the yielded key and value into owned buffers
/// before returning, so entries stay valid after the cursor moves or
/// closes. Step methods on an unpositioned cursor return `None`.
pub trait BackendCursor {
    /// Positions at the first key `>=` the probe.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on engine failure.
    fn seek_ge(&mut self, key: &[u8]) -> Result<Option<Entry>>;

    /// Steps to the key after the current position.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on engine failure.
    fn next(&mut self) -> Result<Option<Entry>>;

    /// Steps to the key before the current position.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on engine failure.
    fn prev(&mut self) -> Result<Option<Entry>>;

    /// Positions at the first key in the store.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on engine failure.
    fn first(&mut self) -> Result<Option<Entry>>;

    /// Positions at the last key in the store.
    ///
    /// # Errors
    ///
    /// Returns `Backend` on engine failure.
    fn last(&mut self) -> Result<Option<Entry>>;
}
