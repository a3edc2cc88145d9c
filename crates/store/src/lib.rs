//! arbordb-store: one ordered-store interface over two engines.
//!
//! The [`Backend`] trait exposes the primitive operation set the access
//! layer is built on: point `get`/`put`/`del` plus a seekable cursor.
//! Behind it sit two engines with very different transaction contracts:
//!
//! - [`BtreeBackend`] — a B-tree store. Point operations open and finish a
//!   transaction internally, so the caller sees standalone calls. Cursors
//!   carry their own read snapshot and do not need a caller transaction.
//! - [`MmapBackend`] — a memory-mapped B+tree store. Every read or write
//!   runs inside an explicit transaction; cursors pin a read transaction
//!   for as long as they live, and everything read out of the map is
//!   copied to owned buffers before it crosses the adapter boundary.
//!
//! A process holds at most one live engine at a time; see [`registry`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod btree;
pub mod error;
pub mod mmap;
pub mod registry;

pub use adapter::{Backend, BackendCursor, Entry};
pub use btree::BtreeBackend;
pub use error::{Error, Result};
pub use mmap::MmapBackend;
