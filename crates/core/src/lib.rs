//! arbordb-core: a hierarchical global access layer over two ordered
//! byte-keyed stores.
//!
//! A *global* is a named, sparse, hierarchical associative array: each
//! node is addressed by a tuple of subscripts, may carry a value, and may
//! have children. The access layer packs tuples into composite byte keys
//! (so a plain ordered store reproduces hierarchical order), and drives
//! point operations and ordered traversals through one backend interface
//! with two engines behind it.
//!
//! # Example
//!
//! ```no_run
//! use arbordb_core::{BackendKind, Connection, OpenConfig, Subscript};
//!
//! # fn main() -> arbordb_core::Result<()> {
//! let mut config = OpenConfig::new(BackendKind::Btree);
//! config.file = Some("/tmp/m.db".into());
//! let conn = Connection::open(config)?;
//!
//! let sub = |s: &str| Subscript::from(s);
//! conn.set(&[sub("^X"), sub("alpha"), Subscript::Int(1)], b"v1")?;
//! let value = conn.get(&[sub("^X"), sub("alpha"), Subscript::Int(1)])?;
//! assert_eq!(value, b"v1");
//! conn.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod executor;
pub mod global;
pub mod log;
pub mod pool;
pub mod query;
pub(crate) mod traverse;

pub use arbordb_types::{
    BackendKind, Error, ErrorMode, KeyType, OpenConfig, Result, Subscript, MAX_STRING_LEN,
};
pub use connection::Connection;
pub use executor::{AsyncReply, AsyncRequest};
pub use global::Global;
pub use log::{EventLog, LogSink, MemorySink};
pub use query::{
    OutputFormat, Query, QueryDescriptor, QueryOptions, QueryRow, QueryYield,
};
