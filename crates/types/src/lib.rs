//! arbordb-types: shared types for the arbordb access layer.
//!
//! This crate holds the pieces every other layer depends on:
//!
//! - [`Subscript`] — one element of a hierarchical key tuple
//! - [`codec`] — the composite-key byte format whose lexicographic order
//!   reproduces hierarchical subscript order
//! - [`Error`] — the error taxonomy surfaced to callers
//! - [`OpenConfig`] — the configuration record accepted at open time
//!
//! The codec is part of the on-disk contract: any database written in
//! hierarchical ("m") key mode can only be read back by the same format.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod subscript;

pub use codec::{KeyBuilder, MAX_STRING_LEN};
pub use config::{BackendKind, ErrorMode, KeyType, OpenConfig};
pub use error::{Error, Result};
pub use subscript::Subscript;
