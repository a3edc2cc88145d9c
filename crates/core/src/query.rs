//! Query handles: ordered traversal over a bound global.
//!
//! A handle owns at most one live backend cursor. Opening the cursor
//! takes the snapshot the traversal runs against (for the mmap engine,
//! that is a read transaction held for the cursor's lifetime); the
//! cursor is released on close, on reset, and when a scan reports
//! end-of-data. Every early exit drops it before the result surfaces.
//!
//! Three traversal modes, fixed when the handle is built:
//!
//! - sibling order (default): the next/previous value at the last
//!   subscript position of the descriptor key;
//! - `multilevel`: every descendant key under the descriptor prefix, in
//!   key order;
//! - `globaldirectory`: the top-level names themselves.

use arbordb_store::BackendCursor;
use arbordb_types::codec::KeyBuilder;
use arbordb_types::error::BadArgumentSnafu;
use arbordb_types::{KeyType, Result, Subscript};
use percent_encoding::{percent_encode, AsciiSet, CONTROLS};
use snafu::ensure;

use crate::connection::Connection;
use crate::executor::{refuse_async, render_reference, store_err};
use crate::traverse::{order_next, order_prev, query_next, query_prev};

/// Bytes percent-encoded inside URL-format field values.
const FIELD: &AsciiSet = &CONTROLS.add(b'&').add(b'=').add(b'%');

/// What a query iterates over: a global name and a starting key.
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptor {
    /// Global name, with or without a leading `^`. May be empty only for
    /// directory enumeration.
    pub global: String,
    /// Starting subscripts; in sibling mode the last one is the seed.
    pub key: Vec<Subscript>,
}

impl QueryDescriptor {
    /// Descriptor with an empty starting key.
    pub fn new(global: impl Into<String>) -> Self {
        Self { global: global.into(), key: Vec::new() }
    }

    /// Descriptor with a starting key.
    pub fn with_key(global: impl Into<String>, key: Vec<Subscript>) -> Self {
        Self { global: global.into(), key }
    }
}

/// Options fixed at handle construction.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Yield each record's value alongside its key.
    pub getdata: bool,
    /// Iterate the whole subtree instead of one sibling level.
    pub multilevel: bool,
    /// Enumerate top-level names.
    pub directory: bool,
    /// Yield shape.
    pub format: OutputFormat,
}

/// Shape of each yield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Key subscripts plus optional data, as values.
    #[default]
    Structured,
    /// `key1=…&key2=…&data=…` with `&`, `=`, `%` percent-encoded.
    Url,
}

/// One structured yield.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRow {
    /// Key subscripts: the sibling value (one element), the full path
    /// under the global, or the `^`-prefixed name, depending on mode.
    pub key: Vec<Subscript>,
    /// The record's value when `getdata` was requested and the record
    /// carries one at this exact level.
    pub data: Option<Vec<u8>>,
}

impl QueryRow {
    /// URL-encoded text form of this yield.
    pub fn url_encoded(&self) -> String {
        let mut out = String::new();
        for (i, sub) in self.key.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(&format!("key{}=", i + 1));
            out.push_str(&percent_encode(&sub.to_bytes(), FIELD).to_string());
        }
        if let Some(data) = &self.data {
            if !out.is_empty() {
                out.push('&');
            }
            out.push_str("data=");
            out.push_str(&percent_encode(data, FIELD).to_string());
        }
        out
    }
}

/// A yield in the handle's configured format.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryYield {
    /// Structured key/data.
    Row(QueryRow),
    /// URL-encoded line.
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Order,
    Multilevel,
    Directory,
    /// Integer- and string-keyed connections have one flat level, so
    /// every traversal degenerates to a whole-store scan.
    Flat,
}

/// An open traversal over a bound global.
pub struct Query {
    conn: Connection,
    mode: Mode,
    getdata: bool,
    format: OutputFormat,
    /// Global name without the `^`; in directory mode, the current name.
    name: String,
    /// Current subscript path (the seed last, in sibling mode).
    path: Vec<Subscript>,
    /// Multilevel: assembled starting key (trailing empty seed kept).
    anchor: Vec<u8>,
    /// Multilevel: byte length of the fixed prefix the scan must match.
    fixed_len: usize,
    /// The key the scan resumes from.
    prev_key: Vec<u8>,
    started: bool,
    finished: bool,
    closed: bool,
    cursor: Option<Box<dyn BackendCursor>>,
}

impl Connection {
    /// Opens a query handle per the descriptor and options.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` when the global name is missing and the
    /// mode needs one.
    pub fn query(&self, descriptor: QueryDescriptor, options: QueryOptions) -> Result<Query> {
        let mut q = Query {
            conn: self.clone(),
            mode: Mode::Order,
            getdata: false,
            format: OutputFormat::Structured,
            name: String::new(),
            path: Vec::new(),
            anchor: Vec::new(),
            fixed_len: 0,
            prev_key: Vec::new(),
            started: false,
            finished: false,
            closed: false,
            cursor: None,
        };
        q.apply(descriptor, options)?;
        Ok(q)
    }
}

impl Query {
    fn apply(&mut self, descriptor: QueryDescriptor, options: QueryOptions) -> Result<()> {
        self.cursor = None;
        self.started = false;
        self.finished = false;
        self.closed = false;
        self.getdata = options.getdata;
        self.format = options.format;

        self.mode = if self.conn.key_type() != KeyType::M {
            Mode::Flat
        } else if options.directory {
            Mode::Directory
        } else if options.multilevel {
            Mode::Multilevel
        } else {
            Mode::Order
        };

        let name = descriptor.global.strip_prefix('^').unwrap_or(&descriptor.global);
        if matches!(self.mode, Mode::Order | Mode::Multilevel) {
            ensure!(!name.is_empty(), BadArgumentSnafu { reason: "global name required" });
        }
        self.name = name.to_string();
        self.path = descriptor.key.iter().map(|s| s.clone().normalized()).collect();

        match self.mode {
            Mode::Multilevel => {
                let mut kb = KeyBuilder::new();
                kb.push_name(&self.name)?;
                for sub in &self.path {
                    kb.push(sub)?;
                }
                // The anchor prefix ends at the last non-empty slot; a
                // trailing empty seed only positions the first seek.
                let mut fixed_len = 0;
                for i in (0..kb.slot_count()).rev() {
                    let slot = kb.slot(i);
                    if kb.bytes()[slot.start..slot.end] != [0x00, 0x00] {
                        fixed_len = slot.end;
                        break;
                    }
                }
                self.fixed_len = fixed_len;
                self.anchor = kb.bytes().to_vec();
                self.prev_key = self.anchor.clone();
            },
            Mode::Flat => {
                self.prev_key = match self.path.first() {
                    Some(sub) if !sub.is_empty() => {
                        let mut frame = crate::executor::ScratchFrame::reserve();
                        let key = self.conn.assemble(&mut frame, &[sub.clone()])?;
                        key.bytes().to_vec()
                    },
                    // No starting key: the first call walks in from the
                    // store's edge.
                    _ => Vec::new(),
                };
            },
            Mode::Order | Mode::Directory => {},
        }
        Ok(())
    }

    /// Forward step in the handle's mode; `None` at end-of-data.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn next(&mut self) -> Result<Option<QueryYield>> {
        self.step(true)
    }

    /// Backward step; `None` at the low end.
    ///
    /// # Errors
    ///
    /// Propagates the connection-level taxonomy.
    pub fn previous(&mut self) -> Result<Option<QueryYield>> {
        self.step(false)
    }

    /// Closes any open cursor and re-anchors the traversal.
    ///
    /// # Errors
    ///
    /// Returns `BadArgument` when the new descriptor is invalid; the old
    /// cursor is released either way.
    pub fn reset(&mut self, descriptor: QueryDescriptor, options: QueryOptions) -> Result<()> {
        self.apply(descriptor, options)
    }

    /// Releases the cursor and its transaction. Further calls yield
    /// end-of-data; closing again is a no-op.
    pub fn close(&mut self) {
        self.cursor = None;
        self.closed = true;
    }

    /// Whether a backend cursor (and, on the mmap engine, its read
    /// transaction) is currently open.
    pub fn has_open_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    /// Rejected: cursor traversal needs single-threaded ordered access
    /// to its backend cursor, so the asynchronous path refuses it and
    /// enqueues nothing.
    ///
    /// # Errors
    ///
    /// Always `AsyncNotSupported`.
    pub fn next_async<F>(&mut self, _callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<QueryYield>>) + Send + 'static,
    {
        Err(refuse_async(&self.conn, "mcursor::next"))
    }

    /// Rejected like [`Query::next_async`].
    ///
    /// # Errors
    ///
    /// Always `AsyncNotSupported`.
    pub fn previous_async<F>(&mut self, _callback: F) -> Result<()>
    where
        F: FnOnce(Result<Option<QueryYield>>) + Send + 'static,
    {
        Err(refuse_async(&self.conn, "mcursor::previous"))
    }

    fn step(&mut self, forward: bool) -> Result<Option<QueryYield>> {
        let op = match (self.mode, forward) {
            (Mode::Order, true) => "mcursor::next (order)",
            (Mode::Order, false) => "mcursor::previous (order)",
            (Mode::Multilevel, true) | (Mode::Flat, true) => "mcursor::next (query)",
            (Mode::Multilevel, false) | (Mode::Flat, false) => "mcursor::previous (query)",
            (Mode::Directory, true) => "mcursor::next (global directory)",
            (Mode::Directory, false) => "mcursor::previous (global directory)",
        };
        if self.closed {
            return Ok(None);
        }

        self.conn.log().function(op);
        self.conn.log().transmission(op, &self.trace_reference());

        let conn = self.conn.clone();
        let outcome = {
            let _guard = conn.guard();
            match self.mode {
                Mode::Order => self.step_order(forward),
                Mode::Multilevel => self.step_multilevel(forward),
                Mode::Directory => self.step_directory(forward),
                Mode::Flat => self.step_flat(forward),
            }
        };

        match outcome {
            Ok(Some(row)) => {
                conn.log().response(op, &row_trace(&row));
                Ok(Some(self.shape(row)))
            },
            Ok(None) => {
                conn.log().response(op, b"[END]");
                Ok(None)
            },
            Err(err) => {
                conn.log().error(op, &err.to_string());
                Err(err)
            },
        }
    }

    fn ensure_cursor(&mut self) -> Result<()> {
        if self.cursor.is_none() {
            let backend = self.conn.backend()?;
            self.cursor = Some(backend.cursor().map_err(store_err)?);
        }
        Ok(())
    }

    fn step_order(&mut self, forward: bool) -> Result<Option<QueryRow>> {
        let mut kb = KeyBuilder::new();
        kb.push_name(&self.name)?;
        for sub in &self.path {
            kb.push(sub)?;
        }
        let seed = match self.path.last() {
            Some(sub) => sub.clone(),
            None => Subscript::Str(self.name.as_bytes().to_vec()),
        };
        let getdata = self.getdata;

        self.ensure_cursor()?;
        let Some(cur) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let hit = if forward {
            order_next(cur.as_mut(), &kb, &seed)?
        } else {
            order_prev(cur.as_mut(), &kb, &seed)?
        };
        match hit {
            Some(h) => {
                if let Some(last) = self.path.last_mut() {
                    *last = h.value.clone();
                } else {
                    self.name = h.value.to_text();
                }
                self.started = true;
                Ok(Some(QueryRow {
                    key: vec![h.value],
                    data: if getdata { h.data } else { None },
                }))
            },
            None => {
                self.cursor = None;
                Ok(None)
            },
        }
    }

    fn step_multilevel(&mut self, forward: bool) -> Result<Option<QueryRow>> {
        if self.finished {
            return Ok(None);
        }
        let anchor = self.anchor.clone();
        let fixed_len = self.fixed_len;
        let prev_key = self.prev_key.clone();
        let first_call = !self.started;
        let getdata = self.getdata;

        self.ensure_cursor()?;
        let Some(cur) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let hit = if forward {
            query_next(cur.as_mut(), &anchor, fixed_len, &prev_key, first_call)?
        } else {
            query_prev(cur.as_mut(), &anchor, fixed_len, &prev_key, first_call)?
        };
        match hit {
            Some(h) => {
                self.started = true;
                self.prev_key = h.key;
                self.path = h.subs[1..].to_vec();
                Ok(Some(QueryRow {
                    key: self.path.clone(),
                    data: getdata.then_some(h.data),
                }))
            },
            None => {
                self.finished = true;
                self.cursor = None;
                Ok(None)
            },
        }
    }

    fn step_directory(&mut self, forward: bool) -> Result<Option<QueryRow>> {
        let mut kb = KeyBuilder::new();
        kb.push_name(&self.name)?;
        let seed = Subscript::Str(self.name.as_bytes().to_vec());

        self.ensure_cursor()?;
        let Some(cur) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let hit = if forward {
            order_next(cur.as_mut(), &kb, &seed)?
        } else {
            order_prev(cur.as_mut(), &kb, &seed)?
        };
        match hit {
            Some(h) => {
                self.name = h.value.to_text();
                self.started = true;
                let tagged = format!("^{}", self.name);
                Ok(Some(QueryRow { key: vec![Subscript::from(tagged)], data: None }))
            },
            None => {
                self.cursor = None;
                Ok(None)
            },
        }
    }

    fn step_flat(&mut self, forward: bool) -> Result<Option<QueryRow>> {
        if self.finished {
            return Ok(None);
        }
        let prev_key = self.prev_key.clone();
        let first_call = !self.started;
        let getdata = self.getdata;

        self.ensure_cursor()?;
        let Some(cur) = self.cursor.as_mut() else {
            return Ok(None);
        };
        let hit = if forward {
            if first_call {
                if prev_key.is_empty() {
                    cur.first().map_err(store_err)?
                } else {
                    match cur.seek_ge(&prev_key).map_err(store_err)? {
                        Some(h) if h.key == prev_key => cur.next().map_err(store_err)?,
                        other => other,
                    }
                }
            } else {
                cur.next().map_err(store_err)?
            }
        } else if first_call {
            if prev_key.is_empty() {
                cur.last().map_err(store_err)?
            } else {
                match cur.seek_ge(&prev_key).map_err(store_err)? {
                    Some(_) => cur.prev().map_err(store_err)?,
                    None => cur.last().map_err(store_err)?,
                }
            }
        } else {
            cur.prev().map_err(store_err)?
        };

        match hit {
            Some(h) => {
                self.started = true;
                self.prev_key = h.key.clone();
                let key = self.conn.flat_subscript(&h.key);
                Ok(Some(QueryRow {
                    key: vec![key],
                    data: getdata.then_some(h.value),
                }))
            },
            None => {
                self.finished = true;
                self.cursor = None;
                Ok(None)
            },
        }
    }

    fn shape(&self, row: QueryRow) -> QueryYield {
        match self.format {
            OutputFormat::Structured => QueryYield::Row(row),
            OutputFormat::Url => QueryYield::Url(row.url_encoded()),
        }
    }

    fn trace_reference(&self) -> Vec<u8> {
        let mut args = Vec::with_capacity(1 + self.path.len());
        args.push(Subscript::Str(self.name.as_bytes().to_vec()));
        args.extend(self.path.iter().cloned());
        render_reference(&args)
    }
}

fn row_trace(row: &QueryRow) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, sub) in row.key.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(&sub.to_bytes());
    }
    if let Some(data) = &row.data {
        out.push(b'=');
        out.extend_from_slice(data);
    }
    out
}
