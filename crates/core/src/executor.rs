//! Request execution: scratch assembly, point operations, and the
//! asynchronous dispatch path.
//!
//! Every operation follows the same shape: reserve a scratch frame,
//! assemble the composite key, take the instance mutex, call the backend,
//! translate the result. Not-found on a read is not an error here; it
//! comes back as the empty byte string.

use arbordb_store as store;
use arbordb_types::codec::{decode_int_key, shares_prefix, KeyBuilder};
use arbordb_types::error::{AsyncNotSupportedSnafu, BadArgumentSnafu};
use arbordb_types::{Error, ErrorMode, KeyType, Result, Subscript, MAX_STRING_LEN};
use snafu::ensure;

use crate::connection::Connection;
use crate::traverse::{order_next, order_prev};

/// Initial size of each scratch buffer; buffers grow but never shrink
/// within one call.
pub(crate) const INITIAL_SCRATCH: usize = 32 * 1024;

/// How many subtree keys a cascade collects before deleting a batch.
const DELETE_BATCH: usize = 1024;

/// Per-call scratch buffers: assembled input key and output value.
/// Released when the call returns; probe keys borrow copies of their own.
pub(crate) struct ScratchFrame {
    pub key: KeyBuilder,
    pub value: Vec<u8>,
}

impl ScratchFrame {
    pub(crate) fn reserve() -> Self {
        Self {
            key: KeyBuilder::with_capacity(INITIAL_SCRATCH),
            value: Vec::with_capacity(INITIAL_SCRATCH),
        }
    }
}

/// An input key assembled for the connection's key mode.
pub(crate) enum AssembledKey {
    /// Hierarchical key with per-slot descriptors.
    M(KeyBuilder),
    /// Integer- or string-mode key: raw bytes.
    Flat(Vec<u8>),
}

impl AssembledKey {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            AssembledKey::M(kb) => kb.bytes(),
            AssembledKey::Flat(bytes) => bytes,
        }
    }
}

/// Translates an adapter error into the public taxonomy.
pub(crate) fn store_err(e: store::Error) -> Error {
    match e {
        store::Error::NotFound => {
            Error::BackendError { code: 0, message: "key not found".to_string() }
        },
        store::Error::KeyExists => {
            Error::BackendError { code: 0, message: "key already exists".to_string() }
        },
        store::Error::TxnConflict { message } => Error::BackendError { code: 0, message },
        store::Error::Backend { code, message } => Error::BackendError { code, message },
        store::Error::Unavailable { message } => Error::BackendUnavailable { message },
        store::Error::AlreadyOpen => Error::MultipleOpen,
    }
}

/// Renders a reference like `^X("alpha",1)` for trace records.
pub(crate) fn render_reference(args: &[Subscript]) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some((name, subs)) = args.split_first() {
        let name = name.to_text();
        if !name.starts_with('^') {
            out.push(b'^');
        }
        out.extend_from_slice(name.as_bytes());
        if !subs.is_empty() {
            out.push(b'(');
            for (i, sub) in subs.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                match sub.clone().normalized() {
                    Subscript::Str(bytes) => {
                        out.push(b'"');
                        out.extend_from_slice(&bytes);
                        out.push(b'"');
                    },
                    other => out.extend_from_slice(other.to_text().as_bytes()),
                }
            }
            out.push(b')');
        }
    }
    out
}

impl Connection {
    /// Assembles the input key for this connection's key mode.
    pub(crate) fn assemble(&self, frame: &mut ScratchFrame, args: &[Subscript]) -> Result<AssembledKey> {
        ensure!(!args.is_empty(), BadArgumentSnafu { reason: "key arguments required" });
        match self.key_type() {
            KeyType::M => {
                let name = args[0].to_text();
                let stripped = name.strip_prefix('^').unwrap_or(&name);
                ensure!(
                    !stripped.is_empty(),
                    BadArgumentSnafu { reason: "global name required" }
                );
                frame.key.push_name(&name)?;
                for sub in &args[1..] {
                    frame.key.push(sub)?;
                }
                Ok(AssembledKey::M(std::mem::take(&mut frame.key)))
            },
            KeyType::Int => {
                ensure!(
                    args.len() == 1,
                    BadArgumentSnafu { reason: "integer mode takes exactly one key" }
                );
                match args[0].clone().normalized() {
                    Subscript::Int(v) => {
                        Ok(AssembledKey::Flat(arbordb_types::codec::int_key(v).to_vec()))
                    },
                    // An empty start key is legal for edge-in traversal.
                    Subscript::Str(b) if b.is_empty() => Ok(AssembledKey::Flat(Vec::new())),
                    _ => BadArgumentSnafu { reason: "integer key required" }.fail(),
                }
            },
            KeyType::Str => {
                ensure!(
                    args.len() == 1,
                    BadArgumentSnafu { reason: "string mode takes exactly one key" }
                );
                Ok(AssembledKey::Flat(args[0].to_bytes()))
            },
        }
    }

    /// Reads one node; an absent node is the empty byte string.
    pub fn get(&self, args: &[Subscript]) -> Result<Vec<u8>> {
        self.enter("db::get", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let key = self.assemble(&mut frame, args)?;
            let backend = self.backend()?;
            let _guard = self.guard();
            backend.get(key.bytes(), &mut frame.value).map_err(store_err)?;
            Ok(frame.value)
        })();
        self.finish("db::get", outcome)
    }

    /// Writes one node, replacing any existing value. Returns 0.
    pub fn set(&self, args: &[Subscript], value: &[u8]) -> Result<i32> {
        self.enter("db::set", args);
        let outcome = (|| {
            ensure!(
                value.len() <= MAX_STRING_LEN,
                BadArgumentSnafu { reason: format!("value too long ({} bytes)", value.len()) }
            );
            let mut frame = ScratchFrame::reserve();
            let key = self.assemble(&mut frame, args)?;
            let backend = self.backend()?;
            let _guard = self.guard();
            backend.put(key.bytes(), value).map_err(store_err)?;
            Ok(0)
        })();
        self.finish("db::set", outcome)
    }

    /// Classifies one node: 0 = nothing, 1 = data, 10 = children,
    /// 11 = data and children.
    pub fn defined(&self, args: &[Subscript]) -> Result<i32> {
        self.enter("db::defined", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let key = self.assemble(&mut frame, args)?;
            let backend = self.backend()?;
            let _guard = self.guard();

            let mut n = i32::from(backend.get(key.bytes(), &mut frame.value).map_err(store_err)?);
            if let AssembledKey::M(_) = key {
                let key = key.bytes();
                let mut cur = backend.cursor().map_err(store_err)?;
                let mut hit = cur.seek_ge(key).map_err(store_err)?;
                if n == 1 {
                    if let Some(h) = &hit {
                        if h.key == key {
                            hit = cur.next().map_err(store_err)?;
                        }
                    }
                }
                if let Some(h) = hit {
                    if h.key.len() > key.len() && shares_prefix(&h.key, key, key.len()) {
                        n += 10;
                    }
                }
            }
            Ok(n)
        })();
        self.finish("db::defined", outcome)
    }

    /// Deletes one node and, in hierarchical mode, its whole subtree.
    /// Returns 0 on success.
    pub fn delete(&self, args: &[Subscript]) -> Result<i32> {
        self.enter("db::delete", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let key = self.assemble(&mut frame, args)?;
            let backend = self.backend()?;
            let _guard = self.guard();

            backend.del(key.bytes()).map_err(store_err)?;
            if let AssembledKey::M(_) = key {
                let key = key.bytes();
                let mut cur = backend.cursor().map_err(store_err)?;
                let mut batch: Vec<Vec<u8>> = Vec::new();
                let mut hit = cur.seek_ge(key).map_err(store_err)?;
                while let Some(h) = hit {
                    if !shares_prefix(&h.key, key, key.len()) {
                        break;
                    }
                    batch.push(h.key);
                    if batch.len() >= DELETE_BATCH {
                        backend.del_many(&batch).map_err(store_err)?;
                        batch.clear();
                    }
                    hit = cur.next().map_err(store_err)?;
                }
                drop(cur);
                if !batch.is_empty() {
                    backend.del_many(&batch).map_err(store_err)?;
                }
            }
            Ok(0)
        })();
        // A cascade that fails partway is a soft failure: the node set is
        // simply smaller than asked.
        let outcome = match outcome {
            Err(err @ Error::BackendError { .. }) => self.soften(-1, err),
            other => other,
        };
        self.finish("db::delete", outcome)
    }

    /// Next sibling value at the last subscript position; `None` at end.
    pub fn next(&self, args: &[Subscript]) -> Result<Option<Subscript>> {
        self.enter("db::next", args);
        let outcome = self.order_step(args, true);
        self.finish("db::next", outcome)
    }

    /// Previous sibling value at the last subscript position; `None` at
    /// the low end.
    pub fn previous(&self, args: &[Subscript]) -> Result<Option<Subscript>> {
        self.enter("db::previous", args);
        let outcome = self.order_step(args, false);
        self.finish("db::previous", outcome)
    }

    fn order_step(&self, args: &[Subscript], forward: bool) -> Result<Option<Subscript>> {
        let mut frame = ScratchFrame::reserve();
        let key = self.assemble(&mut frame, args)?;
        let backend = self.backend()?;
        let _guard = self.guard();

        match key {
            AssembledKey::M(kb) => {
                let seed = if args.len() == 1 {
                    // Name-level scan: the name itself is the seed.
                    Subscript::Str(args[0].to_text().trim_start_matches('^').into())
                } else {
                    args[args.len() - 1].clone().normalized()
                };
                let mut cur = backend.cursor().map_err(store_err)?;
                let hit = if forward {
                    order_next(cur.as_mut(), &kb, &seed)?
                } else {
                    order_prev(cur.as_mut(), &kb, &seed)?
                };
                Ok(hit.map(|h| h.value))
            },
            AssembledKey::Flat(start) => {
                let mut cur = backend.cursor().map_err(store_err)?;
                let start_empty = args[0].is_empty();
                let hit = if forward {
                    if start_empty {
                        cur.first().map_err(store_err)?
                    } else {
                        match cur.seek_ge(&start).map_err(store_err)? {
                            Some(h) if h.key == start => cur.next().map_err(store_err)?,
                            other => other,
                        }
                    }
                } else if start_empty {
                    cur.last().map_err(store_err)?
                } else {
                    match cur.seek_ge(&start).map_err(store_err)? {
                        Some(_) => cur.prev().map_err(store_err)?,
                        None => cur.last().map_err(store_err)?,
                    }
                };
                Ok(hit.map(|h| self.flat_subscript(&h.key)))
            },
        }
    }

    /// Decodes a flat-mode key back into a subscript.
    pub(crate) fn flat_subscript(&self, key: &[u8]) -> Subscript {
        match self.key_type() {
            KeyType::Int => decode_int_key(key).map(Subscript::Int).unwrap_or_else(|| {
                Subscript::Str(key.to_vec())
            }),
            _ => Subscript::Str(key.to_vec()),
        }
    }

    /// Adds `delta` to the node's numeric value and stores the result,
    /// returning its text form. An absent or non-numeric value counts
    /// as 0.
    pub fn increment(&self, args: &[Subscript], delta: f64) -> Result<String> {
        self.enter("db::increment", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let key = self.assemble(&mut frame, args)?;
            let backend = self.backend()?;
            let _guard = self.guard();

            backend.get(key.bytes(), &mut frame.value).map_err(store_err)?;
            let current = leading_number(&frame.value);
            let text = format_number(current + delta);
            backend.put(key.bytes(), text.as_bytes()).map_err(store_err)?;
            Ok(text)
        })();
        self.finish("db::increment", outcome)
    }

    /// Advisory lock. Always succeeds immediately; the timeout is
    /// accepted and recorded but not consulted.
    pub fn lock(&self, args: &[Subscript], timeout_secs: f64) -> Result<i32> {
        self.enter("db::lock", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let _key = self.assemble(&mut frame, args)?;
            ensure!(
                timeout_secs >= -1.0,
                BadArgumentSnafu { reason: "negative lock timeout" }
            );
            Ok(1)
        })();
        self.finish("db::lock", outcome)
    }

    /// Advisory unlock. Always succeeds immediately.
    pub fn unlock(&self, args: &[Subscript]) -> Result<i32> {
        self.enter("db::unlock", args);
        let outcome = (|| {
            let mut frame = ScratchFrame::reserve();
            let _key = self.assemble(&mut frame, args)?;
            Ok(1)
        })();
        self.finish("db::unlock", outcome)
    }

    /// Copies every node of the source subtree under the destination
    /// prefix. Returns the number of nodes copied.
    pub fn merge(&self, dst: &[Subscript], src: &[Subscript]) -> Result<i32> {
        self.enter("db::merge", dst);
        let outcome = (|| {
            ensure!(
                self.key_type() == KeyType::M,
                BadArgumentSnafu { reason: "merge requires hierarchical keys" }
            );
            let mut dst_frame = ScratchFrame::reserve();
            let dst_key = self.assemble(&mut dst_frame, dst)?;
            let mut src_frame = ScratchFrame::reserve();
            let src_key = self.assemble(&mut src_frame, src)?;
            let backend = self.backend()?;
            let _guard = self.guard();

            let src_bytes = src_key.bytes();
            let dst_bytes = dst_key.bytes();
            let mut copied = 0;
            let mut cur = backend.cursor().map_err(store_err)?;
            let mut hit = cur.seek_ge(src_bytes).map_err(store_err)?;
            while let Some(h) = hit {
                if !shares_prefix(&h.key, src_bytes, src_bytes.len()) {
                    break;
                }
                let mut new_key =
                    Vec::with_capacity(dst_bytes.len() + h.key.len() - src_bytes.len());
                new_key.extend_from_slice(dst_bytes);
                new_key.extend_from_slice(&h.key[src_bytes.len()..]);
                ensure!(
                    new_key.len() <= MAX_STRING_LEN,
                    arbordb_types::error::KeyTooLongSnafu {
                        size: new_key.len(),
                        max: MAX_STRING_LEN
                    }
                );
                backend.put(&new_key, &h.value).map_err(store_err)?;
                copied += 1;
                hit = cur.next().map_err(store_err)?;
            }
            Ok(copied)
        })();
        self.finish("db::merge", outcome)
    }

    /// Runs one point operation on a worker thread, blocking the caller
    /// until it completes, then invokes `callback` on the caller's own
    /// thread with the result.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` when the connection (and with it the pool) has
    /// been closed. The callback is not invoked in that case.
    pub fn call_async<F>(&self, request: AsyncRequest, callback: F) -> Result<()>
    where
        F: FnOnce(Result<AsyncReply>) + Send + 'static,
    {
        let pool = self.pool()?;
        let conn = self.clone();
        let outcome = pool.submit_and_wait(move || request.run(&conn));
        match outcome {
            Some(result) => {
                callback(result);
                Ok(())
            },
            None => arbordb_types::error::NotOpenSnafu.fail(),
        }
    }

    /// Soft-failure policy hook: in `Status` mode `soft` is returned, in
    /// `Strict` mode the error is surfaced.
    pub(crate) fn soften<T>(&self, soft: T, err: Error) -> Result<T> {
        match self.error_mode() {
            ErrorMode::Status => Ok(soft),
            ErrorMode::Strict => Err(err),
        }
    }

    fn enter(&self, op: &'static str, args: &[Subscript]) {
        self.log().function(op);
        self.log().transmission(op, &render_reference(args));
    }

    fn finish<T: ReplyDetail>(&self, op: &'static str, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.log().response(op, &value.detail());
                Ok(value)
            },
            Err(err) => {
                self.log().error(op, &err.to_string());
                Err(err)
            },
        }
    }
}

/// Render of a successful reply for response-level trace records.
pub(crate) trait ReplyDetail {
    fn detail(&self) -> Vec<u8>;
}

impl ReplyDetail for Vec<u8> {
    fn detail(&self) -> Vec<u8> {
        self.clone()
    }
}

impl ReplyDetail for i32 {
    fn detail(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ReplyDetail for String {
    fn detail(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ReplyDetail for Option<Subscript> {
    fn detail(&self) -> Vec<u8> {
        match self {
            Some(sub) => sub.to_bytes(),
            None => b"[END]".to_vec(),
        }
    }
}

/// One point operation packaged for the worker pool.
#[derive(Debug, Clone)]
pub enum AsyncRequest {
    /// Read a node.
    Get {
        /// Name and subscripts.
        args: Vec<Subscript>,
    },
    /// Write a node.
    Set {
        /// Name and subscripts.
        args: Vec<Subscript>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Classify a node.
    Defined {
        /// Name and subscripts.
        args: Vec<Subscript>,
    },
    /// Delete a node (and its subtree in hierarchical mode).
    Delete {
        /// Name and subscripts.
        args: Vec<Subscript>,
    },
    /// Next sibling value.
    Next {
        /// Name and subscripts, the seed last.
        args: Vec<Subscript>,
    },
    /// Previous sibling value.
    Previous {
        /// Name and subscripts, the seed last.
        args: Vec<Subscript>,
    },
    /// Atomic numeric increment.
    Increment {
        /// Name and subscripts.
        args: Vec<Subscript>,
        /// Amount to add.
        delta: f64,
    },
}

impl AsyncRequest {
    fn run(&self, conn: &Connection) -> Result<AsyncReply> {
        match self {
            AsyncRequest::Get { args } => conn.get(args).map(AsyncReply::Value),
            AsyncRequest::Set { args, value } => conn.set(args, value).map(AsyncReply::Status),
            AsyncRequest::Defined { args } => conn.defined(args).map(AsyncReply::Status),
            AsyncRequest::Delete { args } => conn.delete(args).map(AsyncReply::Status),
            AsyncRequest::Next { args } => conn.next(args).map(AsyncReply::Key),
            AsyncRequest::Previous { args } => conn.previous(args).map(AsyncReply::Key),
            AsyncRequest::Increment { args, delta } => {
                conn.increment(args, *delta).map(AsyncReply::Text)
            },
        }
    }
}

/// Result of an [`AsyncRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncReply {
    /// Value bytes from a read.
    Value(Vec<u8>),
    /// Status integer.
    Status(i32),
    /// Sibling key, `None` at end.
    Key(Option<Subscript>),
    /// Text result (increment).
    Text(String),
}

/// Rejects a cursor operation on the asynchronous path. Nothing is
/// enqueued; the cursor state machine needs single-threaded ordered
/// access to its backend cursor.
pub(crate) fn refuse_async(conn: &Connection, op: &'static str) -> Error {
    let err = AsyncNotSupportedSnafu.build();
    conn.log().error(op, &err.to_string());
    err
}

/// Parses the leading decimal number of a value, the way a text-to-number
/// coercion reads it: optional sign, digits, one dot; anything after is
/// ignored, and no number at all is 0.
pub(crate) fn leading_number(bytes: &[u8]) -> f64 {
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'-' | b'+' if i == 0 => {},
            b'.' if !seen_dot => seen_dot = true,
            b'0'..=b'9' => seen_digit = true,
            _ => break,
        }
        end = i + 1;
    }
    if !seen_digit {
        return 0.0;
    }
    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Shortest practical decimal rendering: integers without a point,
/// fractions with up to nine places and trailing zeros removed.
pub(crate) fn format_number(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.9}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}
