//! Process-wide backend registry.
//!
//! Engine environments must not be opened twice in one process, so the
//! first connection of a given kind creates the handle and later
//! connections alias it, whatever file they name. The registry holds one
//! live engine at a time; opening the other kind while this one has
//! references fails rather than letting two engine loads race.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use arbordb_types::BackendKind;

use crate::adapter::Backend;
use crate::btree::BtreeBackend;
use crate::error::{AlreadyOpenSnafu, Result};
use crate::mmap::MmapBackend;

/// What the registry needs to create an engine.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Database file (btree) or environment directory (mmap).
    pub path: PathBuf,
    /// Map size for the mmap engine.
    pub map_size: usize,
}

struct Active {
    kind: BackendKind,
    handle: Arc<dyn Backend>,
    refs: usize,
}

static ACTIVE: Lazy<Mutex<Option<Active>>> = Lazy::new(|| Mutex::new(None));

/// Acquires the process-wide backend of `kind`, creating it on first use.
///
/// A second acquire of the same kind aliases the existing handle and
/// bumps its reference count; the options of later opens are ignored.
///
/// # Errors
///
/// Returns `AlreadyOpen` when a different kind is live, or `Unavailable`
/// when the engine cannot be created.
pub fn acquire(kind: BackendKind, opts: &StoreOptions) -> Result<Arc<dyn Backend>> {
    let mut slot = ACTIVE.lock();
    match slot.as_mut() {
        Some(active) if active.kind == kind => {
            active.refs += 1;
            tracing::debug!(kind = kind.as_str(), refs = active.refs, "aliased backend handle");
            Ok(Arc::clone(&active.handle))
        },
        Some(_) => AlreadyOpenSnafu.fail(),
        None => {
            let handle: Arc<dyn Backend> = match kind {
                BackendKind::Btree => Arc::new(BtreeBackend::open(&opts.path)?),
                BackendKind::Mmap => Arc::new(MmapBackend::open(&opts.path, opts.map_size)?),
            };
            tracing::debug!(kind = kind.as_str(), path = %opts.path.display(), "created backend");
            *slot = Some(Active { kind, handle: Arc::clone(&handle), refs: 1 });
            Ok(handle)
        },
    }
}

/// Releases one reference of `kind`; the engine is torn down at zero.
pub fn release(kind: BackendKind) {
    let mut slot = ACTIVE.lock();
    let drop_now = match slot.as_mut() {
        Some(active) if active.kind == kind => {
            active.refs -= 1;
            active.refs == 0
        },
        _ => false,
    };
    if drop_now {
        if let Some(active) = slot.take() {
            if let Err(e) = active.handle.close() {
                tracing::warn!(error = %e, "backend teardown reported an error");
            }
        }
    }
}
