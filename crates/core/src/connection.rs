//! Connection lifecycle: open, close, version, and the instance mutex.
//!
//! A connection is a cheaply clonable handle; clones share the backend
//! reference, the event log, and the worker pool. The first connection of
//! a backend kind creates the process-wide engine handle, later ones
//! alias it. Closing marks this connection dead (further operations fail
//! `NotOpen`), shuts its pool down after outstanding tasks drain, and
//! gives the engine reference back to the registry.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};

use arbordb_store::{registry, Backend};
use arbordb_types::error::{BadArgumentSnafu, NotOpenSnafu};
use arbordb_types::{BackendKind, ErrorMode, KeyType, OpenConfig, Result};
use snafu::OptionExt;

use crate::executor::store_err;
use crate::log::EventLog;
use crate::pool::WorkerPool;

/// Handle to an open database.
pub struct Connection {
    inner: Arc<Inner>,
}

impl Clone for Connection {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

pub(crate) struct Inner {
    kind: BackendKind,
    key_type: KeyType,
    error_mode: ErrorMode,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    /// Serializes operations on this connection. Re-entrant: a thread
    /// already inside an operation may enter again.
    mutex: Option<ReentrantMutex<()>>,
    log: EventLog,
    pool: OnceCell<WorkerPool>,
    worker_threads: usize,
}

impl Connection {
    /// Opens a connection per the configuration record.
    ///
    /// # Errors
    ///
    /// - `BadArgument` — neither `file` nor `env_dir` was given.
    /// - `BackendUnavailable` — the engine environment cannot be opened.
    /// - `MultipleOpen` — a different backend kind is live in this
    ///   process.
    pub fn open(config: OpenConfig) -> Result<Connection> {
        if let Some(vars) = &config.env_vars {
            apply_env_vars(vars);
        }

        let path = config
            .resolved_path()
            .context(BadArgumentSnafu { reason: "file or env_dir required" })?;
        let backend = registry::acquire(
            config.backend,
            &registry::StoreOptions { path, map_size: config.map_size },
        )
        .map_err(store_err)?;

        let log = EventLog::from_config(&config);
        log.function("db::open");
        tracing::debug!(
            backend = config.backend.as_str(),
            multithreaded = config.multithreaded,
            "connection opened"
        );

        Ok(Connection {
            inner: Arc::new(Inner {
                kind: config.backend,
                key_type: config.key_type,
                error_mode: config.error_mode,
                backend: RwLock::new(Some(backend)),
                mutex: config.multithreaded.then(|| ReentrantMutex::new(())),
                log,
                pool: OnceCell::new(),
                worker_threads: config.worker_threads,
            }),
        })
    }

    /// Closes this connection. Outstanding asynchronous tasks finish
    /// first; the engine itself is torn down when the last connection of
    /// its kind closes. Closing twice is a no-op.
    pub fn close(&self) {
        let released = self.inner.backend.write().take().is_some();
        if !released {
            return;
        }
        if let Some(pool) = self.inner.pool.get() {
            pool.shutdown();
        }
        registry::release(self.inner.kind);
        self.inner.log.function("db::close");
        tracing::debug!(backend = self.inner.kind.as_str(), "connection closed");
    }

    /// Human-readable version string naming the access layer and the
    /// engine behind it.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` after `close`.
    pub fn version(&self) -> Result<String> {
        let backend = self.backend()?;
        Ok(format!("arbordb {}; {}", env!("CARGO_PKG_VERSION"), backend.describe()))
    }

    /// Reconfigures the event log at runtime.
    pub fn set_log_level(&self, file: &std::path::Path, level: &str, filter: Option<&str>) {
        self.inner.log.set_level(file, level, filter);
    }

    /// Appends a client-originated event to the log.
    pub fn log_message(&self, title: &str, message: &str) {
        self.inner.log.message(title, message);
    }

    /// The connection's event log, for sink substitution.
    pub fn event_log(&self) -> &EventLog {
        &self.inner.log
    }

    pub(crate) fn backend(&self) -> Result<Arc<dyn Backend>> {
        self.inner.backend.read().clone().context(NotOpenSnafu)
    }

    /// Takes the instance mutex when enabled. The guard is held for the
    /// duration of one operation.
    pub(crate) fn guard(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.inner.mutex.as_ref().map(|m| m.lock())
    }

    pub(crate) fn key_type(&self) -> KeyType {
        self.inner.key_type
    }

    pub(crate) fn error_mode(&self) -> ErrorMode {
        self.inner.error_mode
    }

    pub(crate) fn log(&self) -> &EventLog {
        &self.inner.log
    }

    /// The worker pool, started on first use.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` after `close`.
    pub(crate) fn pool(&self) -> Result<&WorkerPool> {
        self.backend()?;
        Ok(self.inner.pool.get_or_init(|| WorkerPool::start(self.inner.worker_threads)))
    }

}

impl Drop for Inner {
    fn drop(&mut self) {
        // A connection dropped without close() still gives its engine
        // reference back.
        if self.backend.get_mut().take().is_some() {
            if let Some(pool) = self.pool.get() {
                pool.shutdown();
            }
            registry::release(self.kind);
        }
    }
}

/// Applies newline-separated `K=V` pairs to the process environment.
fn apply_env_vars(vars: &str) {
    for line in vars.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            std::env::set_var(key.trim(), value.trim());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_env_vars() {
        apply_env_vars("ARBORDB_TEST_A=1\n\n ARBORDB_TEST_B = two \n");
        assert_eq!(std::env::var("ARBORDB_TEST_A").unwrap(), "1");
        assert_eq!(std::env::var("ARBORDB_TEST_B").unwrap(), "two");
    }

    #[test]
    fn test_open_requires_a_path() {
        let config = OpenConfig::new(BackendKind::Btree);
        let err = Connection::open(config).unwrap_err();
        assert!(matches!(err, arbordb_types::Error::BadArgument { .. }));
    }

    #[test]
    fn test_instance_mutex_is_reentrant() {
        let mut config = OpenConfig::new(BackendKind::Btree);
        config.file = Some(std::env::temp_dir().join("arbordb-conn-unit.db"));
        let conn = Connection::open(config).unwrap();

        // A thread already inside an operation may take the mutex again.
        let outer = conn.guard();
        let inner = conn.guard();
        assert!(outer.is_some());
        assert!(inner.is_some());
        drop(inner);
        drop(outer);

        conn.close();
    }

    #[test]
    fn test_mutex_disabled_when_single_threaded() {
        let mut config = OpenConfig::new(BackendKind::Btree);
        config.file = Some(std::env::temp_dir().join("arbordb-conn-unit.db"));
        config.multithreaded = false;
        let conn = Connection::open(config).unwrap();
        assert!(conn.guard().is_none());
        conn.close();
    }
}
