//! Open-time configuration for a connection.

use std::path::PathBuf;

use serde::Deserialize;

/// Which ordered store backs the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// B-tree engine with implicit per-call transactions.
    Btree,
    /// Memory-mapped B+tree engine with explicit transactions.
    Mmap,
}

impl BackendKind {
    /// Short name as written in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Btree => "btree",
            BackendKind::Mmap => "mmap",
        }
    }
}

/// Key interpretation, fixed for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// One 32-bit integer key, stored in native byte order.
    Int,
    /// One opaque byte-string key.
    Str,
    /// Hierarchical composite keys (the codec of [`crate::codec`]).
    M,
}

/// How soft failures surface at the call boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorMode {
    /// Soft failures come back as status values; only hard failures error.
    #[default]
    Status,
    /// Every backend failure is surfaced as an error.
    Strict,
}

/// Configuration record accepted by `Connection::open`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenConfig {
    /// Which store engine to open.
    pub backend: BackendKind,

    /// Database file. For the mmap backend this names the environment
    /// directory unless `env_dir` is set.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Environment directory. Enables multi-process sharing for the
    /// B-tree backend; for the mmap backend this is the map directory.
    #[serde(default)]
    pub env_dir: Option<PathBuf>,

    /// Key interpretation, immutable once opened.
    #[serde(default = "default_key_type")]
    pub key_type: KeyType,

    /// Newline-separated `K=V` pairs applied to the process environment
    /// before the engine is opened.
    #[serde(default)]
    pub env_vars: Option<String>,

    /// Accepted for compatibility with configurations that name a shared
    /// library; the engines here are linked in, so the value is unused.
    #[serde(default)]
    pub library_path: Option<PathBuf>,

    /// When false, the per-connection mutex is disabled and the caller
    /// promises not to overlap operations on this connection.
    #[serde(default = "default_multithreaded")]
    pub multithreaded: bool,

    /// Map size for the mmap backend's environment.
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Worker threads for asynchronous point operations.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Event-log file. Logging is disabled when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Compact event-log flags: `e` errors, `f` function entry,
    /// `t` transmissions, `r` responses as well.
    #[serde(default)]
    pub log_level: String,

    /// Substring filter gating function-entry events.
    #[serde(default)]
    pub log_filter: Option<String>,

    /// How soft failures surface.
    #[serde(default)]
    pub error_mode: ErrorMode,
}

impl OpenConfig {
    /// A configuration for the given backend with every option defaulted.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            file: None,
            env_dir: None,
            key_type: default_key_type(),
            env_vars: None,
            library_path: None,
            multithreaded: default_multithreaded(),
            map_size: default_map_size(),
            worker_threads: default_worker_threads(),
            log_file: None,
            log_level: String::new(),
            log_filter: None,
            error_mode: ErrorMode::default(),
        }
    }

    /// The on-disk location the backend should open: `env_dir` when set,
    /// otherwise `file`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match (&self.env_dir, &self.file) {
            (Some(dir), Some(file)) => {
                if file.is_absolute() {
                    Some(file.clone())
                } else {
                    Some(dir.join(file))
                }
            },
            (Some(dir), None) => Some(dir.clone()),
            (None, Some(file)) => Some(file.clone()),
            (None, None) => None,
        }
    }
}

fn default_key_type() -> KeyType {
    KeyType::M
}

fn default_multithreaded() -> bool {
    true
}

fn default_map_size() -> usize {
    256 * 1024 * 1024
}

fn default_worker_threads() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = OpenConfig::new(BackendKind::Btree);
        assert_eq!(cfg.key_type, KeyType::M);
        assert!(cfg.multithreaded);
        assert_eq!(cfg.map_size, 256 * 1024 * 1024);
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.error_mode, ErrorMode::Status);
    }

    #[test]
    fn test_deserialize_minimal() {
        let cfg: OpenConfig =
            serde_json::from_str(r#"{"backend": "mmap", "env_dir": "/tmp/env"}"#).unwrap();
        assert_eq!(cfg.backend, BackendKind::Mmap);
        assert_eq!(cfg.resolved_path(), Some(PathBuf::from("/tmp/env")));
        assert_eq!(cfg.key_type, KeyType::M);
    }

    #[test]
    fn test_deserialize_full() {
        let cfg: OpenConfig = serde_json::from_str(
            r#"{
                "backend": "btree",
                "file": "m.db",
                "env_dir": "/data",
                "key_type": "str",
                "multithreaded": false,
                "log_level": "eft",
                "error_mode": "strict"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.backend, BackendKind::Btree);
        assert_eq!(cfg.key_type, KeyType::Str);
        assert!(!cfg.multithreaded);
        assert_eq!(cfg.resolved_path(), Some(PathBuf::from("/data/m.db")));
        assert_eq!(cfg.error_mode, ErrorMode::Strict);
    }

    #[test]
    fn test_resolved_path_prefers_absolute_file() {
        let mut cfg = OpenConfig::new(BackendKind::Btree);
        cfg.env_dir = Some(PathBuf::from("/data"));
        cfg.file = Some(PathBuf::from("/elsewhere/m.db"));
        assert_eq!(cfg.resolved_path(), Some(PathBuf::from("/elsewhere/m.db")));
    }
}
