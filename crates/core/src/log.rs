//! Structured event log.
//!
//! An append-only sink for operational events, separate from the ambient
//! `tracing` diagnostics: callers enable it per connection and read the
//! file alongside whatever the embedding application logs. Three event
//! classes, each behind its own flag:
//!
//! - `e` — errors surfaced to the caller
//! - `f` — function entry (gated by an optional substring filter)
//! - `t` — transmissions (the key a call operates on); `r` adds responses
//!
//! Records are written as one heading line plus an indented title and
//! detail line. Writes append under an advisory file lock so records from
//! different processes do not interleave.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};

use arbordb_types::OpenConfig;

/// Where formatted records go. The file sink is the production one; tests
/// substitute a memory sink.
pub trait LogSink: Send + Sync {
    /// Appends one formatted record.
    fn append(&self, record: &str);
}

/// Appends to a file under an advisory lock.
struct FileSink {
    path: PathBuf,
}

impl LogSink for FileSink {
    fn append(&self, record: &str) {
        let file = match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "event log open failed");
                return;
            },
        };
        if let Err(e) = file.lock_exclusive() {
            tracing::warn!(path = %self.path.display(), error = %e, "event log lock failed");
            return;
        }
        let mut f = &file;
        if let Err(e) = f.write_all(record.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "event log write failed");
        }
        let _ = FileExt::unlock(&file);
    }
}

/// Collects records in memory; the substitute sink used by tests.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far.
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn append(&self, record: &str) {
        self.records.lock().push(record.to_string());
    }
}

struct LogState {
    sink: Option<Arc<dyn LogSink>>,
    errors: bool,
    functions: bool,
    /// 0 = off, 1 = requests, 2 = requests and responses.
    transmissions: u8,
    filter: Option<String>,
}

/// Per-connection event log with runtime-adjustable level.
pub struct EventLog {
    state: RwLock<LogState>,
}

impl EventLog {
    /// Builds the log from the open configuration.
    pub(crate) fn from_config(config: &OpenConfig) -> Self {
        let sink: Option<Arc<dyn LogSink>> = config
            .log_file
            .as_ref()
            .map(|path| Arc::new(FileSink { path: path.clone() }) as Arc<dyn LogSink>);
        let (errors, functions, transmissions) = parse_flags(&config.log_level);
        Self {
            state: RwLock::new(LogState {
                sink,
                errors,
                functions,
                transmissions,
                filter: config.log_filter.clone(),
            }),
        }
    }

    /// Points the log at `path` and re-parses the compact flag string.
    pub fn set_level(&self, path: &Path, level: &str, filter: Option<&str>) {
        let (errors, functions, transmissions) = parse_flags(level);
        let mut state = self.state.write();
        state.sink = Some(Arc::new(FileSink { path: path.to_path_buf() }));
        state.errors = errors;
        state.functions = functions;
        state.transmissions = transmissions;
        state.filter = filter.map(str::to_string);
    }

    /// Substitutes another sink behind the same interface (an in-memory
    /// sink, a forwarding sink) and re-parses the flag string.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>, level: &str, filter: Option<&str>) {
        let (errors, functions, transmissions) = parse_flags(level);
        let mut state = self.state.write();
        state.sink = Some(sink);
        state.errors = errors;
        state.functions = functions;
        state.transmissions = transmissions;
        state.filter = filter.map(str::to_string);
    }

    /// Unconditional client-originated event (as long as a sink is set).
    pub fn message(&self, title: &str, detail: &str) {
        self.emit(title, detail.as_bytes());
    }

    pub(crate) fn error(&self, title: &str, detail: &str) {
        let enabled = self.state.read().errors;
        if enabled {
            self.emit(title, detail.as_bytes());
        }
    }

    pub(crate) fn function(&self, name: &str) {
        let state = self.state.read();
        if !state.functions {
            return;
        }
        if let Some(filter) = &state.filter {
            if !name.contains(filter.as_str()) {
                return;
            }
        }
        drop(state);
        self.emit(name, b"");
    }

    pub(crate) fn transmission(&self, title: &str, detail: &[u8]) {
        let enabled = self.state.read().transmissions >= 1;
        if enabled {
            self.emit(title, detail);
        }
    }

    pub(crate) fn response(&self, title: &str, detail: &[u8]) {
        let enabled = self.state.read().transmissions >= 2;
        if enabled {
            self.emit(title, detail);
        }
    }

    fn emit(&self, title: &str, detail: &[u8]) {
        let sink = self.state.read().sink.clone();
        let Some(sink) = sink else {
            return;
        };
        let record = format!("{}\n    {}\n    {}\n", heading(), title, escape(detail));
        sink.append(&record);
    }
}

/// Parses the compact level string: `e`, `f`, `t`, `r` in any order.
fn parse_flags(level: &str) -> (bool, bool, u8) {
    let errors = level.contains('e');
    let functions = level.contains('f');
    let transmissions = if level.contains('r') {
        2
    } else if level.contains('t') {
        1
    } else {
        0
    };
    (errors, functions, transmissions)
}

fn heading() -> String {
    let now = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
    format!(
        ">>> Time: {}; Build: {}; pid={}; tid={};",
        now,
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        thread_tag(),
    )
}

/// Numeric-ish tag for the current thread, stable within the process.
fn thread_tag() -> String {
    let raw = format!("{:?}", std::thread::current().id());
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Escapes non-printable bytes as `\xNN`.
fn escape(detail: &[u8]) -> String {
    let mut out = String::with_capacity(detail.len());
    for &b in detail {
        if (0x20..0x7f).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with(level: &str, filter: Option<&str>) -> (EventLog, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let log = EventLog {
            state: RwLock::new(LogState {
                sink: Some(sink.clone()),
                errors: false,
                functions: false,
                transmissions: 0,
                filter: None,
            }),
        };
        log.set_sink(sink.clone(), level, filter);
        (log, sink)
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!(parse_flags(""), (false, false, 0));
        assert_eq!(parse_flags("e"), (true, false, 0));
        assert_eq!(parse_flags("ft"), (false, true, 1));
        assert_eq!(parse_flags("eftr"), (true, true, 2));
    }

    #[test]
    fn test_record_shape() {
        let (log, sink) = log_with("e", None);
        log.error("db::get", "boom");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        let mut lines = records[0].lines();
        let head = lines.next().unwrap();
        assert!(head.starts_with(">>> Time: "), "got: {head}");
        assert!(head.contains("; Build: "));
        assert!(head.contains("pid="));
        assert!(head.contains("tid="));
        assert_eq!(lines.next().unwrap(), "    db::get");
        assert_eq!(lines.next().unwrap(), "    boom");
    }

    #[test]
    fn test_disabled_classes_do_not_emit() {
        let (log, sink) = log_with("e", None);
        log.function("db::get");
        log.transmission("db::get", b"detail");
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_function_filter() {
        let (log, sink) = log_with("f", Some("increment"));
        log.function("db::get");
        log.function("db::increment");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("db::increment"));
    }

    #[test]
    fn test_response_needs_r() {
        let (log, sink) = log_with("t", None);
        log.transmission("db::get", b"k");
        log.response("db::get", b"v");
        assert_eq!(sink.records().len(), 1);

        let (log, sink) = log_with("tr", None);
        log.transmission("db::get", b"k");
        log.response("db::get", b"v");
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape(b"abc"), "abc");
        assert_eq!(escape(&[0x00, 0x03, b'X']), "\\x00\\x03X");
        assert_eq!(escape(&[0xff]), "\\xff");
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let sink = FileSink { path: path.clone() };
        sink.append("first\n");
        sink.append("second\n");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }
}
