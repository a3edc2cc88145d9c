//! Adapter-level errors, translated to the public taxonomy above.

use snafu::Snafu;

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced inside the backend adapter.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The requested key is not present.
    #[snafu(display("key not found"))]
    NotFound,

    /// The key already exists and the operation required absence.
    #[snafu(display("key already exists"))]
    KeyExists,

    /// A transaction could not be committed because of a conflict.
    #[snafu(display("transaction conflict: {message}"))]
    TxnConflict {
        /// Engine diagnostic for the conflict.
        message: String,
    },

    /// Any other non-success return from the engine.
    #[snafu(display("backend error {code}: {message}"))]
    Backend {
        /// Numeric engine code, 0 when the engine has none.
        code: i32,
        /// Engine diagnostic.
        message: String,
    },

    /// The engine's environment could not be created or opened.
    #[snafu(display("backend unavailable: {message}"))]
    Unavailable {
        /// OS-level diagnostic.
        message: String,
    },

    /// A different engine is already open in this process.
    #[snafu(display("a backend is already open in this process"))]
    AlreadyOpen,
}

impl Error {
    /// Wraps an arbitrary engine failure.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend { code: 0, message: err.to_string() }
    }

    /// Wraps an environment-open failure.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Error::Unavailable { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Error::NotFound), "key not found");
        assert_eq!(
            format!("{}", Error::Backend { code: 7, message: "boom".into() }),
            "backend error 7: boom"
        );
        assert_eq!(
            format!("{}", Error::Unavailable { message: "no dir".into() }),
            "backend unavailable: no dir"
        );
    }

    #[test]
    fn test_helpers() {
        assert!(matches!(Error::backend("x"), Error::Backend { code: 0, .. }));
        assert!(matches!(Error::unavailable("x"), Error::Unavailable { .. }));
    }
}
