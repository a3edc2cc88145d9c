//! Error taxonomy surfaced to callers of the access layer.

use snafu::Snafu;

/// Result type alias for arbordb operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can be surfaced by any arbordb operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A required argument was missing or malformed.
    #[snafu(display("bad argument: {reason}"))]
    BadArgument {
        /// What was wrong with the arguments.
        reason: String,
    },

    /// An assembled composite key exceeded the maximum key length.
    #[snafu(display("key too long: {size} bytes (max {max})"))]
    KeyTooLong {
        /// Actual size of the assembled key in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Operation on a closed or never-opened connection.
    #[snafu(display("connection is not open"))]
    NotOpen,

    /// The backend environment could not be created or opened.
    #[snafu(display("backend unavailable: {message}"))]
    BackendUnavailable {
        /// OS-level diagnostic from the store.
        message: String,
    },

    /// A non-success return from the store other than not-found.
    #[snafu(display("backend error {code}: {message}"))]
    BackendError {
        /// Numeric engine code, 0 when the engine has none.
        code: i32,
        /// Human-readable engine diagnostic.
        message: String,
    },

    /// A cursor operation was submitted through the asynchronous path.
    #[snafu(display("cursor operations cannot run asynchronously"))]
    AsyncNotSupported,

    /// A second, incompatible backend handle was opened in this process.
    #[snafu(display("a different backend is already open in this process"))]
    MultipleOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_bad_argument() {
        let err = Error::BadArgument { reason: "global name required".to_string() };
        assert_eq!(format!("{err}"), "bad argument: global name required");
    }

    #[test]
    fn test_error_display_key_too_long() {
        let err = Error::KeyTooLong { size: 40000, max: 32767 };
        assert_eq!(format!("{err}"), "key too long: 40000 bytes (max 32767)");
    }

    #[test]
    fn test_error_display_not_open() {
        assert_eq!(format!("{}", Error::NotOpen), "connection is not open");
    }

    #[test]
    fn test_error_display_backend_unavailable() {
        let err = Error::BackendUnavailable { message: "no such directory".to_string() };
        assert_eq!(format!("{err}"), "backend unavailable: no such directory");
    }

    #[test]
    fn test_error_display_backend_error() {
        let err = Error::BackendError { code: -30792, message: "map full".to_string() };
        assert_eq!(format!("{err}"), "backend error -30792: map full");
    }

    #[test]
    fn test_error_display_async_not_supported() {
        assert_eq!(
            format!("{}", Error::AsyncNotSupported),
            "cursor operations cannot run asynchronously"
        );
    }

    #[test]
    fn test_error_display_multiple_open() {
        assert_eq!(
            format!("{}", Error::MultipleOpen),
            "a different backend is already open in this process"
        );
    }
}
