//! Error types for the block codec and its file collaborators.

use std::fmt;
use std::io;

/// The result type used throughout kvblock.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for kvblock operations.
///
/// Success is `Ok(..)`; every failure carries one of five kinds and a
/// human readable message built from up to two fragments.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entry or file does not exist.
    #[error("NotFound: {0}")]
    NotFound(String),

    /// Stored bytes failed to decode.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The operation is not supported by this implementation.
    #[error("NotSupported: {0}")]
    NotSupported(String),

    /// A caller violated a precondition.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// An I/O error reported by the file collaborator.
    #[error("IOError: {0}")]
    Io(#[from] io::Error),
}

/// The kind of an [`Error`], without its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::Corruption`].
    Corruption,
    /// See [`Error::NotSupported`].
    NotSupported,
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::Io`].
    IoError,
}

impl ErrorKind {
    /// The name used when rendering a status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Corruption => "Corruption",
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::IoError => "IOError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn join(msg: &str, msg2: &str) -> String {
    if msg2.is_empty() {
        msg.to_string()
    } else {
        format!("{}: {}", msg, msg2)
    }
}

impl Error {
    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a corruption error from two message fragments.
    pub fn corruption_with(msg: &str, msg2: &str) -> Self {
        Error::Corruption(join(msg, msg2))
    }

    /// Creates a new not supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    /// Creates a not supported error from two message fragments.
    pub fn not_supported_with(msg: &str, msg2: &str) -> Self {
        Error::NotSupported(join(msg, msg2))
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates an invalid argument error from two message fragments.
    pub fn invalid_argument_with(msg: &str, msg2: &str) -> Self {
        Error::InvalidArgument(join(msg, msg2))
    }

    /// Creates an I/O error from two message fragments, typically a file
    /// name and the reason.
    pub fn io_error(msg: &str, msg2: &str) -> Self {
        Error::Io(io::Error::other(join(msg, msg2)))
    }

    /// Wraps an `io::Error` with the name of the file it concerns.
    pub(crate) fn from_io(context: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(join(context, &err.to_string()))
        } else {
            Error::Io(io::Error::new(err.kind(), join(context, &err.to_string())))
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Corruption(_) => ErrorKind::Corruption,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::Io(_) => ErrorKind::IoError,
        }
    }

    /// Returns true for [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true for [`ErrorKind::Corruption`].
    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }

    /// Returns true for [`ErrorKind::NotSupported`].
    pub fn is_not_supported(&self) -> bool {
        self.kind() == ErrorKind::NotSupported
    }

    /// Returns true for [`ErrorKind::InvalidArgument`].
    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    /// Returns true for [`ErrorKind::IoError`].
    pub fn is_io_error(&self) -> bool {
        self.kind() == ErrorKind::IoError
    }

    /// Makes an owned copy suitable for storing as a sticky status.
    ///
    /// `io::Error` is not `Clone`, so the I/O variant keeps its kind and
    /// rendered message only.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Error::NotFound(m) => Error::NotFound(m.clone()),
            Error::Corruption(m) => Error::Corruption(m.clone()),
            Error::NotSupported(m) => Error::NotSupported(m.clone()),
            Error::InvalidArgument(m) => Error::InvalidArgument(m.clone()),
            Error::Io(e) => Error::Io(io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidArgument(join("bad options", &err.to_string()))
    }
}

/// Renders a status for diagnostics: `"OK"` on success, otherwise the kind
/// name, a colon and the message.
pub fn status_string<T>(result: &Result<T>) -> String {
    match result {
        Ok(_) => "OK".to_string(),
        Err(e) => e.to_string(),
    }
}
