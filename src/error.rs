//! Error types for folio operations.

use thiserror::Error;

/// Errors that can occur while reading, converting or writing a book.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Structural violation in a binary archive. `cause` is a stable key
    /// such as `record-offset` or `exth-length`.
    #[error("Malformed archive: {cause}")]
    MalformedArchive { cause: String },

    #[error("Bad configuration for '{key}': cannot read '{value}' as {expected}")]
    BadConfiguration {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    pub fn malformed(cause: impl Into<String>) -> Self {
        Error::MalformedArchive {
            cause: cause.into(),
        }
    }

    pub(crate) fn bad_config(
        key: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Error::BadConfiguration {
            key: key.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Stable cause key for `MalformedArchive`, `None` for other variants.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Error::MalformedArchive { cause } => Some(cause),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
