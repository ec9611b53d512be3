//! Parser/Maker framework.
//!
//! A format is a pair of stateless codecs registered under a name:
//! a [`Parser`] turns a byte source into a [`Book`], a [`Maker`] writes a
//! book to any `Write + Seek` output. Both receive an [`Arguments`] map and
//! bind their own configuration from it with [`bind`].
//!
//! # Example
//!
//! ```no_run
//! use folio::codec::{Arguments, Registry};
//!
//! let registry = Registry::builtin();
//! let args = Arguments::new().with("txt.parse.encoding", "GBK");
//! let book = registry.parse_path("novel.txt", None, &args)?;
//! registry.make_path(&book, "novel.epub", None, &args)?;
//! # Ok::<(), folio::Error>(())
//! ```

mod config;
mod registry;

pub use config::{Argument, Arguments, Config, Field, FromArgument, SELF_KEY, bind};
pub use registry::{Codec, Registry};

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::book::Book;
use crate::error::{Error, Result};
use crate::io::{ByteSource, FileSource};

/// Which half of a codec a configuration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Parse,
    Make,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Parse => "parse",
            Mode::Make => "make",
        })
    }
}

/// Argument key prefix for a codec half, e.g. `txt.parse.`.
pub fn prefix(format: &str, mode: Mode) -> String {
    format!("{format}.{mode}.")
}

/// Decodes one storage format into a [`Book`].
///
/// Implementations keep per-call state in locals, so one instance can be
/// shared freely.
pub trait Parser: Send + Sync {
    /// Canonical format name, also the argument prefix.
    fn format(&self) -> &str;

    /// Decodes `source` into a book. Lazy content in the result may keep
    /// reading from `source`.
    fn decode(&self, source: Arc<dyn ByteSource>, args: &Arguments) -> Result<Book>;

    /// Decodes `source` and ties its lifetime to the book.
    ///
    /// On failure the source is closed before the error is returned; on
    /// success closing the source becomes one of the book's cleanup actions.
    fn parse_source(&self, source: Arc<dyn ByteSource>, args: &Arguments) -> Result<Book> {
        match self.decode(source.clone(), args) {
            Ok(mut book) => {
                book.register_cleanup(move || source.close());
                Ok(book)
            }
            Err(e) => {
                if let Err(close_err) = source.close() {
                    warn!("Failed to close {} input after error: {close_err}", self.format());
                }
                Err(e)
            }
        }
    }

    /// Opens `path` and parses it.
    fn parse(&self, path: &Path, args: &Arguments) -> Result<Book> {
        check_input(path)?;
        debug!("Parsing {} as {}", path.display(), self.format());
        let source: Arc<dyn ByteSource> = Arc::new(FileSource::open(path)?);
        self.parse_source(source, args)
    }
}

/// Seekable output accepted by [`Maker::encode`].
pub trait Output: Write + Seek {}

impl<T: Write + Seek> Output for T {}

/// Encodes a [`Book`] into one storage format.
pub trait Maker: Send + Sync {
    fn format(&self) -> &str;

    fn encode(&self, book: &Book, output: &mut dyn Output, args: &Arguments) -> Result<()>;

    /// Writes `book` to `path`. A partially written file is removed on error.
    fn make(&self, book: &Book, path: &Path, args: &Arguments) -> Result<()> {
        debug!("Making {} as {}", path.display(), self.format());
        let result = File::create(path)
            .map_err(Error::from)
            .and_then(|file| {
                let mut out = BufWriter::new(file);
                self.encode(book, &mut out, args)?;
                out.flush()?;
                Ok(())
            });
        if result.is_err() && path.exists() {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove partial output {}: {e}", path.display());
            }
        }
        result
    }
}

pub(crate) fn check_input(path: &Path) -> Result<()> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;
    if meta.is_dir() {
        return Err(Error::InvalidArgument(format!(
            "{} is a directory",
            path.display()
        )));
    }
    Ok(())
}
