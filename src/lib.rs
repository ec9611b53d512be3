//! # folio
//!
//! Reads and writes e-books through one common document model.
//!
//! A [`Book`] is a tree of [`Chapter`]s carrying typed attributes (title,
//! authors, cover, dates) and lazy text. Codecs for MOBI, EPUB and plain
//! text turn files into books and books into files; chapter text stays in
//! the input file until it is read.
//!
//! ## Quick Start
//!
//! ```no_run
//! use folio::{Arguments, Registry};
//!
//! let registry = Registry::builtin();
//! let args = Arguments::new();
//!
//! // MOBI to EPUB, formats taken from the extensions
//! let book = registry.parse_path("input.mobi", None, &args)?;
//! registry.make_path(&book, "output.epub", None, &args)?;
//! # Ok::<(), folio::Error>(())
//! ```
//!
//! ## Building Books
//!
//! ```
//! use folio::{Book, Chapter, Text};
//!
//! let mut book = Book::new();
//! book.set_title("My Book")?;
//! book.set_authors(&["Author Name"])?;
//! book.push(Chapter::new("Chapter 1").with_text(Text::inline("c1", Text::PLAIN, "Hello.")));
//! assert_eq!(book.count(), 1);
//! # Ok::<(), folio::Error>(())
//! ```
//!
//! ## Options
//!
//! Every codec binds its options from an [`Arguments`] map keyed
//! `<format>.<parse|make>.<field>`, e.g. `txt.parse.encoding` or
//! `mobi.make.record_size`.

pub mod book;
pub mod codec;
pub mod content;
pub mod epub;
pub mod error;
pub mod io;
pub mod mobi;
pub mod txt;
pub mod variant;
pub(crate) mod util;

pub use book::{Book, Chapter, attributes};
pub use codec::{Arguments, Config, Maker, Parser, Registry, bind};
pub use content::{Flob, Text};
pub use error::{Error, Result};
pub use io::{ByteSource, FileSource, MemorySource};
pub use variant::{Attributes, Locale, Variant, VariantKind};
