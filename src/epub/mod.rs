//! EPUB 2 codec.
//!
//! The reader follows `container.xml` to the OPF package, reads the Dublin
//! Core metadata and turns the NCX navigation map into the chapter tree.
//! Chapter texts stay inside the ZIP until read. The writer streams an
//! OPF, an NCX and one XHTML document per chapter.

mod reader;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use crate::book::Book;
use crate::codec::{Arguments, Config, Field, Maker, Mode, Output, Parser, bind, prefix};
use crate::error::Result;
use crate::io::ByteSource;

pub const FORMAT: &str = "epub";

/// `epub.parse.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseConfig {
    /// Encoding of the content documents.
    pub encoding: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
        }
    }
}

impl Config for ParseConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![Field::value("encoding", |c| &mut c.encoding)]
    }
}

/// `epub.make.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeConfig {
    /// Spaces per nesting level in generated XML.
    pub indent: usize,
    /// Deflate level, 1 to 9.
    pub compression_level: u32,
    /// Language written when the book has none.
    pub language: String,
    /// CSS file copied into the package and linked from every chapter.
    pub stylesheet: Option<PathBuf>,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            indent: 2,
            compression_level: 6,
            language: "en".to_string(),
            stylesheet: None,
        }
    }
}

impl Config for MakeConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::value("indent", |c| &mut c.indent),
            Field::value("compression_level", |c| &mut c.compression_level),
            Field::value("language", |c| &mut c.language),
            Field::value("stylesheet", |c| &mut c.stylesheet),
        ]
    }

    fn adjust(&mut self) {
        self.indent = self.indent.min(8);
        self.compression_level = self.compression_level.clamp(1, 9);
        if self.language.trim().is_empty() {
            self.language = "en".to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser;

impl Parser for EpubParser {
    fn format(&self) -> &str {
        FORMAT
    }

    fn decode(&self, source: Arc<dyn ByteSource>, args: &Arguments) -> Result<Book> {
        let config: ParseConfig = bind(args, &prefix(FORMAT, Mode::Parse))?;
        reader::decode(source, &config)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EpubMaker;

impl Maker for EpubMaker {
    fn format(&self) -> &str {
        FORMAT
    }

    fn encode(&self, book: &Book, output: &mut dyn Output, args: &Arguments) -> Result<()> {
        let config: MakeConfig = bind(args, &prefix(FORMAT, Mode::Make))?;
        writer::encode(book, output, &config)
    }
}
