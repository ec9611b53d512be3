//! MOBI (PalmDB `BOOKMOBI`/`TEXtREAd`) codec.
//!
//! Reading builds the chapter tree from the NCX index without touching the
//! compressed text; each chapter's text is a window over the text records
//! that is decompressed when read. Writing produces a MOBI 6 file with
//! PalmDOC text, EXTH metadata, an optional cover image and an NCX.

mod blocks;
mod headers;
pub mod index;
pub mod palmdoc;
pub mod pdb;
mod reader;
mod writer;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;

pub use blocks::{TextBlocks, Window, strip_trailing_entries};
pub use headers::{Compression, Exth, MobiHeader};

use crate::book::Book;
use crate::codec::{Arguments, Config, Field, FromArgument, Maker, Mode, Output, Parser, bind, prefix};
use crate::error::Result;
use crate::io::ByteSource;

pub const FORMAT: &str = "mobi";

/// `mobi.parse.*` options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseConfig {
    /// Encoding label overriding the header's code page.
    pub encoding: Option<String>,
    /// Ignore the NCX hierarchy and return every entry at the top level.
    pub flatten: bool,
}

impl Config for ParseConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::value("encoding", |c| &mut c.encoding),
            Field::value("flatten", |c| &mut c.flatten),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextCompression {
    #[default]
    PalmDoc,
    None,
}

impl FromArgument for TextCompression {
    const TYPE_NAME: &'static str = "compression";

    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "palmdoc" => Some(Self::PalmDoc),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// `mobi.make.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeConfig {
    pub record_size: u32,
    pub compression: TextCompression,
    pub include_cover: bool,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            record_size: 4096,
            compression: TextCompression::PalmDoc,
            include_cover: true,
        }
    }
}

impl Config for MakeConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::value("record_size", |c| &mut c.record_size),
            Field::value("compression", |c| &mut c.compression),
            Field::value("include_cover", |c| &mut c.include_cover),
        ]
    }

    /// Text positions are split with a mask, so the record size must be a
    /// power of two.
    fn adjust(&mut self) {
        self.record_size = self.record_size.clamp(1024, 32768).next_power_of_two();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MobiParser;

impl Parser for MobiParser {
    fn format(&self) -> &str {
        FORMAT
    }

    fn decode(&self, source: Arc<dyn ByteSource>, args: &Arguments) -> Result<Book> {
        let config: ParseConfig = bind(args, &prefix(FORMAT, Mode::Parse))?;
        reader::decode(source, &config)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MobiMaker;

impl Maker for MobiMaker {
    fn format(&self) -> &str {
        FORMAT
    }

    fn encode(&self, book: &Book, output: &mut dyn Output, args: &Arguments) -> Result<()> {
        let config: MakeConfig = bind(args, &prefix(FORMAT, Mode::Make))?;
        writer::encode(book, output, &config)
    }
}
