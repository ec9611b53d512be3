//! Plain-text codec.
//!
//! Lines matching a heading pattern split the input into chapters. Text
//! before the first heading holds the title, author lines and the intro.
//! Chapter bodies are byte ranges of the input and are only decoded when
//! read.

mod reader;
mod writer;

use std::path::Path;
use std::sync::Arc;

use crate::book::Book;
use crate::codec::{
    Arguments, Config, Field, Maker, Mode, Output, Parser, bind, check_input, prefix,
};
use crate::error::Result;
use crate::io::{ByteSource, FileSource};

pub const FORMAT: &str = "txt";

/// Headings such as `Chapter 12`, `PART IV`, `Prologue` or `第十二章`.
pub const DEFAULT_HEADING_PATTERN: &str = r"^(?:(?:Chapter|CHAPTER|Part|PART|Book|BOOK)\s+[0-9IVXLCDMivxlcdm]+\b.*|(?:Prologue|PROLOGUE|Epilogue|EPILOGUE)\b.*|第[0-9零〇一二三四五六七八九十百千两]+[章节回卷部].*)$";

/// `txt.parse.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseConfig {
    pub encoding: String,
    /// Regular expression matched against trimmed lines.
    pub heading_pattern: String,
    /// Book title; the first line is used when unset.
    pub title: Option<String>,
    /// Title used when neither `title` nor a leading line is available.
    /// Set to the file stem by [`TxtParser::parse`].
    pub fallback_title: Option<String>,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
            heading_pattern: DEFAULT_HEADING_PATTERN.to_string(),
            title: None,
            fallback_title: None,
        }
    }
}

impl Config for ParseConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::value("encoding", |c| &mut c.encoding),
            Field::value("heading_pattern", |c| &mut c.heading_pattern),
            Field::value("title", |c| &mut c.title),
            Field::value("fallback_title", |c| &mut c.fallback_title),
        ]
    }

    fn adjust(&mut self) {
        if self.heading_pattern.trim().is_empty() {
            self.heading_pattern = DEFAULT_HEADING_PATTERN.to_string();
        }
        if self.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.title = None;
        }
    }
}

/// `txt.make.*` options.
#[derive(Debug, Clone, PartialEq)]
pub struct MakeConfig {
    pub encoding: String,
    pub line_separator: String,
    /// Prepended to every body line, e.g. an ideographic indent.
    pub paragraph_prefix: String,
    pub skip_empty_lines: bool,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            encoding: "UTF-8".to_string(),
            line_separator: "\n".to_string(),
            paragraph_prefix: String::new(),
            skip_empty_lines: true,
        }
    }
}

impl Config for MakeConfig {
    fn fields() -> Vec<Field<Self>> {
        vec![
            Field::value("encoding", |c| &mut c.encoding),
            Field::value("line_separator", |c| &mut c.line_separator),
            Field::value("paragraph_prefix", |c| &mut c.paragraph_prefix),
            Field::value("skip_empty_lines", |c| &mut c.skip_empty_lines),
        ]
    }

    /// Separators given on the command line arrive as `\r\n` escapes.
    fn adjust(&mut self) {
        self.line_separator = self
            .line_separator
            .replace("\\r", "\r")
            .replace("\\n", "\n");
        if self.line_separator.is_empty() {
            self.line_separator = "\n".to_string();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxtParser;

impl Parser for TxtParser {
    fn format(&self) -> &str {
        FORMAT
    }

    fn decode(&self, source: Arc<dyn ByteSource>, args: &Arguments) -> Result<Book> {
        let config: ParseConfig = bind(args, &prefix(FORMAT, Mode::Parse))?;
        reader::decode(source, &config)
    }

    fn parse(&self, path: &Path, args: &Arguments) -> Result<Book> {
        check_input(path)?;
        let key = format!("{}fallback_title", prefix(FORMAT, Mode::Parse));
        let mut args = args.clone();
        if !args.contains(&key) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                args.insert(key, stem);
            }
        }
        let source: Arc<dyn ByteSource> = Arc::new(FileSource::open(path)?);
        self.parse_source(source, &args)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TxtMaker;

impl Maker for TxtMaker {
    fn format(&self) -> &str {
        FORMAT
    }

    fn encode(&self, book: &Book, output: &mut dyn Output, args: &Arguments) -> Result<()> {
        let config: MakeConfig = bind(args, &prefix(FORMAT, Mode::Make))?;
        writer::encode(book, output, &config)
    }
}
