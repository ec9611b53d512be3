use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use log::{debug, info};
use memchr::memchr;
use regex::Regex;

use super::ParseConfig;
use crate::book::{Book, Chapter, attributes};
use crate::content::{Flob, Text};
use crate::error::{Error, Result};
use crate::io::ByteSource;

/// Longer lines are prose even when they match the heading pattern.
const MAX_HEADING_CHARS: usize = 80;

const AUTHOR_PREFIXES: [&str; 4] = ["Author:", "By:", "作者：", "作者:"];

/// Where chapter bodies are read from.
enum Body {
    /// Byte ranges of the input, decoded on access.
    Source {
        source: Arc<dyn ByteSource>,
        encoding: &'static Encoding,
    },
    /// The input decoded up front; used for encodings that are not ASCII
    /// compatible, where lines cannot be found in the raw bytes.
    Decoded(String),
}

struct Line {
    start: usize,
    /// Start of the following line.
    next: usize,
    text: String,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub(crate) fn decode(source: Arc<dyn ByteSource>, config: &ParseConfig) -> Result<Book> {
    let label = config.encoding.trim();
    let configured = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Error::UnsupportedEncoding(config.encoding.clone()))?;
    let heading = Regex::new(&config.heading_pattern)
        .map_err(|_| Error::bad_config("txt.parse.heading_pattern", &config.heading_pattern, "regex"))?;

    let len = usize::try_from(source.len())
        .map_err(|_| Error::InvalidArgument("text input too large".into()))?;
    info!("Scanning {len} bytes of text");
    let raw = source.read_at(0, len)?;
    let (encoding, bom) = Encoding::for_bom(&raw).unwrap_or((configured, 0));
    if bom > 0 {
        debug!("Byte order mark selects {}", encoding.name());
    }

    let body = if encoding.is_ascii_compatible() {
        Body::Source {
            source: source.clone(),
            encoding,
        }
    } else {
        let (text, _) = encoding.decode_without_bom_handling(&raw[bom..]);
        Body::Decoded(text.into_owned())
    };
    let (data, first, line_encoding): (&[u8], usize, &'static Encoding) = match &body {
        Body::Source { .. } => (&raw, bom, encoding),
        Body::Decoded(text) => (text.as_bytes(), 0, UTF_8),
    };
    let lines = scan_lines(data, first, line_encoding);
    Decoder {
        body: &body,
        data,
        lines: &lines,
        heading: &heading,
        config,
    }
    .run()
}

fn scan_lines(data: &[u8], mut at: usize, encoding: &'static Encoding) -> Vec<Line> {
    let mut lines = Vec::new();
    while at < data.len() {
        let (end, next) = match memchr(b'\n', &data[at..]) {
            Some(i) => (at + i, at + i + 1),
            None => (data.len(), data.len()),
        };
        let content_end = if end > at && data[end - 1] == b'\r' {
            end - 1
        } else {
            end
        };
        let (text, _) = encoding.decode_without_bom_handling(&data[at..content_end]);
        lines.push(Line {
            start: at,
            next,
            text: text.into_owned(),
        });
        at = next;
    }
    lines
}

struct Decoder<'a> {
    body: &'a Body,
    data: &'a [u8],
    lines: &'a [Line],
    heading: &'a Regex,
    config: &'a ParseConfig,
}

impl Decoder<'_> {
    fn run(self) -> Result<Book> {
        let headings: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| self.is_heading(line))
            .map(|(i, _)| i)
            .collect();
        let front_end = headings.first().copied().unwrap_or(self.lines.len());
        debug!("Found {} headings in {} lines", headings.len(), self.lines.len());

        let mut book = Book::new();
        let mut cursor = self.skip_blank(0, front_end);

        let title = match &self.config.title {
            Some(title) => {
                if cursor < front_end && self.lines[cursor].text.trim() == title.trim() {
                    cursor += 1;
                }
                title.trim().to_string()
            }
            None if cursor < front_end => {
                cursor += 1;
                self.lines[cursor - 1].text.trim().to_string()
            }
            None => self.config.fallback_title.clone().unwrap_or_default(),
        };
        book.set_title(&title)?;

        cursor = self.skip_blank(cursor, front_end);
        let mut authors = Vec::new();
        while cursor < front_end {
            let Some(names) = author_line(&self.lines[cursor].text) else {
                break;
            };
            authors.extend(attributes::split_authors(names));
            cursor += 1;
        }
        if !authors.is_empty() {
            book.set_authors(authors.as_slice())?;
        }

        let front_start = self.offset_of(cursor);
        let front_stop = self.offset_of(front_end);
        if headings.is_empty() {
            if let Some(text) = self.text("chapter1", front_start, front_stop)? {
                book.push(Chapter::new(&title).with_text(text));
            }
            return Ok(book);
        }
        if let Some(intro) = self.text(attributes::INTRO, front_start, front_stop)? {
            book.set(attributes::INTRO, intro)?;
        }

        for (n, &h) in headings.iter().enumerate() {
            let line = &self.lines[h];
            let stop = headings
                .get(n + 1)
                .map_or(self.data.len(), |&next| self.lines[next].start);
            let mut chapter = Chapter::new(line.text.trim());
            chapter.text = self.text(&format!("chapter{}", n + 1), line.next, stop)?;
            book.push(chapter);
        }
        info!("Read {} chapters", book.len());
        Ok(book)
    }

    fn is_heading(&self, line: &Line) -> bool {
        let text = line.text.trim();
        !text.is_empty()
            && text.chars().count() <= MAX_HEADING_CHARS
            && self.heading.is_match(text)
    }

    fn skip_blank(&self, mut at: usize, stop: usize) -> usize {
        while at < stop && self.lines[at].is_blank() {
            at += 1;
        }
        at
    }

    fn offset_of(&self, line: usize) -> usize {
        self.lines.get(line).map_or(self.data.len(), |l| l.start)
    }

    /// Text over `start..stop`, or `None` when the range holds only
    /// whitespace.
    fn text(&self, name: &str, start: usize, stop: usize) -> Result<Option<Text>> {
        let stop = stop.max(start);
        if self.data[start..stop].iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let text = match self.body {
            Body::Source { source, encoding } => {
                let flob = Flob::block(source.clone(), start as u64, (stop - start) as u64)?
                    .with_name(format!("{name}.txt"))
                    .with_mime("text/plain");
                Text::with_encoding(name, Text::PLAIN, flob, *encoding)
            }
            Body::Decoded(decoded) => Text::inline(name, Text::PLAIN, &decoded[start..stop]),
        };
        Ok(Some(text))
    }
}

fn author_line(text: &str) -> Option<&str> {
    let text = text.trim();
    AUTHOR_PREFIXES
        .iter()
        .find_map(|p| text.strip_prefix(p))
        .map(str::trim)
        .filter(|names| !names.is_empty())
}
