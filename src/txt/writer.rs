use std::borrow::Cow;
use std::io::Write;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use log::{debug, info};

use super::MakeConfig;
use crate::book::attributes::join_authors;
use crate::book::{Book, Chapter};
use crate::content::Text;
use crate::error::{Error, Result};
use crate::util::{html_body, strip_tags};

struct LineWriter<'a, W: Write + ?Sized> {
    out: &'a mut W,
    encoding: &'static Encoding,
    config: &'a MakeConfig,
    lossy: bool,
}

impl<W: Write + ?Sized> LineWriter<'_, W> {
    fn line(&mut self, text: &str) -> Result<()> {
        let mut buf = String::with_capacity(text.len() + self.config.line_separator.len());
        buf.push_str(text);
        buf.push_str(&self.config.line_separator);
        let (bytes, lossy) = encode_str(&buf, self.encoding);
        self.lossy |= lossy;
        self.out.write_all(&bytes)?;
        Ok(())
    }

    fn blank(&mut self) -> Result<()> {
        self.line("")
    }

    /// Body lines with markup removed and the paragraph prefix applied.
    fn body(&mut self, text: &Text) -> Result<()> {
        let content = text.text()?;
        let plain = if text.is_html() {
            strip_tags(html_body(&content))
        } else {
            content
        };
        for line in plain.lines() {
            let line = line.trim();
            if line.is_empty() {
                if !self.config.skip_empty_lines {
                    self.blank()?;
                }
                continue;
            }
            let prefixed = format!("{}{line}", self.config.paragraph_prefix);
            self.line(&prefixed)?;
        }
        Ok(())
    }

    fn chapter(&mut self, chapter: &Chapter) -> Result<()> {
        self.line(chapter.title().trim())?;
        if let Some(text) = &chapter.text {
            self.body(text)?;
        }
        self.blank()
    }
}

/// `encoding_rs` only decodes UTF-16, so both byte orders are written here.
/// Returns whether any character had to be replaced.
fn encode_str<'a>(text: &'a str, encoding: &'static Encoding) -> (Cow<'a, [u8]>, bool) {
    if encoding == UTF_16LE {
        let bytes = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        (Cow::Owned(bytes), false)
    } else if encoding == UTF_16BE {
        let bytes = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
        (Cow::Owned(bytes), false)
    } else {
        let (bytes, _, lossy) = encoding.encode(text);
        (bytes, lossy)
    }
}

pub(crate) fn encode<W: Write + ?Sized>(
    book: &Book,
    out: &mut W,
    config: &MakeConfig,
) -> Result<()> {
    let encoding = Encoding::for_label(config.encoding.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedEncoding(config.encoding.clone()))?;
    info!("Writing text as {}", encoding.name());

    if encoding == UTF_16LE {
        out.write_all(&[0xFF, 0xFE])?;
    } else if encoding == UTF_16BE {
        out.write_all(&[0xFE, 0xFF])?;
    }

    let mut writer = LineWriter {
        out,
        encoding,
        config,
        lossy: false,
    };
    writer.line(book.title().trim())?;
    let authors = book.authors();
    if !authors.is_empty() {
        writer.line(&format!("Author: {}", join_authors(&authors)))?;
    }
    writer.blank()?;
    if let Some(intro) = book.intro() {
        writer.body(&intro)?;
        writer.blank()?;
    }

    let mut count = 0;
    for (_, chapter) in book.walk() {
        writer.chapter(chapter)?;
        count += 1;
    }
    if writer.lossy {
        debug!("Some characters are not representable in {}", encoding.name());
    }
    info!("Wrote {count} chapters");
    Ok(())
}
