use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use encoding_rs::{CoderResult, Encoding, UTF_8};

use super::{CacheTag, Flob, TextCache};
use crate::error::{Error, Result};

const CHUNK: usize = 8 * 1024;

#[derive(Clone)]
enum Source {
    Inline(Arc<str>),
    Encoded {
        flob: Flob,
        encoding: &'static Encoding,
    },
    Cached {
        cache: TextCache,
        tag: CacheTag,
    },
}

#[derive(Clone)]
struct TextInner {
    name: String,
    kind: String,
    source: Source,
}

/// A named, typed character payload.
///
/// Encoded texts decode their [`Flob`] on every access; nothing is cached.
#[derive(Clone)]
pub struct Text {
    inner: Arc<TextInner>,
}

impl Text {
    pub const PLAIN: &'static str = "plain";
    pub const HTML: &'static str = "html";

    fn build(name: impl Into<String>, kind: impl Into<String>, source: Source) -> Self {
        Self {
            inner: Arc::new(TextInner {
                name: name.into(),
                kind: kind.into(),
                source,
            }),
        }
    }

    pub fn inline(name: impl Into<String>, kind: impl Into<String>, content: &str) -> Self {
        Self::build(name, kind, Source::Inline(Arc::from(content)))
    }

    /// Text over `flob` decoded with the encoding named by `label`.
    pub fn from_flob(
        name: impl Into<String>,
        kind: impl Into<String>,
        flob: Flob,
        label: &str,
    ) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::UnsupportedEncoding(label.to_string()))?;
        Ok(Self::with_encoding(name, kind, flob, encoding))
    }

    /// UTF-8 text over `flob`.
    pub fn from_flob_default(name: impl Into<String>, kind: impl Into<String>, flob: Flob) -> Self {
        Self::with_encoding(name, kind, flob, UTF_8)
    }

    pub fn with_encoding(
        name: impl Into<String>,
        kind: impl Into<String>,
        flob: Flob,
        encoding: &'static Encoding,
    ) -> Self {
        Self::build(name, kind, Source::Encoded { flob, encoding })
    }

    pub fn cached(
        name: impl Into<String>,
        kind: impl Into<String>,
        cache: &TextCache,
        tag: CacheTag,
    ) -> Self {
        Self::build(
            name,
            kind,
            Source::Cached {
                cache: cache.clone(),
                tag,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn is_html(&self) -> bool {
        self.inner.kind == Self::HTML
    }

    /// Backing payload of an encoded text.
    pub fn flob(&self) -> Option<&Flob> {
        match &self.inner.source {
            Source::Encoded { flob, .. } => Some(flob),
            _ => None,
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        match &self.inner.source {
            Source::Encoded { encoding, .. } => *encoding,
            _ => UTF_8,
        }
    }

    /// Same content under another name and kind.
    pub fn renamed(&self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::build(name, kind, self.inner.source.clone())
    }

    /// Decodes the whole payload.
    pub fn text(&self) -> Result<String> {
        match &self.inner.source {
            Source::Inline(s) => Ok(s.to_string()),
            Source::Cached { cache, tag } => cache.get(*tag),
            Source::Encoded { .. } => {
                let mut out = String::new();
                self.write_to(&mut out)?;
                Ok(out)
            }
        }
    }

    /// Lines without terminators; `\r\n` endings are handled.
    pub fn lines(&self, skip_empty: bool) -> Result<Vec<String>> {
        let text = self.text()?;
        Ok(text
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .filter(|l| !skip_empty || !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Markup for the content: html texts as they are, plain texts as one
    /// escaped `<p>` per non-blank line.
    pub fn to_html(&self) -> Result<String> {
        if self.is_html() {
            return self.text();
        }
        let mut html = String::new();
        for line in self.lines(true)? {
            html.push_str("<p>");
            html.push_str(&quick_xml::escape::escape(line.trim()));
            html.push_str("</p>\n");
        }
        Ok(html)
    }

    /// Streams decoded text into `sink` chunk by chunk.
    pub fn write_to(&self, sink: &mut dyn fmt::Write) -> Result<()> {
        match &self.inner.source {
            Source::Inline(s) => sink.write_str(s).map_err(fmt_error),
            Source::Cached { cache, tag } => sink.write_str(&cache.get(*tag)?).map_err(fmt_error),
            Source::Encoded { flob, encoding } => {
                decode_stream(flob.open_stream()?.as_mut(), *encoding, sink)
            }
        }
    }
}

fn fmt_error(_: fmt::Error) -> Error {
    Error::Io(io::Error::other("text sink rejected write"))
}

fn decode_stream(
    stream: &mut dyn Read,
    encoding: &'static Encoding,
    sink: &mut dyn fmt::Write,
) -> Result<()> {
    let mut decoder = encoding.new_decoder();
    let mut buf = vec![0u8; CHUNK];
    let mut out = String::new();
    loop {
        let n = match stream.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let last = n == 0;
        let mut src = &buf[..n];
        loop {
            out.clear();
            let want = decoder
                .max_utf8_buffer_length(src.len())
                .unwrap_or(src.len() * 3 + 16);
            out.reserve(want);
            let (result, read, _) = decoder.decode_to_string(src, &mut out, last);
            sink.write_str(&out).map_err(fmt_error)?;
            src = &src[read..];
            if let CoderResult::InputEmpty = result {
                break;
            }
        }
        if last {
            return Ok(());
        }
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.inner.source {
            Source::Inline(_) => "inline",
            Source::Encoded { .. } => "encoded",
            Source::Cached { .. } => "cached",
        };
        f.debug_struct("Text")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("source", &source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_encoding_fails_at_construction() {
        let flob = Flob::bytes("a.txt", b"abc".to_vec());
        let err = Text::from_flob("a", Text::PLAIN, flob, "x-no-such-charset").unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(ref l) if l == "x-no-such-charset"));
    }

    #[test]
    fn test_gbk_decoding() {
        // "中文" in GBK
        let flob = Flob::bytes("a.txt", vec![0xD6, 0xD0, 0xCE, 0xC4]);
        let text = Text::from_flob("a", Text::PLAIN, flob, "GBK").unwrap();
        assert_eq!(text.text().unwrap(), "中文");
    }

    #[test]
    fn test_utf16_bom_is_removed() {
        let mut data = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        let text = Text::from_flob("a", Text::PLAIN, Flob::bytes("", data), "UTF-16LE").unwrap();
        assert_eq!(text.text().unwrap(), "hi");
    }

    #[test]
    fn test_decode_across_chunks() {
        let body = "é".repeat(CHUNK);
        let text = Text::from_flob_default("a", Text::PLAIN, Flob::bytes("", body.clone().into_bytes()));
        assert_eq!(text.text().unwrap(), body);
    }

    #[test]
    fn test_lines() {
        let text = Text::inline("a", Text::PLAIN, "one\r\n\r\ntwo\n");
        assert_eq!(text.lines(true).unwrap(), ["one", "two"]);
        assert_eq!(text.lines(false).unwrap(), ["one", "", "two", ""]);
    }

    #[test]
    fn test_plain_to_html() {
        let text = Text::inline("a", Text::PLAIN, "Fish & chips\r\n\n  <done>\n");
        assert_eq!(text.to_html().unwrap(), "<p>Fish &amp; chips</p>\n<p>&lt;done&gt;</p>\n");
        let html = Text::inline("b", Text::HTML, "<p>x</p>");
        assert_eq!(html.to_html().unwrap(), "<p>x</p>");
    }

    #[test]
    fn test_cached_text() {
        let cache = TextCache::new();
        let tag = cache.append("first");
        let second = cache.append("second");
        let text = Text::cached("c", Text::HTML, &cache, second);
        assert!(text.is_html());
        assert_eq!(text.text().unwrap(), "second");
        assert_eq!(cache.get(tag).unwrap(), "first");
    }
}
