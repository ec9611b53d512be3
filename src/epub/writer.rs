use std::fs;
use std::io::{Seek, Write};

use log::{debug, info};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::MakeConfig;
use crate::book::{Book, Chapter, attributes};
use crate::content::mime;
use crate::error::Result;
use crate::util;

const OPF_PATH: &str = "OEBPS/content.opf";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
const STYLESHEET: &str = "style.css";

/// Event-based XML output with the configured indentation.
struct Xml {
    writer: Writer<Vec<u8>>,
}

impl Xml {
    fn new(indent: usize) -> Result<Self> {
        let mut writer = if indent == 0 {
            Writer::new(Vec::new())
        } else {
            Writer::new_with_indent(Vec::new(), b' ', indent)
        };
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Start(elem))?;
        Ok(())
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<()> {
        let elem = BytesStart::new(name).with_attributes(attrs.iter().copied());
        self.writer.write_event(Event::Empty(elem))?;
        Ok(())
    }

    /// `<name attrs>text</name>`, with the text escaped.
    fn element(&mut self, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
        self.start(name, attrs)?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.end(name)
    }

    /// Markup written as it is.
    fn raw(&mut self, markup: &str) -> Result<()> {
        self.writer
            .write_event(Event::Text(BytesText::from_escaped(markup)))?;
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

/// A chapter's XHTML document inside the package.
struct Document<'a> {
    id: String,
    href: String,
    chapter: &'a Chapter,
}

struct Cover {
    href: String,
    media_type: String,
    data: Vec<u8>,
}

/// Per-call encode state.
struct Encoder<'a> {
    book: &'a Book,
    config: &'a MakeConfig,
    identifier: String,
    language: String,
    documents: Vec<Document<'a>>,
    cover: Option<Cover>,
    stylesheet: Option<Vec<u8>>,
}

pub(crate) fn encode<W: Write + Seek>(book: &Book, out: W, config: &MakeConfig) -> Result<()> {
    let documents = book
        .walk()
        .enumerate()
        .map(|(i, (_, chapter))| Document {
            id: format!("chapter{:04}", i + 1),
            href: format!("text/chapter{:04}.xhtml", i + 1),
            chapter,
        })
        .collect();
    let cover = match book.cover() {
        Some(flob) => {
            let media_type = flob.mime().to_string();
            let ext = mime::extension_for(&media_type).unwrap_or("jpg");
            Some(Cover {
                href: format!("images/cover.{ext}"),
                media_type,
                data: flob.read_all()?,
            })
        }
        None => None,
    };
    let stylesheet = match &config.stylesheet {
        Some(path) => Some(fs::read(path)?),
        None => None,
    };
    let language = book
        .language()
        .filter(|l| !l.is_root())
        .map_or_else(|| config.language.clone(), |l| l.as_str().to_string());

    let encoder = Encoder {
        book,
        config,
        identifier: identifier(book),
        language,
        documents,
        cover,
        stylesheet,
    };
    encoder.write(out)
}

impl Encoder<'_> {
    fn write<W: Write + Seek>(&self, out: W) -> Result<()> {
        info!("Writing EPUB with {} documents", self.documents.len());
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(self.config.compression_level)));

        let mut zip = ZipWriter::new(out);
        zip.start_file("mimetype", stored)?;
        zip.write_all(b"application/epub+zip")?;

        zip.start_file("META-INF/container.xml", deflated)?;
        zip.write_all(&self.container()?)?;

        for doc in &self.documents {
            debug!("Writing {}", doc.href);
            zip.start_file(format!("OEBPS/{}", doc.href), deflated)?;
            zip.write_all(&self.document(doc)?)?;
        }
        if let Some(cover) = &self.cover {
            zip.start_file(format!("OEBPS/{}", cover.href), deflated)?;
            zip.write_all(&cover.data)?;
        }
        if let Some(css) = &self.stylesheet {
            zip.start_file(format!("OEBPS/{STYLESHEET}"), deflated)?;
            zip.write_all(css)?;
        }

        zip.start_file(OPF_PATH, deflated)?;
        zip.write_all(&self.opf()?)?;
        zip.start_file("OEBPS/toc.ncx", deflated)?;
        zip.write_all(&self.ncx()?)?;
        zip.finish()?;
        Ok(())
    }

    fn container(&self) -> Result<Vec<u8>> {
        let mut x = Xml::new(self.config.indent)?;
        x.start(
            "container",
            &[
                ("version", "1.0"),
                ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
            ],
        )?;
        x.start("rootfiles", &[])?;
        x.empty(
            "rootfile",
            &[
                ("full-path", OPF_PATH),
                ("media-type", "application/oebps-package+xml"),
            ],
        )?;
        x.end("rootfiles")?;
        x.end("container")?;
        Ok(x.finish())
    }

    fn document(&self, doc: &Document<'_>) -> Result<Vec<u8>> {
        let title = doc.chapter.title();
        let mut x = Xml::new(self.config.indent)?;
        x.start(
            "html",
            &[
                ("xmlns", "http://www.w3.org/1999/xhtml"),
                ("xml:lang", self.language.as_str()),
            ],
        )?;
        x.start("head", &[])?;
        x.element("title", &[], &title)?;
        if self.stylesheet.is_some() {
            let href = format!("../{STYLESHEET}");
            x.empty(
                "link",
                &[("rel", "stylesheet"), ("type", "text/css"), ("href", href.as_str())],
            )?;
        }
        x.end("head")?;
        x.start("body", &[])?;
        match &doc.chapter.text {
            Some(text) => x.raw(util::html_body(&text.to_html()?))?,
            None => x.element("h1", &[], &title)?,
        }
        x.end("body")?;
        x.end("html")?;
        Ok(x.finish())
    }

    fn opf(&self) -> Result<Vec<u8>> {
        let book = self.book;
        let mut x = Xml::new(self.config.indent)?;
        x.start(
            "package",
            &[
                ("xmlns", "http://www.idpf.org/2007/opf"),
                ("version", "2.0"),
                ("unique-identifier", "BookId"),
            ],
        )?;
        x.start(
            "metadata",
            &[
                ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
                ("xmlns:opf", "http://www.idpf.org/2007/opf"),
            ],
        )?;
        x.element("dc:title", &[], &book.title())?;
        x.element("dc:identifier", &[("id", "BookId")], &self.identifier)?;
        x.element("dc:language", &[], &self.language)?;
        for author in book.authors() {
            x.element("dc:creator", &[("opf:role", "aut")], &author)?;
        }
        if let Some(publisher) = book.get_string(attributes::PUBLISHER) {
            x.element("dc:publisher", &[], &publisher)?;
        }
        if let Some(intro) = book.intro() {
            let intro = intro.text()?;
            if !intro.trim().is_empty() {
                x.element("dc:description", &[], &intro)?;
            }
        }
        if let Some(keywords) = book.get_string(attributes::KEYWORDS) {
            for subject in attributes::split_authors(&keywords) {
                x.element("dc:subject", &[], &subject)?;
            }
        }
        if let Some(date) = book.pubdate() {
            x.element("dc:date", &[], &util::format_date(&date))?;
        }
        if let Some(rights) = book.get_string(attributes::RIGHTS) {
            x.element("dc:rights", &[], &rights)?;
        }
        if self.cover.is_some() {
            x.empty("meta", &[("name", "cover"), ("content", "cover-image")])?;
        }
        x.end("metadata")?;

        x.start("manifest", &[])?;
        x.empty(
            "item",
            &[("id", "ncx"), ("href", "toc.ncx"), ("media-type", NCX_MEDIA_TYPE)],
        )?;
        if self.stylesheet.is_some() {
            x.empty(
                "item",
                &[("id", "css"), ("href", STYLESHEET), ("media-type", "text/css")],
            )?;
        }
        if let Some(cover) = &self.cover {
            x.empty(
                "item",
                &[
                    ("id", "cover-image"),
                    ("href", cover.href.as_str()),
                    ("media-type", cover.media_type.as_str()),
                ],
            )?;
        }
        for doc in &self.documents {
            x.empty(
                "item",
                &[("id", doc.id.as_str()), ("href", doc.href.as_str()), ("media-type", mime::XHTML)],
            )?;
        }
        x.end("manifest")?;

        x.start("spine", &[("toc", "ncx")])?;
        for doc in &self.documents {
            x.empty("itemref", &[("idref", doc.id.as_str())])?;
        }
        x.end("spine")?;
        x.end("package")?;
        Ok(x.finish())
    }

    fn ncx(&self) -> Result<Vec<u8>> {
        let book = self.book;
        let depth = book.walk().map(|(d, _)| d).max().unwrap_or(1).to_string();
        let mut x = Xml::new(self.config.indent)?;
        x.start(
            "ncx",
            &[
                ("xmlns", "http://www.daisy.org/z3986/2005/ncx/"),
                ("version", "2005-1"),
            ],
        )?;
        x.start("head", &[])?;
        let metas = [
            ("dtb:uid", self.identifier.as_str()),
            ("dtb:depth", depth.as_str()),
            ("dtb:totalPageCount", "0"),
            ("dtb:maxPageNumber", "0"),
        ];
        for (name, content) in metas {
            x.empty("meta", &[("name", name), ("content", content)])?;
        }
        x.end("head")?;
        x.start("docTitle", &[])?;
        x.element("text", &[], &book.title())?;
        x.end("docTitle")?;
        if let Some(author) = book.authors().first() {
            x.start("docAuthor", &[])?;
            x.element("text", &[], author)?;
            x.end("docAuthor")?;
        }

        x.start("navMap", &[])?;
        let mut order = 0;
        for chapter in &book.children {
            self.nav_point(&mut x, chapter, &mut order)?;
        }
        x.end("navMap")?;
        x.end("ncx")?;
        Ok(x.finish())
    }

    /// Writes one navPoint and its children. `order` follows the same
    /// pre-order walk that numbered the documents.
    fn nav_point(&self, x: &mut Xml, chapter: &Chapter, order: &mut usize) -> Result<()> {
        let doc = &self.documents[*order];
        *order += 1;
        let play_order = order.to_string();
        let id = format!("navPoint-{play_order}");
        x.start("navPoint", &[("id", id.as_str()), ("playOrder", play_order.as_str())])?;
        x.start("navLabel", &[])?;
        x.element("text", &[], &chapter.title())?;
        x.end("navLabel")?;
        x.empty("content", &[("src", doc.href.as_str())])?;
        for child in &chapter.children {
            self.nav_point(x, child, order)?;
        }
        x.end("navPoint")
    }
}

/// ISBN URN, else a carried-over identifier, else a fresh UUID URN.
fn identifier(book: &Book) -> String {
    if let Some(isbn) = book.get_string(attributes::ISBN) {
        return format!("urn:isbn:{isbn}");
    }
    if let Some(id) = book
        .extensions
        .get_as::<String>("identifier")
        .filter(|id| !id.is_empty())
    {
        return id;
    }
    format!("urn:uuid:{}", uuid_v4())
}

/// Version 4 UUID from a time-seeded generator. Not for security use.
fn uuid_v4() -> String {
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5EED);
    let mut state = seed;
    let mut bytes = [0u8; 16];
    for byte in &mut bytes {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        *byte = (state >> 33) as u8;
    }
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_shape() {
        let id = uuid_v4();
        assert_eq!(id.len(), 36);
        assert_eq!(id.as_bytes()[14], b'4');
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn test_identifier_prefers_isbn() {
        let mut book = Book::new();
        book.extensions.set("identifier", "abc").unwrap();
        assert_eq!(identifier(&book), "abc");
        book.set(attributes::ISBN, "9780000000001").unwrap();
        assert_eq!(identifier(&book), "urn:isbn:9780000000001");
    }

    #[test]
    fn test_xml_escapes_text_and_attributes() {
        let mut x = Xml::new(0).unwrap();
        x.element("t", &[("a", "x\"y")], "1 < 2 & 3").unwrap();
        let out = String::from_utf8(x.finish()).unwrap();
        assert!(out.ends_with("<t a=\"x&quot;y\">1 &lt; 2 &amp; 3</t>"));
    }
}
