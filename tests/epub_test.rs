use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use folio::codec::{Arguments, Maker, Parser};
use folio::content::{Flob, ZipStore};
use folio::epub::{EpubMaker, EpubParser};
use folio::{Book, ByteSource, Chapter, Error, Locale, MemorySource, Text, attributes};
use tempfile::NamedTempFile;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

fn sample_book() -> Book {
    let mut book = Book::new();
    book.set_title("Agnes & Co").unwrap();
    book.set_authors(&["Anne Writer"]).unwrap();
    book.set(attributes::PUBLISHER, "Folio Press").unwrap();
    book.set(attributes::ISBN, "9780000000002").unwrap();
    book.set(attributes::LANGUAGE, Locale::new("en-GB")).unwrap();
    book.set(
        attributes::INTRO,
        Text::inline("intro", Text::PLAIN, "A short description."),
    )
    .unwrap();
    book.set(
        attributes::COVER,
        Flob::bytes("cover.jpg", vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F']),
    )
    .unwrap();

    let mut part = Chapter::new("Part I");
    part.push(Chapter::new("Chapter 1").with_text(Text::inline(
        "c1",
        Text::HTML,
        "<html><body><p>First &amp; foremost.</p></body></html>",
    )));
    part.push(Chapter::new("Chapter 2").with_text(Text::inline(
        "c2",
        Text::PLAIN,
        "Line <one>\nLine two",
    )));
    book.push(part);
    book
}

fn make_bytes(book: &Book, args: &Arguments) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    EpubMaker
        .encode(book, &mut out, args)
        .expect("Failed to write EPUB");
    out.into_inner()
}

fn text_of(chapter: &Chapter) -> String {
    chapter
        .text
        .as_ref()
        .map(|t| t.text().expect("Failed to read chapter text"))
        .unwrap_or_default()
}

#[test]
fn test_write_then_read_epub() {
    let file = NamedTempFile::with_suffix(".epub").unwrap();
    EpubMaker
        .make(&sample_book(), file.path(), &Arguments::new())
        .expect("Failed to write EPUB");

    let book = EpubParser
        .parse(file.path(), &Arguments::new())
        .expect("Failed to read EPUB");

    assert_eq!(book.title(), "Agnes & Co");
    assert_eq!(book.authors(), ["Anne Writer"]);
    assert_eq!(book.get_string(attributes::PUBLISHER).as_deref(), Some("Folio Press"));
    assert_eq!(book.get_string(attributes::ISBN).as_deref(), Some("9780000000002"));
    assert_eq!(book.language().unwrap().as_str(), "en-GB");
    assert_eq!(
        book.intro().unwrap().text().unwrap(),
        "A short description."
    );

    let cover = book.cover().expect("Cover should be present");
    assert_eq!(cover.mime(), "image/jpeg");
    assert_eq!(&cover.read_all().unwrap()[..3], &[0xFF, 0xD8, 0xFF]);

    let tree: Vec<(usize, String)> = book.walk().map(|(d, c)| (d, c.title())).collect();
    assert_eq!(
        tree,
        [
            (1, "Part I".to_string()),
            (2, "Chapter 1".to_string()),
            (2, "Chapter 2".to_string()),
        ]
    );

    let part = book.get(0).unwrap();
    assert!(text_of(part).contains("<h1>Part I</h1>"));
    let first = part.get(0).unwrap();
    assert!(first.text.as_ref().unwrap().is_html());
    assert!(text_of(first).contains("<p>First &amp; foremost.</p>"));
    assert!(text_of(part.get(1).unwrap()).contains("<p>Line &lt;one&gt;</p>"));
}

#[test]
fn test_mimetype_is_first_and_stored() {
    let bytes = make_bytes(&sample_book(), &Arguments::new());
    assert_eq!(&bytes[0..4], b"PK\x03\x04");
    // Local header: compression method at 8, extra length at 28, name at 30.
    assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 0);
    assert_eq!(&bytes[30..38], b"mimetype");
    let data = 38 + u16::from_le_bytes([bytes[28], bytes[29]]) as usize;
    assert_eq!(&bytes[data..data + 20], b"application/epub+zip");
}

#[test]
fn test_package_layout() {
    let bytes = make_bytes(&sample_book(), &Arguments::new());
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(bytes));
    let store = ZipStore::open(source).unwrap();
    let names = store.names();
    for expected in [
        "mimetype",
        "META-INF/container.xml",
        "OEBPS/content.opf",
        "OEBPS/toc.ncx",
        "OEBPS/images/cover.jpg",
    ] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }
    assert_eq!(
        names.iter().filter(|n| n.starts_with("OEBPS/text/")).count(),
        3
    );

    let opf = store.read_string("OEBPS/content.opf").unwrap();
    assert!(opf.contains("<dc:title>Agnes &amp; Co</dc:title>"));
    assert!(opf.contains("urn:isbn:9780000000002"));
    assert!(opf.contains(r#"<meta name="cover" content="cover-image"/>"#));
    assert!(opf.contains(r#"<spine toc="ncx">"#));
}

#[test]
fn test_language_falls_back_to_config() {
    let mut book = sample_book();
    book.attributes.remove(attributes::LANGUAGE);
    let args = Arguments::new().with("epub.make.language", "de");
    let bytes = make_bytes(&book, &args);
    let parsed = EpubParser
        .parse_source(Arc::new(MemorySource::new(bytes)), &Arguments::new())
        .unwrap();
    assert_eq!(parsed.language().unwrap().language(), "de");
}

#[test]
fn test_stylesheet_is_copied() {
    let mut css = NamedTempFile::with_suffix(".css").unwrap();
    css.write_all(b"p { text-indent: 1em; }").unwrap();
    let args = Arguments::new().with("epub.make.stylesheet", css.path().to_str().unwrap());
    let bytes = make_bytes(&sample_book(), &args);

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut content = String::new();
    archive
        .by_name("OEBPS/style.css")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "p { text-indent: 1em; }");
}

/// An EPUB 3 package without an NCX: every spine document becomes a
/// top-level chapter named after its file.
#[test]
fn test_spine_without_navigation() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let files: [(&str, &str); 4] = [
        (
            "META-INF/container.xml",
            r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="content/book.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#,
        ),
        (
            "content/book.opf",
            r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Spine Only</dc:title>
    <dc:identifier>id-1</dc:identifier>
  </metadata>
  <manifest>
    <item id="a" href="one.xhtml" media-type="application/xhtml+xml"/>
    <item id="b" href="two.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="a"/><itemref idref="b"/></spine>
</package>"#,
        ),
        ("content/one.xhtml", "<html><body><p>One</p></body></html>"),
        ("content/two.xhtml", "<html><body><p>Two</p></body></html>"),
    ];
    for (name, content) in files {
        zip.start_file(name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    let bytes = zip.finish().unwrap().into_inner();

    let book = parse_zip(bytes);
    assert_eq!(book.title(), "Spine Only");
    assert_eq!(book.extensions.get_as::<String>("identifier").as_deref(), Some("id-1"));
    let titles: Vec<String> = book.children.iter().map(|c| c.title()).collect();
    assert_eq!(titles, ["one", "two"]);
    assert!(text_of(&book.children[1]).contains("<p>Two</p>"));
}

fn parse_zip(bytes: Vec<u8>) -> Book {
    EpubParser
        .parse_source(Arc::new(MemorySource::new(bytes)), &Arguments::new())
        .expect("Failed to parse EPUB")
}

#[test]
fn test_elements_with_closing_tags() {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    let files: [(&str, &[u8]); 6] = [
        (
            "META-INF/container.xml",
            br#"<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OPS/package.opf" media-type="application/oebps-package+xml"></rootfile></rootfiles>
</container>"#,
        ),
        (
            "OPS/package.opf",
            br#"<package xmlns="http://www.idpf.org/2007/opf" version="2.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Long Form</dc:title>
    <meta name="cover" content="img"></meta>
  </metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"></item>
    <item id="a" href="one.xhtml" media-type="application/xhtml+xml"></item>
    <item id="b" href="two.xhtml" media-type="application/xhtml+xml"></item>
    <item id="img" href="cover.png" media-type="image/png"></item>
  </manifest>
  <spine toc="ncx"><itemref idref="a"></itemref><itemref idref="b"></itemref></spine>
</package>"#,
        ),
        (
            "OPS/toc.ncx",
            br#"<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <navMap>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>First</text></navLabel><content src="one.xhtml"></content>
    </navPoint>
    <navPoint id="p2" playOrder="2">
      <navLabel><text>Second</text></navLabel><content src="two.xhtml"></content>
    </navPoint>
  </navMap>
</ncx>"#,
        ),
        ("OPS/one.xhtml", b"<html><body><p>One</p></body></html>"),
        ("OPS/two.xhtml", b"<html><body><p>Two</p></body></html>"),
        ("OPS/cover.png", PNG_MAGIC),
    ];
    for (name, content) in files {
        zip.start_file(name, options).unwrap();
        zip.write_all(content).unwrap();
    }
    let book = parse_zip(zip.finish().unwrap().into_inner());

    assert_eq!(book.title(), "Long Form");
    let titles: Vec<String> = book.children.iter().map(|c| c.title()).collect();
    assert_eq!(titles, ["First", "Second"]);
    assert!(text_of(&book.children[0]).contains("<p>One</p>"));
    let cover = book.cover().expect("cover should be found");
    assert_eq!(cover.read_all().unwrap(), PNG_MAGIC);
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

#[test]
fn test_not_a_zip_fails() {
    let err = EpubParser
        .parse_source(
            Arc::new(MemorySource::new(b"plain text, not a zip".to_vec())),
            &Arguments::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Zip(_)), "{err:?}");
}

#[test]
fn test_unknown_content_encoding() {
    let bytes = make_bytes(&sample_book(), &Arguments::new());
    let args = Arguments::new().with("epub.parse.encoding", "no-such-charset");
    let err = EpubParser
        .parse_source(Arc::new(MemorySource::new(bytes)), &args)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedEncoding(_)));
}
