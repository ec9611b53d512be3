use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use encoding_rs::Encoding;
use log::{debug, info, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use super::ParseConfig;
use crate::book::{Book, Chapter, attributes};
use crate::content::{Flob, Text, ZipStore, mime};
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::util::{local_name, parse_date, resolve_reference};
use crate::variant::Locale;

const CONTAINER: &str = "META-INF/container.xml";

/// One `dc:*` element of the OPF metadata.
#[derive(Debug, Clone)]
struct DcEntry {
    name: String,
    value: String,
    scheme: Option<String>,
}

#[derive(Debug, Clone)]
struct ManifestItem {
    href: String,
    media_type: String,
    properties: Option<String>,
}

#[derive(Debug, Default)]
struct Package {
    metadata: Vec<DcEntry>,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
    toc_id: Option<String>,
    cover_id: Option<String>,
}

impl Package {
    fn first(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|e| e.name == name && !e.value.is_empty())
            .map(|e| e.value.as_str())
    }

    fn all(&self, name: &str) -> Vec<&str> {
        self.metadata
            .iter()
            .filter(|e| e.name == name && !e.value.is_empty())
            .map(|e| e.value.as_str())
            .collect()
    }

    /// EPUB 3 `cover-image` property first, then the EPUB 2 `meta cover`.
    fn cover(&self) -> Option<&ManifestItem> {
        self.manifest
            .values()
            .find(|item| {
                item.properties
                    .as_deref()
                    .is_some_and(|p| p.split_ascii_whitespace().any(|p| p == "cover-image"))
            })
            .or_else(|| self.cover_id.as_ref().and_then(|id| self.manifest.get(id)))
    }

    fn ncx(&self) -> Option<&ManifestItem> {
        self.toc_id
            .as_ref()
            .and_then(|id| self.manifest.get(id))
            .or_else(|| {
                self.manifest
                    .values()
                    .find(|item| item.media_type == "application/x-dtbncx+xml")
            })
    }
}

/// A `navPoint` with its nested points.
#[derive(Debug, Default)]
struct NavPoint {
    label: String,
    src: String,
    children: Vec<NavPoint>,
}

pub(crate) fn decode(source: Arc<dyn ByteSource>, config: &ParseConfig) -> Result<Book> {
    let encoding = Encoding::for_label(config.encoding.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedEncoding(config.encoding.clone()))?;
    let store = Arc::new(ZipStore::open(source)?);

    info!("Reading EPUB container");
    let opf_path = rootfile(&store.read_string(CONTAINER)?)?;
    let opf_dir = parent_dir(&opf_path);
    info!("Reading package {opf_path}");
    let package = parse_opf(&store.read_string(&opf_path)?)?;

    let mut book = Book::new();
    fill_metadata(&mut book, &package, &store, &opf_dir)?;

    let mut builder = ChapterBuilder {
        store: &store,
        encoding,
        claimed: HashSet::new(),
    };
    if let Some(ncx) = package.ncx() {
        let ncx_path = resolve_path(&opf_dir, &ncx.href);
        info!("Reading navigation {ncx_path}");
        let points = parse_ncx(&store.read_string(&ncx_path)?)?;
        let ncx_dir = parent_dir(&ncx_path);
        for point in &points {
            book.push(builder.chapter(point, &ncx_dir)?);
        }
    }

    for id in &package.spine {
        let Some(item) = package.manifest.get(id) else {
            warn!("Spine references unknown manifest item {id}");
            continue;
        };
        let path = resolve_path(&opf_dir, &item.href);
        if builder.claimed.contains(&path) {
            continue;
        }
        debug!("Spine document {path} is not in the navigation");
        let title = file_stem(&path).to_string();
        let mut chapter = Chapter::new(&title);
        chapter.text = builder.text(&path)?;
        book.push(chapter);
    }

    info!("Decoded {} chapters", book.count());
    Ok(book)
}

struct ChapterBuilder<'a> {
    store: &'a Arc<ZipStore>,
    encoding: &'static Encoding,
    claimed: HashSet<String>,
}

impl ChapterBuilder<'_> {
    fn chapter(&mut self, point: &NavPoint, base: &str) -> Result<Chapter> {
        let mut chapter = Chapter::new(point.label.trim());
        let href = point.src.split('#').next().unwrap_or_default();
        if !href.is_empty() {
            let path = resolve_path(base, href);
            // A document shared by several points belongs to the first one.
            if self.claimed.insert(path.clone()) {
                chapter.text = self.text(&path)?;
            }
        }
        for child in &point.children {
            chapter.push(self.chapter(child, base)?);
        }
        Ok(chapter)
    }

    fn text(&mut self, path: &str) -> Result<Option<Text>> {
        self.claimed.insert(path.to_string());
        match Flob::zip_entry(self.store, path) {
            Ok(flob) => Ok(Some(Text::with_encoding(
                path,
                Text::HTML,
                flob.with_mime(mime::XHTML),
                self.encoding,
            ))),
            Err(Error::NotFound(_)) => {
                warn!("Content document {path} is missing from the archive");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn fill_metadata(
    book: &mut Book,
    package: &Package,
    store: &Arc<ZipStore>,
    opf_dir: &str,
) -> Result<()> {
    if let Some(title) = package.first("title") {
        book.set_title(title.trim())?;
    }
    let authors = package.all("creator");
    if !authors.is_empty() {
        book.set_authors(&authors)?;
    }
    let strings = [
        (attributes::PUBLISHER, "publisher"),
        (attributes::RIGHTS, "rights"),
    ];
    for (name, element) in strings {
        if let Some(value) = package.first(element) {
            book.set(name, value.trim())?;
        }
    }
    let subjects: Vec<&str> = package.all("subject").into_iter().map(str::trim).collect();
    if !subjects.is_empty() {
        book.set(attributes::KEYWORDS, subjects.join(";"))?;
    }
    if let Some(description) = package.first("description") {
        let kind = if description.contains('<') { Text::HTML } else { Text::PLAIN };
        book.set(attributes::INTRO, Text::inline("intro", kind, description.trim()))?;
    }
    if let Some(date) = package.first("date") {
        match parse_date(date) {
            Some(d) => book.set(attributes::PUBDATE, d)?,
            None => debug!("Ignoring unparsable date '{date}'"),
        }
    }
    if let Some(language) = package.first("language") {
        book.set(attributes::LANGUAGE, Locale::new(language.trim()))?;
    }

    for entry in package.metadata.iter().filter(|e| e.name == "identifier") {
        let value = entry.value.trim();
        let is_isbn = entry
            .scheme
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("isbn"));
        if let Some(isbn) = value.strip_prefix("urn:isbn:") {
            book.set(attributes::ISBN, isbn)?;
        } else if is_isbn {
            book.set(attributes::ISBN, value)?;
        } else if !value.is_empty() && !book.extensions.contains("identifier") {
            book.extensions.set("identifier", value)?;
        }
    }

    if let Some(cover) = package.cover() {
        let path = resolve_path(opf_dir, &cover.href);
        match Flob::zip_entry(store, &path) {
            Ok(flob) => {
                let flob = if cover.media_type.is_empty() {
                    flob
                } else {
                    flob.with_mime(cover.media_type.as_str())
                };
                book.set(attributes::COVER, flob)?;
            }
            Err(Error::NotFound(_)) => warn!("Cover image {path} is missing from the archive"),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| local_name(a.key.as_ref()) == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn rootfile(container: &str) -> Result<String> {
    let mut reader = Reader::from_str(container);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Event::Eof => return Err(Error::NotFound("rootfile in container.xml".to_string())),
            _ => {}
        }
    }
}

fn parse_opf(content: &str) -> Result<Package> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut package = Package::default();
    let mut in_metadata = false;
    let mut current: Option<DcEntry> = None;

    loop {
        let event = reader.read_event()?;
        // `<item .../>` and `<item ...></item>` are the same element.
        let opened = matches!(event, Event::Start(_));
        match event {
            Event::Start(e) | Event::Empty(e) => match local_name(e.name().as_ref()) {
                b"metadata" => in_metadata = opened,
                b"spine" => package.toc_id = attribute(&e, b"toc"),
                b"item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, b"id"), attribute(&e, b"href")) {
                        package.manifest.insert(
                            id,
                            ManifestItem {
                                href,
                                media_type: attribute(&e, b"media-type").unwrap_or_default(),
                                properties: attribute(&e, b"properties"),
                            },
                        );
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attribute(&e, b"idref") {
                        package.spine.push(idref);
                    }
                }
                b"meta" if attribute(&e, b"name").as_deref() == Some("cover") => {
                    package.cover_id = attribute(&e, b"content");
                }
                name if opened && in_metadata && e.name().as_ref().starts_with(b"dc:") => {
                    current = Some(DcEntry {
                        name: String::from_utf8_lossy(name).into_owned(),
                        value: String::new(),
                        scheme: attribute(&e, b"scheme"),
                    });
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some(entry) = current.as_mut() {
                    entry.value.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if let Some(entry) = current.as_mut()
                    && let Some(c) = resolve_reference(e.as_ref())
                {
                    entry.value.push(c);
                }
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"metadata" {
                    in_metadata = false;
                }
                if let Some(entry) = current.take() {
                    package.metadata.push(entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    debug!(
        "Package: {} metadata entries, {} manifest items, {} spine items",
        package.metadata.len(),
        package.manifest.len(),
        package.spine.len()
    );
    Ok(package)
}

fn set_src(stack: &mut [NavPoint], e: &BytesStart<'_>) {
    if let (Some(point), Some(src)) = (stack.last_mut(), attribute(e, b"src")) {
        point.src = src;
    }
}

fn parse_ncx(content: &str) -> Result<Vec<NavPoint>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    // Bottom entry collects the top-level points.
    let mut stack = vec![NavPoint::default()];
    let mut in_label = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navPoint" => stack.push(NavPoint::default()),
                b"text" => in_label = stack.len() > 1,
                b"content" => set_src(&mut stack, &e),
                _ => {}
            },
            Event::Empty(e) if local_name(e.name().as_ref()) == b"content" => {
                set_src(&mut stack, &e);
            }
            Event::Text(e) if in_label => {
                if let Some(point) = stack.last_mut() {
                    point.label.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) if in_label => {
                if let (Some(point), Some(c)) = (stack.last_mut(), resolve_reference(e.as_ref())) {
                    point.label.push(c);
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => in_label = false,
                b"navPoint" if stack.len() > 1 => {
                    if let Some(point) = stack.pop()
                        && let Some(parent) = stack.last_mut()
                    {
                        parent.children.push(point);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(stack.swap_remove(0).children)
}

fn parent_dir(path: &str) -> String {
    path.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

fn file_stem(path: &str) -> &str {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map_or(file, |(stem, _)| stem)
}

/// Joins `href` onto `base`, folding `.` and `..` segments.
fn resolve_path(base: &str, href: &str) -> String {
    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}
