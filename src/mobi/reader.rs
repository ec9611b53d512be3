//! MOBI decoding: record table, record 0, EXTH, NCX, then the chapter tree.
//!
//! Nothing is decompressed here. Chapter texts are windows registered on a
//! [`TextBlocks`] archive and read when a caller asks for them.

use std::sync::Arc;

use encoding_rs::Encoding;
use log::{debug, info};

use super::ParseConfig;
use super::blocks::{TextBlocks, Window};
use super::headers::{Exth, MobiHeader, NULL_INDEX, language_tag};
use super::index::{NcxEntry, read_ncx};
use super::pdb::RecordTable;
use crate::book::{Book, Chapter, attributes};
use crate::content::{Flob, Text, VirtualArchive};
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::util;
use crate::variant::Locale;

/// Per-call decode state.
struct Decoder<'a> {
    source: Arc<dyn ByteSource>,
    config: &'a ParseConfig,
    table: RecordTable,
    header: MobiHeader,
    encoding: &'static Encoding,
}

/// A chapter whose text window is known but not yet bound to the archive.
struct Planned {
    title: String,
    window: Option<(String, Window)>,
    parent: Option<usize>,
}

pub(crate) fn decode(source: Arc<dyn ByteSource>, config: &ParseConfig) -> Result<Book> {
    let table = RecordTable::read(source.as_ref())?;
    if table.is_empty() {
        return Err(Error::malformed("record0"));
    }
    let record0 = table.read_record(source.as_ref(), 0)?;

    info!("Reading MOBI header");
    let header = MobiHeader::parse(&record0)?;
    let encoding = match &config.encoding {
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| Error::UnsupportedEncoding(label.clone()))?,
        None => header.encoding()?,
    };

    let exth = if header.has_exth() {
        info!("Reading EXTH metadata");
        let block = record0
            .get(header.exth_offset()..)
            .ok_or_else(|| Error::malformed("exth-header"))?;
        Exth::parse(block, encoding)?
    } else {
        Exth::default()
    };

    let decoder = Decoder {
        source,
        config,
        table,
        header,
        encoding,
    };
    decoder.run(exth)
}

impl Decoder<'_> {
    fn run(self, exth: Exth) -> Result<Book> {
        let mut blocks = self.text_blocks()?;
        let plan = self.plan_chapters(blocks.text_length(), &exth)?;
        for chapter in &plan {
            if let Some((name, window)) = &chapter.window {
                blocks.add_window(name.clone(), *window)?;
            }
        }
        let archive: Arc<dyn VirtualArchive> = Arc::new(blocks);

        let mut book = Book::new();
        self.fill_metadata(book.root_mut(), &exth)?;
        for chapter in self.build_tree(plan, &archive)? {
            book.push(chapter);
        }
        self.fill_extensions(&mut book, &exth)?;
        info!("Decoded {} chapters", book.count());
        Ok(book)
    }

    fn text_blocks(&self) -> Result<TextBlocks> {
        let count = usize::from(self.header.text_record_count);
        if count >= self.table.len() {
            return Err(Error::malformed("text-record-count"));
        }
        info!("Indexing {count} text records");
        let records = self.table.entries()[1..=count].to_vec();
        TextBlocks::new(
            self.source.clone(),
            records,
            self.header.compression,
            self.header.extra_data_flags,
            u64::from(self.header.record_size),
            u64::from(self.header.text_length),
        )
    }

    fn ncx_entries(&self) -> Result<Vec<NcxEntry>> {
        let index = self.header.ncx_index;
        if index == NULL_INDEX {
            return Ok(Vec::new());
        }
        info!("Reading NCX index at record {index}");
        let source = self.source.as_ref();
        let mut read = |i: usize| self.table.read_record(source, i);
        read_ncx(&mut read, index as usize, self.encoding)
    }

    fn plan_chapters(&self, text_length: u64, exth: &Exth) -> Result<Vec<Planned>> {
        let entries = self.ncx_entries()?;
        if entries.is_empty() {
            debug!("No NCX, using one chapter for the whole text");
            let window = Window {
                position: 0,
                length: text_length,
            };
            return Ok(vec![Planned {
                title: self.title(exth),
                window: (text_length > 0).then(|| ("part0000.html".to_string(), window)),
                parent: None,
            }]);
        }

        let mut plan = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let start = u64::from(entry.offset);
            let span_end = match entry.length {
                Some(length) => start + u64::from(length),
                None => entries
                    .get(i + 1)
                    .map_or(text_length, |next| u64::from(next.offset)),
            };
            let first_child = entry
                .first_child
                .or_else(|| (i + 1..entries.len()).find(|&j| entries[j].parent == Some(i)));
            let own_end = match first_child.and_then(|c| entries.get(c)) {
                Some(child) => span_end.min(u64::from(child.offset)),
                None => span_end,
            };
            if own_end < start {
                return Err(Error::malformed("ncx-order"));
            }
            if let Some(parent) = entry.parent
                && parent >= i
            {
                return Err(Error::malformed("ncx-parent"));
            }

            let window = Window {
                position: start,
                length: own_end - start,
            };
            plan.push(Planned {
                title: entry.label.clone(),
                window: (window.length > 0).then(|| (format!("part{i:04}.html"), window)),
                parent: if self.config.flatten { None } else { entry.parent },
            });
        }
        debug!("NCX describes {} chapters", plan.len());
        Ok(plan)
    }

    fn build_tree(
        &self,
        plan: Vec<Planned>,
        archive: &Arc<dyn VirtualArchive>,
    ) -> Result<Vec<Chapter>> {
        let mut nodes = Vec::with_capacity(plan.len());
        let mut children = vec![Vec::new(); plan.len()];
        let mut roots = Vec::new();

        for (i, planned) in plan.into_iter().enumerate() {
            let mut chapter = Chapter::new(&planned.title);
            if let Some((name, _)) = &planned.window {
                let flob = Flob::archive_entry(archive.clone(), name)?;
                chapter.text = Some(Text::with_encoding(
                    name.clone(),
                    Text::HTML,
                    flob,
                    self.encoding,
                ));
            }
            match planned.parent {
                Some(p) => children[p].push(i),
                None => roots.push(i),
            }
            nodes.push(Some(chapter));
        }

        fn assemble(
            i: usize,
            nodes: &mut [Option<Chapter>],
            children: &[Vec<usize>],
        ) -> Chapter {
            let mut chapter = nodes[i].take().unwrap_or_default();
            for &child in &children[i] {
                chapter.push(assemble(child, nodes, children));
            }
            chapter
        }

        Ok(roots
            .into_iter()
            .map(|i| assemble(i, &mut nodes, &children))
            .collect())
    }

    fn title(&self, exth: &Exth) -> String {
        [exth.updated_title.as_deref(), self.header.full_name.as_deref()]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty())
            .unwrap_or(self.table.name.as_str())
            .to_string()
    }

    fn fill_metadata(&self, root: &mut Chapter, exth: &Exth) -> Result<()> {
        root.set_title(&self.title(exth))?;
        if !exth.authors.is_empty() {
            root.set_authors(&exth.authors)?;
        }
        let strings = [
            (attributes::PUBLISHER, &exth.publisher),
            (attributes::ISBN, &exth.isbn),
            (attributes::RIGHTS, &exth.rights),
        ];
        for (name, value) in strings {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                root.set(name, v)?;
            }
        }
        if !exth.subjects.is_empty() {
            root.set(attributes::KEYWORDS, exth.subjects.join(";"))?;
        }
        if let Some(intro) = exth.description.as_deref().filter(|d| !d.is_empty()) {
            let kind = if intro.contains('<') { Text::HTML } else { Text::PLAIN };
            root.set(attributes::INTRO, Text::inline("intro", kind, intro))?;
        }
        if let Some(published) = &exth.published {
            match util::parse_date(published) {
                Some(date) => root.set(attributes::PUBDATE, date)?,
                None => debug!("Ignoring unparsable publishing date '{published}'"),
            }
        }

        let language = exth
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .or_else(|| language_tag(self.header.locale));
        if let Some(language) = language {
            root.set(attributes::LANGUAGE, Locale::new(language))?;
        }

        if let Some(offset) = exth.cover_offset {
            root.set(attributes::COVER, self.image(offset, "cover")?)?;
        }
        Ok(())
    }

    fn fill_extensions(&self, book: &mut Book, exth: &Exth) -> Result<()> {
        let ext = &mut book.extensions;
        ext.set("mobi.version", i64::from(self.header.version))?;
        let strings = [
            ("contributor", &exth.contributor),
            ("source", &exth.source),
            ("asin", &exth.asin),
        ];
        for (name, value) in strings {
            if let Some(v) = value {
                ext.set(name, v.as_str())?;
            }
        }
        if let Some(offset) = exth.thumbnail_offset {
            ext.set("thumbnail", self.image(offset, "thumbnail")?)?;
        }
        Ok(())
    }

    /// Image record `offset` past the first image, as a lazy block payload.
    fn image(&self, offset: u32, name: &str) -> Result<Flob> {
        let first = self.header.first_image_index;
        if first == NULL_INDEX {
            return Err(Error::malformed("first-image"));
        }
        let index = first
            .checked_add(offset)
            .ok_or_else(|| Error::malformed("image-index"))?;
        let entry = self
            .table
            .entry(index as usize)
            .map_err(|_| Error::malformed("image-index"))?;
        debug!("{name} is record {index} ({} bytes)", entry.size);
        Ok(Flob::block(self.source.clone(), entry.offset, entry.size)?.with_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::mobi::test_helpers::{ArchiveSpec, assembled_archive, build_archive};

    fn decode_bytes(bytes: Vec<u8>, config: &ParseConfig) -> Result<Book> {
        decode(Arc::new(MemorySource::new(bytes)), config)
    }

    #[test]
    fn test_chapters_from_ncx() {
        let chapters = ["<p>First.</p>", "<p>Second chapter.</p>", "<p>Third</p>"];
        let layout = ArchiveSpec::with_chapters(&chapters, 1024);
        let book = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap();

        assert_eq!(book.len(), 3);
        for (chapter, expected) in book.children.iter().zip(chapters) {
            assert_eq!(chapter.text.as_ref().unwrap().text().unwrap(), expected);
        }
        assert_eq!(book.get(1).unwrap().title(), "Chapter 2");
    }

    #[test]
    fn test_assembled_archive_lengths() {
        let book = decode_bytes(assembled_archive(), &ParseConfig::default()).unwrap();
        assert_eq!(book.title(), "Assembled");
        let titles: Vec<String> = book.children.iter().map(|c| c.title()).collect();
        assert_eq!(titles, ["One", "Two", "Blank"]);

        let text = |i: usize| {
            book.get(i)
                .unwrap()
                .text
                .as_ref()
                .map(|t| t.text().unwrap())
        };
        assert_eq!(text(0).as_deref(), Some("<p>One</p>"));
        // no length tag: runs to the next entry, here the end of the text
        assert_eq!(text(1).as_deref(), Some("<p>Two</p>"));
        assert_eq!(text(2), None);
    }

    #[test]
    fn test_chapter_spanning_three_blocks() {
        let long = "x".repeat(1024 * 2 + 100);
        let chapters = [
            "<p>intro</p>".to_string(),
            format!("<p>{long}</p>"),
            "<p>end</p>".to_string(),
        ];
        let refs: Vec<&str> = chapters.iter().map(String::as_str).collect();
        let layout = ArchiveSpec::with_chapters(&refs, 1024);
        let book = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap();

        let text = book.get(1).unwrap().text.as_ref().unwrap().text().unwrap();
        assert_eq!(text, chapters[1]);
        assert_eq!(book.get(2).unwrap().text.as_ref().unwrap().text().unwrap(), "<p>end</p>");
    }

    #[test]
    fn test_without_ncx_one_chapter() {
        let mut layout = ArchiveSpec::with_chapters(&["<p>a</p>", "<p>b</p>"], 1024);
        layout.ncx = false;
        let book = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(
            book.get(0).unwrap().text.as_ref().unwrap().text().unwrap(),
            "<p>a</p><p>b</p>"
        );
        assert_eq!(book.get(0).unwrap().title(), book.title());
    }

    #[test]
    fn test_nested_ncx_and_flatten() {
        let chapters = ["<h1>Part</h1>", "<p>one</p>", "<p>two</p>"];
        let mut layout = ArchiveSpec::with_chapters(&chapters, 1024);
        layout.parents = vec![None, Some(0), Some(0)];
        let bytes = build_archive(&layout);

        let book = decode_bytes(bytes.clone(), &ParseConfig::default()).unwrap();
        assert_eq!(book.len(), 1);
        let part = book.get(0).unwrap();
        assert_eq!(part.text.as_ref().unwrap().text().unwrap(), "<h1>Part</h1>");
        assert_eq!(part.len(), 2);
        assert_eq!(part.get(1).unwrap().text.as_ref().unwrap().text().unwrap(), "<p>two</p>");

        let flat = ParseConfig {
            flatten: true,
            ..ParseConfig::default()
        };
        let book = decode_bytes(bytes, &flat).unwrap();
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn test_metadata_and_unknown_exth() {
        let mut layout = ArchiveSpec::with_chapters(&["<p>a</p>"], 1024);
        layout.exth = vec![
            (100, b"Ann".to_vec()),
            (4242, b"mystery".to_vec()),
            (100, b"Bo".to_vec()),
            (101, b"Press".to_vec()),
            (106, b"2020-05-01".to_vec()),
            (524, b"fr".to_vec()),
            (503, b"Real Title".to_vec()),
        ];
        let book = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap();
        assert_eq!(book.title(), "Real Title");
        assert_eq!(book.authors(), ["Ann", "Bo"]);
        assert_eq!(book.get_string(attributes::PUBLISHER).as_deref(), Some("Press"));
        assert_eq!(book.language().unwrap().as_str(), "fr");
        assert!(book.pubdate().is_some());
    }

    #[test]
    fn test_cover_is_lazy_block() {
        let mut layout = ArchiveSpec::with_chapters(&["<p>a</p>"], 1024);
        layout.image = Some(b"\x89PNG\r\n\x1a\nfakeimage".to_vec());
        layout.exth = vec![(201, 0u32.to_be_bytes().to_vec())];
        let book = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap();
        let cover = book.cover().unwrap();
        assert!(cover.span().is_some());
        assert_eq!(cover.read_all().unwrap(), layout.image.unwrap());
        assert_eq!(cover.mime(), "image/png");
    }

    #[test]
    fn test_record_size_must_be_power_of_two() {
        let mut layout = ArchiveSpec::with_chapters(&["<p>a</p>"], 1024);
        layout.declared_record_size = Some(1000);
        let err = decode_bytes(build_archive(&layout), &ParseConfig::default()).unwrap_err();
        assert_eq!(err.cause(), Some("record-size"));
    }

    #[test]
    fn test_encoding_override() {
        let layout = ArchiveSpec::with_chapters(&["<p>a</p>"], 1024);
        let config = ParseConfig {
            encoding: Some("no-such-charset".to_string()),
            ..ParseConfig::default()
        };
        let err = decode_bytes(build_archive(&layout), &config).unwrap_err();
        assert!(matches!(err, Error::UnsupportedEncoding(_)));
    }
}
