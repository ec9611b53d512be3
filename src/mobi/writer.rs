//! MOBI 6 writer.
//!
//! The book becomes one HTML text stream split into fixed-size records.
//! Chapters are laid out depth-first and described by an NCX index whose
//! offsets point into that stream, so the reader can cut the same windows
//! back out.

use std::io::Write;

use log::{debug, info};

use super::headers::{Compression, MOBI_OFFSET, NULL_INDEX, encode_exth, locale_code};
use super::index::{NcxEntry, build_ncx};
use super::{MakeConfig, TextCompression, palmdoc, pdb};
use crate::book::{Book, Chapter, attributes};
use crate::error::{Error, Result};
use crate::util;

const HEADER_LENGTH: u32 = 0xE8;
const MOBI_VERSION: u32 = 6;
const TEXT_PREFIX: &[u8] = b"<html><head><guide></guide></head><body>";
const TEXT_SUFFIX: &[u8] = b"</body></html>";

/// Everything that goes into the record list, independent of the [`Book`].
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub title: String,
    pub text: Vec<u8>,
    pub record_size: usize,
    pub compression: Compression,
    pub exth: Vec<(u32, Vec<u8>)>,
    pub ncx: Vec<NcxEntry>,
    pub image: Option<Vec<u8>>,
    pub locale: u32,
}

impl Layout {
    /// Builds every record of the database, record 0 first.
    pub fn records(&self) -> Result<Vec<Vec<u8>>> {
        let mut records = vec![Vec::new()];
        let text_records = self.text_records();
        let text_count = u16::try_from(text_records.len())
            .map_err(|_| Error::InvalidArgument("text too long for one database".to_string()))?;
        records.extend(text_records);

        let first_non_book = records.len() as u32;
        let first_image = match &self.image {
            Some(image) => {
                records.push(image.clone());
                first_non_book
            }
            None => NULL_INDEX,
        };

        let ncx_index = if self.ncx.is_empty() {
            NULL_INDEX
        } else {
            let index = records.len() as u32;
            let (indx, cncx) = build_ncx(&self.ncx)?;
            records.extend(indx);
            records.extend(cncx);
            index
        };

        let flis = records.len() as u32;
        records.push(flis_record());
        records.push(fcis_record(self.text.len() as u32));
        records.push(b"\xe9\x8e\r\n".to_vec());

        records[0] = self.record0(Record0 {
            text_count,
            first_non_book,
            first_image,
            ncx_index,
            flis,
        })?;
        Ok(records)
    }

    /// Splits the text into records. Each record ends with the bytes that
    /// complete a character cut at the boundary, then their count.
    fn text_records(&self) -> Vec<Vec<u8>> {
        let mut records = Vec::with_capacity(self.text.len() / self.record_size + 1);
        let mut start = 0;
        while start < self.text.len() {
            let end = (start + self.record_size).min(self.text.len());
            let chunk = &self.text[start..end];
            let mut record = match self.compression {
                Compression::PalmDoc => palmdoc::compress(chunk),
                Compression::None => chunk.to_vec(),
            };
            let overlap = self.text[end..]
                .iter()
                .take(3)
                .take_while(|&&b| b & 0xC0 == 0x80)
                .count();
            record.extend_from_slice(&self.text[end..end + overlap]);
            record.push(overlap as u8);
            records.push(record);
            start = end;
        }
        records
    }

    fn record0(&self, at: Record0) -> Result<Vec<u8>> {
        let exth = encode_exth(&self.exth);
        let name_offset = MOBI_OFFSET + HEADER_LENGTH as usize + exth.len();
        let name = self.title.as_bytes();
        let record_size = u16::try_from(self.record_size)
            .map_err(|_| Error::InvalidArgument(format!("record size {}", self.record_size)))?;

        let mut r = vec![0u8; MOBI_OFFSET + HEADER_LENGTH as usize];
        let compression: u16 = match self.compression {
            Compression::None => 1,
            Compression::PalmDoc => 2,
        };
        r[0..2].copy_from_slice(&compression.to_be_bytes());
        put(&mut r, 4, self.text.len() as u32);
        r[8..10].copy_from_slice(&at.text_count.to_be_bytes());
        r[10..12].copy_from_slice(&record_size.to_be_bytes());

        r[16..20].copy_from_slice(b"MOBI");
        put(&mut r, 20, HEADER_LENGTH);
        put(&mut r, 24, 2);
        put(&mut r, 28, 65001);
        put(&mut r, 32, unique_id());
        put(&mut r, 36, MOBI_VERSION);
        for offset in (40..80).step_by(4) {
            put(&mut r, offset, NULL_INDEX);
        }
        put(&mut r, 80, at.first_non_book);
        put(&mut r, 84, name_offset as u32);
        put(&mut r, 88, name.len() as u32);
        put(&mut r, 92, self.locale);
        put(&mut r, 104, MOBI_VERSION);
        put(&mut r, 108, at.first_image);
        put(&mut r, 128, 0x50);
        put(&mut r, 164, NULL_INDEX);
        // DRM offset, count, size, flags
        put(&mut r, 168, NULL_INDEX);
        r[192..194].copy_from_slice(&1u16.to_be_bytes());
        r[194..196].copy_from_slice(&at.text_count.to_be_bytes());
        put(&mut r, 196, 1);
        put(&mut r, 200, at.flis + 1);
        put(&mut r, 204, 1);
        put(&mut r, 208, at.flis);
        put(&mut r, 212, 1);
        put(&mut r, 224, NULL_INDEX);
        r[232..240].fill(0xFF);
        put(&mut r, 240, 1);
        put(&mut r, 244, at.ncx_index);

        r.extend_from_slice(&exth);
        r.extend_from_slice(name);
        r.extend_from_slice(&[0, 0]);
        r.resize(r.len().next_multiple_of(4), 0);
        Ok(r)
    }
}

/// Record numbers that record 0 refers to.
struct Record0 {
    text_count: u16,
    first_non_book: u32,
    first_image: u32,
    ncx_index: u32,
    flis: u32,
}

fn put(record: &mut [u8], at: usize, value: u32) {
    record[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn flis_record() -> Vec<u8> {
    b"FLIS\0\0\0\x08\0\x41\0\0\0\0\0\0\xff\xff\xff\xff\0\x01\0\x03\0\0\0\x03\0\0\0\x01\xff\xff\xff\xff"
        .to_vec()
}

fn fcis_record(text_length: u32) -> Vec<u8> {
    let mut fcis = b"FCIS\0\0\0\x14\0\0\0\x10\0\0\0\x01\0\0\0\0".to_vec();
    fcis.extend_from_slice(&text_length.to_be_bytes());
    fcis.extend_from_slice(b"\0\0\0\0\0\0\0\x20\0\0\0\x08\0\x01\0\x01\0\0\0\0");
    fcis
}

fn unique_id() -> u32 {
    util::time_now_secs()
        .wrapping_mul(1_103_515_245)
        .wrapping_add(12345)
}

/// Per-call encode state.
struct Encoder<'a> {
    config: &'a MakeConfig,
    text: Vec<u8>,
    ncx: Vec<NcxEntry>,
}

pub(crate) fn encode<W: Write + ?Sized>(book: &Book, out: &mut W, config: &MakeConfig) -> Result<()> {
    let mut encoder = Encoder {
        config,
        text: TEXT_PREFIX.to_vec(),
        ncx: Vec::new(),
    };
    info!("Laying out {} chapters", book.count());
    if let Some(text) = &book.text {
        encoder.push_html(&text.to_html()?);
    }
    for chapter in &book.children {
        encoder.lay_out(chapter, 0, None)?;
    }
    encoder.text.extend_from_slice(TEXT_SUFFIX);

    let layout = encoder.finish(book)?;
    let records = layout.records()?;
    debug!(
        "{} bytes of text in {} records of {} bytes",
        layout.text.len(),
        records.len(),
        layout.record_size
    );
    pdb::write(out, &layout.title, &records)
}

impl Encoder<'_> {
    /// Appends `chapter` and its descendants; returns its NCX slot.
    fn lay_out(&mut self, chapter: &Chapter, depth: u32, parent: Option<usize>) -> Result<usize> {
        let slot = self.ncx.len();
        let offset = self.position()?;
        self.ncx.push(NcxEntry {
            label: chapter.title(),
            offset,
            length: None,
            depth,
            parent,
            first_child: None,
            last_child: None,
        });
        if let Some(text) = &chapter.text {
            self.push_html(&text.to_html()?);
        }

        let (mut first, mut last) = (None, None);
        for child in &chapter.children {
            let child = self.lay_out(child, depth + 1, Some(slot))?;
            first.get_or_insert(child);
            last = Some(child);
        }

        let end = self.position()?;
        let entry = &mut self.ncx[slot];
        entry.length = Some(end - offset);
        entry.first_child = first;
        entry.last_child = last;
        Ok(slot)
    }

    fn push_html(&mut self, html: &str) {
        self.text.extend_from_slice(util::html_body(html).as_bytes());
    }

    fn position(&self) -> Result<u32> {
        u32::try_from(self.text.len())
            .map_err(|_| Error::InvalidArgument("text exceeds 4 GiB".to_string()))
    }

    fn finish(self, book: &Book) -> Result<Layout> {
        let title = match book.title() {
            t if t.trim().is_empty() => "Unknown".to_string(),
            t => t,
        };
        let language = book.language().filter(|l| !l.is_root());
        let cover = match book.cover() {
            Some(cover) if self.config.include_cover => Some(cover.read_all()?),
            _ => None,
        };

        let mut exth = metadata_records(book, &title)?;
        if cover.is_some() {
            exth.push((201, 0u32.to_be_bytes().to_vec()));
        }

        Ok(Layout {
            title,
            text: self.text,
            record_size: self.config.record_size as usize,
            compression: match self.config.compression {
                TextCompression::PalmDoc => Compression::PalmDoc,
                TextCompression::None => Compression::None,
            },
            exth,
            ncx: self.ncx,
            image: cover,
            locale: language.as_ref().map_or(0, |l| locale_code(l.language())),
        })
    }
}

fn metadata_records(book: &Book, title: &str) -> Result<Vec<(u32, Vec<u8>)>> {
    let mut exth: Vec<(u32, Vec<u8>)> = book
        .authors()
        .into_iter()
        .map(|a| (100, a.into_bytes()))
        .collect();

    let strings = [
        (101, book.get_string(attributes::PUBLISHER)),
        (104, book.get_string(attributes::ISBN)),
        (105, book.get_string(attributes::KEYWORDS)),
        (109, book.get_string(attributes::RIGHTS)),
        (108, book.extensions.get_as::<String>("contributor")),
        (112, book.extensions.get_as::<String>("source")),
        (113, book.extensions.get_as::<String>("asin")),
    ];
    for (kind, value) in strings {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            exth.push((kind, v.into_bytes()));
        }
    }
    if let Some(intro) = book.intro() {
        let intro = intro.text()?;
        if !intro.trim().is_empty() {
            exth.push((103, intro.into_bytes()));
        }
    }
    if let Some(date) = book.pubdate() {
        exth.push((106, util::format_date(&date).into_bytes()));
    }
    exth.push((503, title.as_bytes().to_vec()));
    if let Some(language) = book.language().filter(|l| !l.is_root()) {
        exth.push((524, language.as_str().as_bytes().to_vec()));
    }
    Ok(exth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Flob, Text};
    use crate::mobi::headers::{Exth, MobiHeader};
    use crate::mobi::pdb::RecordTable;
    use crate::io::MemorySource;
    use encoding_rs::UTF_8;

    fn layout(text: &str, record_size: usize) -> Layout {
        Layout {
            title: "T".to_string(),
            text: text.as_bytes().to_vec(),
            record_size,
            compression: Compression::None,
            exth: Vec::new(),
            ncx: Vec::new(),
            image: None,
            locale: 0,
        }
    }

    #[test]
    fn test_overlap_trailer_completes_split_character() {
        // "é" is two bytes; the first record ends after its lead byte.
        let records = layout("abcé", 4).text_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], b"abc\xC3\xA9\x01");
        assert_eq!(records[1], b"\xA9\x00");
    }

    #[test]
    fn test_record0_parses_back() {
        let mut l = layout("hello", 4096);
        l.exth = vec![(503, b"T".to_vec())];
        l.locale = locale_code("fr");
        let records = l.records().unwrap();
        let header = MobiHeader::parse(&records[0]).unwrap();
        assert_eq!(header.version, MOBI_VERSION);
        assert_eq!(header.text_record_count, 1);
        assert_eq!(header.text_length, 5);
        assert_eq!(header.full_name.as_deref(), Some("T"));
        assert_eq!(header.extra_data_flags, 1);
        assert_eq!(header.ncx_index, NULL_INDEX);
        assert_eq!(header.first_image_index, NULL_INDEX);
        let exth = Exth::parse(&records[0][header.exth_offset()..], UTF_8).unwrap();
        assert_eq!(exth.updated_title.as_deref(), Some("T"));
        // record 0, one text record, FLIS, FCIS, EOF
        assert_eq!(records.len(), 5);
    }

    #[test]
    fn test_encode_lays_out_nested_chapters() {
        let mut book = Book::new();
        book.set_title("Nested").unwrap();
        let mut part = Chapter::new("Part");
        part.text = Some(Text::inline("p", Text::HTML, "<h1>Part</h1>"));
        part.push(Chapter::new("One").with_text(Text::inline("1", Text::PLAIN, "one")));
        book.push(part);
        book.push(Chapter::new("Two").with_text(Text::inline("2", Text::HTML, "<p>2</p>")));
        book.set(attributes::COVER, Flob::bytes("c.png", b"\x89PNG\r\n\x1a\n".to_vec()))
            .unwrap();

        let mut out = Vec::new();
        encode(&book, &mut out, &MakeConfig::default()).unwrap();
        let source = MemorySource::new(out);
        let table = RecordTable::read(&source).unwrap();
        assert_eq!(table.name, "Nested");
        let record0 = table.read_record(&source, 0).unwrap();
        let header = MobiHeader::parse(&record0).unwrap();
        assert_ne!(header.ncx_index, NULL_INDEX);
        let image = table
            .read_record(&source, header.first_image_index as usize)
            .unwrap();
        assert!(image.starts_with(b"\x89PNG"));
    }

    #[test]
    fn test_cover_left_out_when_disabled() {
        let mut book = Book::new();
        book.set(attributes::COVER, Flob::bytes("c.png", b"\x89PNG".to_vec()))
            .unwrap();
        let config = MakeConfig {
            include_cover: false,
            ..MakeConfig::default()
        };
        let mut out = Vec::new();
        encode(&book, &mut out, &config).unwrap();
        let source = MemorySource::new(out);
        let table = RecordTable::read(&source).unwrap();
        let header = MobiHeader::parse(&table.read_record(&source, 0).unwrap()).unwrap();
        assert_eq!(header.first_image_index, NULL_INDEX);
    }
}
