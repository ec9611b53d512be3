//! INDX tables (TAGX tag layout, IDXT entry offsets, CNCX string pool),
//! used here for the NCX table of contents.

use std::collections::HashMap;

use encoding_rs::Encoding;
use log::debug;

use super::pdb::{be_u16, be_u32};
use crate::error::{Error, Result};

const INDX_HEADER_LEN: usize = 192;
/// Bytes of CNCX address space per CNCX record.
const CNCX_RECORD_SPAN: u32 = 0x10000;
const MAX_IDXT_OFFSET: usize = u16::MAX as usize;

/// Forward variable-width integer: 7 bits per byte, high bit on the last.
pub fn decint(data: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        value = (value << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 != 0 {
            return Ok((value, i + 1));
        }
    }
    Err(Error::malformed("index-varint"))
}

pub fn encint(value: u32) -> Vec<u8> {
    let mut out = vec![(value & 0x7F) as u8 | 0x80];
    let mut rest = value >> 7;
    while rest > 0 {
        out.push((rest & 0x7F) as u8);
        rest >>= 7;
    }
    out.reverse();
    out
}

/// One TAGX row: which tag, how many values per occurrence, which bits of
/// the control byte announce it. `eof` rows advance to the next control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDef {
    pub tag: u8,
    pub per_entry: u8,
    pub mask: u8,
    pub eof: bool,
}

impl TagDef {
    const fn new(tag: u8, mask: u8) -> Self {
        Self {
            tag,
            per_entry: 1,
            mask,
            eof: false,
        }
    }

    const END: TagDef = TagDef {
        tag: 0,
        per_entry: 0,
        mask: 0,
        eof: true,
    };
}

#[derive(Debug)]
struct IndxHeader {
    idxt_offset: usize,
    count: usize,
    cncx_records: usize,
    tagx_offset: usize,
}

impl IndxHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < INDX_HEADER_LEN || &data[..4] != b"INDX" {
            return Err(Error::malformed("indx-header"));
        }
        Ok(Self {
            idxt_offset: be_u32(data, 20) as usize,
            count: be_u32(data, 24) as usize,
            cncx_records: be_u32(data, 52) as usize,
            tagx_offset: be_u32(data, 180) as usize,
        })
    }
}

fn parse_tagx(data: &[u8]) -> Result<(usize, Vec<TagDef>)> {
    if data.len() < 12 || &data[..4] != b"TAGX" {
        return Err(Error::malformed("tagx"));
    }
    let block_len = (be_u32(data, 4) as usize).clamp(12, data.len());
    let control_len = be_u32(data, 8) as usize;
    let tags = data[12..block_len]
        .chunks_exact(4)
        .map(|row| TagDef {
            tag: row[0],
            per_entry: row[1],
            mask: row[2],
            eof: row[3] == 1,
        })
        .collect();
    Ok((control_len, tags))
}

/// Decodes the tag values of one index entry.
fn tag_values(
    control_len: usize,
    tags: &[TagDef],
    data: &[u8],
) -> Result<HashMap<u8, Vec<u32>>> {
    enum Count {
        Values(u32),
        Bytes(u32),
    }

    let controls = data
        .get(..control_len)
        .ok_or_else(|| Error::malformed("index-entry"))?;
    let mut pos = control_len;
    let mut control = 0;
    let mut present = Vec::new();

    for def in tags {
        if def.eof {
            control += 1;
            continue;
        }
        let Some(&byte) = controls.get(control) else {
            break;
        };
        let bits = byte & def.mask;
        if bits == 0 {
            continue;
        }
        let count = if bits == def.mask && def.mask.count_ones() > 1 {
            let (bytes, used) = decint(&data[pos..])?;
            pos += used;
            Count::Bytes(bytes)
        } else {
            Count::Values(u32::from(bits >> def.mask.trailing_zeros()))
        };
        present.push((def, count));
    }

    let mut values = HashMap::new();
    for (def, count) in present {
        let mut found = Vec::new();
        match count {
            Count::Values(n) => {
                for _ in 0..n * u32::from(def.per_entry) {
                    let (v, used) = decint(&data[pos..])?;
                    pos += used;
                    found.push(v);
                }
            }
            Count::Bytes(n) => {
                let end = pos + n as usize;
                while pos < end {
                    let (v, used) = decint(&data[pos..])?;
                    pos += used;
                    found.push(v);
                }
            }
        }
        values.insert(def.tag, found);
    }
    Ok(values)
}

/// CNCX string pool, addressed by `record * 0x10000 + offset`.
#[derive(Debug, Default)]
pub struct Cncx {
    strings: HashMap<u32, String>,
}

impl Cncx {
    pub fn parse(records: &[Vec<u8>], encoding: &'static Encoding) -> Result<Self> {
        let mut strings = HashMap::new();
        for (n, record) in records.iter().enumerate() {
            let base = n as u32 * CNCX_RECORD_SPAN;
            let mut pos = 0;
            while pos < record.len() {
                // Records are zero-padded after the last string.
                if record[pos] == 0 {
                    break;
                }
                let (len, used) = decint(&record[pos..])?;
                let start = pos + used;
                let bytes = record
                    .get(start..start + len as usize)
                    .ok_or_else(|| Error::malformed("cncx"))?;
                strings.insert(base + pos as u32, encoding.decode(bytes).0.into_owned());
                pos = start + len as usize;
            }
        }
        Ok(Self { strings })
    }

    pub fn get(&self, offset: u32) -> Option<&str> {
        self.strings.get(&offset).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: String,
    pub tags: HashMap<u8, Vec<u32>>,
}

impl IndexEntry {
    fn first(&self, tag: u8) -> Option<u32> {
        self.tags.get(&tag).and_then(|v| v.first()).copied()
    }
}

/// Reads the index whose header is record `first`, its data records and
/// its CNCX records.
pub fn read_index(
    read_record: &mut dyn FnMut(usize) -> Result<Vec<u8>>,
    first: usize,
    encoding: &'static Encoding,
) -> Result<(Vec<IndexEntry>, Cncx)> {
    let head = read_record(first)?;
    let header = IndxHeader::parse(&head)?;
    let tagx = head
        .get(header.tagx_offset..)
        .filter(|_| header.tagx_offset >= INDX_HEADER_LEN)
        .ok_or_else(|| Error::malformed("tagx"))?;
    let (control_len, tags) = parse_tagx(tagx)?;

    let mut entries = Vec::new();
    for n in 0..header.count {
        let record = read_record(first + 1 + n)?;
        let data_header = IndxHeader::parse(&record)?;
        let idxt = data_header.idxt_offset;
        if record.get(idxt..idxt + 4) != Some(b"IDXT".as_slice()) {
            return Err(Error::malformed("idxt"));
        }
        let mut offsets = Vec::with_capacity(data_header.count + 1);
        for k in 0..data_header.count {
            let at = idxt + 4 + 2 * k;
            if at + 2 > record.len() {
                return Err(Error::malformed("idxt"));
            }
            offsets.push(usize::from(be_u16(&record, at)));
        }
        offsets.push(idxt);

        for pair in offsets.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let raw = record
                .get(start..end)
                .filter(|raw| !raw.is_empty())
                .ok_or_else(|| Error::malformed("index-entry"))?;
            let name_len = usize::from(raw[0]);
            let name = raw
                .get(1..1 + name_len)
                .ok_or_else(|| Error::malformed("index-entry"))?;
            entries.push(IndexEntry {
                name: encoding.decode(name).0.into_owned(),
                tags: tag_values(control_len, &tags, &raw[1 + name_len..])?,
            });
        }
    }

    let cncx_start = first + 1 + header.count;
    let cncx_records = (0..header.cncx_records)
        .map(|n| read_record(cncx_start + n))
        .collect::<Result<Vec<_>>>()?;
    let cncx = Cncx::parse(&cncx_records, encoding)?;

    debug!("Index at record {first}: {} entries", entries.len());
    Ok((entries, cncx))
}

const NCX_OFFSET: u8 = 1;
const NCX_LENGTH: u8 = 2;
const NCX_LABEL: u8 = 3;
const NCX_DEPTH: u8 = 4;
const NCX_PARENT: u8 = 21;
const NCX_FIRST_CHILD: u8 = 22;
const NCX_LAST_CHILD: u8 = 23;

const NCX_TAGS: [TagDef; 8] = [
    TagDef::new(NCX_OFFSET, 0x01),
    TagDef::new(NCX_LENGTH, 0x02),
    TagDef::new(NCX_LABEL, 0x04),
    TagDef::new(NCX_DEPTH, 0x08),
    TagDef::new(NCX_PARENT, 0x10),
    TagDef::new(NCX_FIRST_CHILD, 0x20),
    TagDef::new(NCX_LAST_CHILD, 0x40),
    TagDef::END,
];

/// One table-of-contents entry. Positions are byte offsets into the
/// uncompressed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcxEntry {
    pub label: String,
    pub offset: u32,
    /// `None` when the entry carries no length tag.
    pub length: Option<u32>,
    pub depth: u32,
    pub parent: Option<usize>,
    pub first_child: Option<usize>,
    pub last_child: Option<usize>,
}

pub fn read_ncx(
    read_record: &mut dyn FnMut(usize) -> Result<Vec<u8>>,
    index: usize,
    encoding: &'static Encoding,
) -> Result<Vec<NcxEntry>> {
    let (entries, cncx) = read_index(read_record, index, encoding)?;
    let link = |entry: &IndexEntry, tag| entry.first(tag).map(|v| v as usize);
    Ok(entries
        .iter()
        .map(|entry| NcxEntry {
            label: entry
                .first(NCX_LABEL)
                .and_then(|off| cncx.get(off))
                .map_or_else(|| entry.name.clone(), str::to_string),
            offset: entry.first(NCX_OFFSET).unwrap_or(0),
            length: entry.first(NCX_LENGTH),
            depth: entry.first(NCX_DEPTH).unwrap_or(0),
            parent: link(entry, NCX_PARENT),
            first_child: link(entry, NCX_FIRST_CHILD),
            last_child: link(entry, NCX_LAST_CHILD),
        })
        .collect())
}

/// Builds the NCX index records (header, data records) and the CNCX records.
pub fn build_ncx(entries: &[NcxEntry]) -> Result<(Vec<Vec<u8>>, Vec<Vec<u8>>)> {
    let mut cncx = CncxBuilder::default();
    let mut rows = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let label_offset = cncx.push(&entry.label)?;

        let length_bit = if entry.length.is_some() { 0x02 } else { 0 };
        let links = [
            (0x10u8, entry.parent),
            (0x20, entry.first_child),
            (0x40, entry.last_child),
        ];
        let control = links
            .iter()
            .filter(|(_, link)| link.is_some())
            .fold(0x0D | length_bit, |acc, (bit, _)| acc | bit);

        let mut data = vec![control, 0];
        data.extend(encint(entry.offset));
        if let Some(length) = entry.length {
            data.extend(encint(length));
        }
        data.extend(encint(label_offset));
        data.extend(encint(entry.depth));
        for link in links.iter().filter_map(|(_, link)| *link) {
            data.extend(encint(link as u32));
        }
        rows.push((format!("{i:04}"), data));
    }

    let cncx = cncx.finish();
    let indx = build_index(&NCX_TAGS, 2, &rows, cncx.len() as u32)?;
    Ok((indx, cncx))
}

/// Fills CNCX records, starting a new one before a string would cross the
/// 64 KiB record boundary.
#[derive(Default)]
struct CncxBuilder {
    done: Vec<Vec<u8>>,
    current: Vec<u8>,
}

impl CncxBuilder {
    fn push(&mut self, label: &str) -> Result<u32> {
        let mut item = encint(label.len() as u32);
        item.extend_from_slice(label.as_bytes());
        if item.len() > CNCX_RECORD_SPAN as usize - 1 {
            return Err(Error::InvalidArgument(format!(
                "table of contents label of {} bytes",
                label.len()
            )));
        }
        if self.current.len() + item.len() >= CNCX_RECORD_SPAN as usize {
            self.done.push(std::mem::take(&mut self.current));
        }
        let address = self.done.len() as u32 * CNCX_RECORD_SPAN + self.current.len() as u32;
        self.current.extend(item);
        Ok(address)
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() {
            self.done.push(self.current);
        }
        self.done
    }
}

fn build_index(
    tags: &[TagDef],
    control_len: u8,
    rows: &[(String, Vec<u8>)],
    cncx_records: u32,
) -> Result<Vec<Vec<u8>>> {
    let mut tagx = Vec::with_capacity(12 + 4 * tags.len());
    tagx.extend_from_slice(b"TAGX");
    tagx.extend_from_slice(&(12 + 4 * tags.len() as u32).to_be_bytes());
    tagx.extend_from_slice(&u32::from(control_len).to_be_bytes());
    for def in tags {
        tagx.extend_from_slice(&[def.tag, def.per_entry, def.mask, u8::from(def.eof)]);
    }

    // Every entry start and the IDXT itself must be addressable by a u16.
    let mut chunks: Vec<&[(String, Vec<u8>)]> = Vec::new();
    let (mut start, mut used) = (0, INDX_HEADER_LEN);
    for (i, (name, data)) in rows.iter().enumerate() {
        let row_len = 1 + name.len() + data.len();
        if INDX_HEADER_LEN + row_len > MAX_IDXT_OFFSET {
            return Err(Error::InvalidArgument(format!("index entry {name} too large")));
        }
        if used + row_len > MAX_IDXT_OFFSET {
            chunks.push(&rows[start..i]);
            start = i;
            used = INDX_HEADER_LEN;
        }
        used += row_len;
    }
    if start < rows.len() {
        chunks.push(&rows[start..]);
    }

    let total = rows.len() as u32;
    let mut head = indx_header(0, chunks.len() as u32, total, cncx_records, INDX_HEADER_LEN as u32);
    head.extend_from_slice(&tagx);

    let mut records = vec![head];
    for chunk in chunks {
        records.push(data_record(chunk, cncx_records));
    }
    Ok(records)
}

fn data_record(rows: &[(String, Vec<u8>)], cncx_records: u32) -> Vec<u8> {
    let mut body = Vec::new();
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    for (name, data) in rows {
        offsets.push((INDX_HEADER_LEN + body.len()) as u16);
        body.push(name.len() as u8);
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(data);
    }
    let idxt_offset = INDX_HEADER_LEN + body.len();
    offsets.push(idxt_offset as u16);

    let count = rows.len() as u32;
    let mut record = indx_header(idxt_offset as u32, count, count, cncx_records, 0);
    record.extend_from_slice(&body);
    record.extend_from_slice(b"IDXT");
    // The trailing offset marks where the last entry ends.
    for offset in &offsets {
        record.extend_from_slice(&offset.to_be_bytes());
    }
    pad4(&mut record);
    record
}

fn indx_header(
    idxt_offset: u32,
    count: u32,
    total: u32,
    cncx_records: u32,
    tagx_offset: u32,
) -> Vec<u8> {
    let mut h = vec![0u8; INDX_HEADER_LEN];
    h[..4].copy_from_slice(b"INDX");
    let mut put = |at: usize, v: u32| h[at..at + 4].copy_from_slice(&v.to_be_bytes());
    put(4, INDX_HEADER_LEN as u32);
    put(12, 2);
    put(20, idxt_offset);
    put(24, count);
    put(28, 65001);
    put(36, total);
    put(52, cncx_records);
    put(180, tagx_offset);
    h
}

fn pad4(data: &mut Vec<u8>) {
    let padding = (4 - data.len() % 4) % 4;
    data.resize(data.len() + padding, 0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::UTF_8;

    fn entry(label: &str, offset: u32, length: u32, depth: u32) -> NcxEntry {
        NcxEntry {
            label: label.to_string(),
            offset,
            length: Some(length),
            depth,
            parent: None,
            first_child: None,
            last_child: None,
        }
    }

    #[test]
    fn test_encint_decint() {
        assert_eq!(encint(0), [0x80]);
        assert_eq!(encint(127), [0xFF]);
        assert_eq!(encint(128), [0x01, 0x80]);
        assert_eq!(decint(&[0x01, 0x80, 0x55]).unwrap(), (128, 2));
        assert!(decint(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_ncx_build_then_read() {
        let mut entries = vec![
            entry("Part One", 0, 900, 0),
            entry("Chapter 1", 100, 300, 1),
            entry("Chapter 2", 400, 500, 1),
            entry("Épilogue", 900, 50, 0),
        ];
        entries[0].first_child = Some(1);
        entries[0].last_child = Some(2);
        entries[1].parent = Some(0);
        entries[2].parent = Some(0);

        entries[3].length = None;

        assert_eq!(read_back(&entries), entries);
    }

    fn read_back(entries: &[NcxEntry]) -> Vec<NcxEntry> {
        let (mut records, cncx) = build_ncx(entries).unwrap();
        records.extend(cncx);
        let mut read = |i: usize| -> Result<Vec<u8>> {
            records
                .get(i)
                .cloned()
                .ok_or_else(|| Error::malformed("record-index"))
        };
        read_ncx(&mut read, 0, UTF_8).unwrap()
    }

    #[test]
    fn test_large_ncx_spans_several_records() {
        let entries: Vec<NcxEntry> = (0..8000u32)
            .map(|i| {
                entry(
                    &format!("Chapter {i}: a title long enough to fill the string pool"),
                    i * 4000,
                    4000,
                    0,
                )
            })
            .collect();

        let (records, cncx) = build_ncx(&entries).unwrap();
        assert!(records.len() > 2, "{} index records", records.len());
        assert!(cncx.len() > 1, "{} CNCX records", cncx.len());
        assert_eq!(be_u32(&records[0], 24) as usize, records.len() - 1);

        assert_eq!(read_back(&entries), entries);
    }

    #[test]
    fn test_oversized_label_is_rejected() {
        let long = "x".repeat(70_000);
        let err = build_ncx(&[entry(&long, 0, 1, 0)]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_ncx_has_only_header() {
        let (records, cncx) = build_ncx(&[]).unwrap();
        assert_eq!(records.len(), 1);
        assert!(cncx.is_empty());
    }

    #[test]
    fn test_bad_indx_magic() {
        let mut read = |_: usize| -> Result<Vec<u8>> { Ok(vec![0u8; 200]) };
        let err = read_ncx(&mut read, 0, UTF_8).unwrap_err();
        assert_eq!(err.cause(), Some("indx-header"));
    }
}
