//! Synthetic MOBI files for reader tests.

use super::headers::Compression;
use super::index::NcxEntry;
use super::pdb;
use super::writer::Layout;

pub struct ArchiveSpec {
    pub chapters: Vec<String>,
    /// Parent of each chapter, in NCX order.
    pub parents: Vec<Option<usize>>,
    pub record_size: usize,
    /// Written to record 0 instead of `record_size`.
    pub declared_record_size: Option<u16>,
    pub ncx: bool,
    pub exth: Vec<(u32, Vec<u8>)>,
    pub image: Option<Vec<u8>>,
}

impl ArchiveSpec {
    pub fn with_chapters(chapters: &[&str], record_size: usize) -> Self {
        Self {
            chapters: chapters.iter().map(|c| c.to_string()).collect(),
            parents: vec![None; chapters.len()],
            record_size,
            declared_record_size: None,
            ncx: true,
            exth: Vec::new(),
            image: None,
        }
    }

    fn depth(&self, mut i: usize) -> u32 {
        let mut depth = 0;
        while let Some(p) = self.parents[i] {
            depth += 1;
            i = p;
        }
        depth
    }

    fn ncx_entries(&self) -> Vec<NcxEntry> {
        let offsets: Vec<u32> = self
            .chapters
            .iter()
            .scan(0u32, |pos, c| {
                let start = *pos;
                *pos += c.len() as u32;
                Some(start)
            })
            .collect();
        let total: u32 = self.chapters.iter().map(|c| c.len() as u32).sum();
        let depths: Vec<u32> = (0..self.chapters.len()).map(|i| self.depth(i)).collect();

        (0..self.chapters.len())
            .map(|i| {
                let end = (i + 1..self.chapters.len())
                    .find(|&j| depths[j] <= depths[i])
                    .map_or(total, |j| offsets[j]);
                let children: Vec<usize> = (i + 1..self.chapters.len())
                    .filter(|&j| self.parents[j] == Some(i))
                    .collect();
                NcxEntry {
                    label: format!("Chapter {}", i + 1),
                    offset: offsets[i],
                    length: Some(end - offsets[i]),
                    depth: depths[i],
                    parent: self.parents[i],
                    first_child: children.first().copied(),
                    last_child: children.last().copied(),
                }
            })
            .collect()
    }
}

pub fn build_archive(archive: &ArchiveSpec) -> Vec<u8> {
    let layout = Layout {
        title: "Synthetic".to_string(),
        text: archive.chapters.concat().into_bytes(),
        record_size: archive.record_size,
        compression: Compression::PalmDoc,
        exth: archive.exth.clone(),
        ncx: if archive.ncx { archive.ncx_entries() } else { Vec::new() },
        image: archive.image.clone(),
        locale: 0,
    };
    let mut records = layout.records().unwrap();
    if let Some(size) = archive.declared_record_size {
        records[0][10..12].copy_from_slice(&size.to_be_bytes());
    }
    let mut out = Vec::new();
    pdb::write(&mut out, &layout.title, &records).unwrap();
    out
}

fn be32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

fn indx(idxt_offset: u32, count: u32, cncx_records: u32, tagx_offset: u32) -> Vec<u8> {
    let mut h = vec![0u8; 192];
    h[..4].copy_from_slice(b"INDX");
    be32(&mut h, 4, 192);
    be32(&mut h, 20, idxt_offset);
    be32(&mut h, 24, count);
    be32(&mut h, 52, cncx_records);
    be32(&mut h, 180, tagx_offset);
    h
}

/// A MOBI file laid out byte by byte, without going through the writer.
///
/// Uncompressed text `<p>One</p><p>Two</p>` in one record, and an NCX with a
/// one-byte control field: "One" with an explicit length, "Two" with no
/// length tag, "Blank" with an explicit length of zero at the end of the text.
pub fn assembled_archive() -> Vec<u8> {
    let text = b"<p>One</p><p>Two</p>";
    let name = b"Assembled";

    let mut record0 = vec![0u8; 16 + 0xE8];
    record0[0..2].copy_from_slice(&1u16.to_be_bytes());
    be32(&mut record0, 4, text.len() as u32);
    record0[8..10].copy_from_slice(&1u16.to_be_bytes());
    record0[10..12].copy_from_slice(&1024u16.to_be_bytes());
    record0[16..20].copy_from_slice(b"MOBI");
    be32(&mut record0, 20, 0xE8);
    be32(&mut record0, 24, 2);
    be32(&mut record0, 28, 65001);
    be32(&mut record0, 36, 6);
    let record0_len = record0.len() as u32;
    be32(&mut record0, 0x54, record0_len);
    be32(&mut record0, 0x58, name.len() as u32);
    be32(&mut record0, 0x6C, u32::MAX);
    be32(&mut record0, 0xF4, 2);
    record0.extend_from_slice(name);
    record0.extend_from_slice(&[0, 0, 0]);

    let mut head = indx(0, 1, 1, 192);
    head.extend_from_slice(b"TAGX");
    head.extend_from_slice(&32u32.to_be_bytes());
    head.extend_from_slice(&1u32.to_be_bytes());
    head.extend_from_slice(&[1, 1, 0x01, 0, 2, 1, 0x02, 0, 3, 1, 0x04, 0, 4, 1, 0x08, 0, 0, 0, 0, 1]);

    // name length, name, control byte, then encints
    let rows: [&[u8]; 3] = [
        &[1, b'0', 0x0F, 0x80, 0x8A, 0x80, 0x80],
        &[1, b'1', 0x0D, 0x8A, 0x84, 0x80],
        &[1, b'2', 0x0F, 0x94, 0x80, 0x88, 0x80],
    ];
    let mut body = Vec::new();
    let mut offsets = Vec::new();
    for row in rows {
        offsets.push(192 + body.len() as u16);
        body.extend_from_slice(row);
    }
    let idxt = 192 + body.len() as u32;
    let mut data = indx(idxt, rows.len() as u32, 1, 0);
    data.extend_from_slice(&body);
    data.extend_from_slice(b"IDXT");
    for offset in offsets {
        data.extend_from_slice(&offset.to_be_bytes());
    }

    let cncx = b"\x83One\x83Two\x85Blank\0\0\0".to_vec();

    let records = [record0, text.to_vec(), head, data, cncx];
    let mut out = vec![0u8; 78];
    out[..name.len()].copy_from_slice(name);
    out[60..68].copy_from_slice(b"BOOKMOBI");
    out[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());
    let mut offset = 78 + 8 * records.len() as u32 + 2;
    for (i, record) in records.iter().enumerate() {
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, i as u8]);
        offset += record.len() as u32;
    }
    out.extend_from_slice(&[0, 0]);
    for record in &records {
        out.extend_from_slice(record);
    }
    out
}
