//! Palm database container: the 78-byte prologue and the record table.

use std::io::Write;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::io::ByteSource;

pub const HEADER_LEN: usize = 78;
pub const ENTRY_LEN: usize = 8;

const ACCEPTED_TYPES: [&[u8; 8]; 2] = [b"BOOKMOBI", b"TEXtREAd"];

/// One row of the record table. `size` is derived from the next offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordEntry {
    pub offset: u64,
    pub size: u64,
    pub attributes: u8,
    pub uid: u32,
}

#[derive(Debug, Clone)]
pub struct RecordTable {
    pub name: String,
    pub type_creator: [u8; 8],
    pub created: u32,
    pub modified: u32,
    entries: Vec<RecordEntry>,
}

impl RecordTable {
    /// Reads the prologue and the complete record table.
    pub fn read(source: &dyn ByteSource) -> Result<Self> {
        info!("Reading PDB header");
        let file_len = source.len();
        if file_len < HEADER_LEN as u64 {
            return Err(Error::malformed("pdb-header"));
        }
        let head = source.read_at(0, HEADER_LEN)?;

        let mut type_creator = [0u8; 8];
        type_creator.copy_from_slice(&head[60..68]);
        if !ACCEPTED_TYPES.iter().any(|t| **t == type_creator) {
            return Err(Error::UnsupportedFormat(format!(
                "database type {}",
                String::from_utf8_lossy(&type_creator)
            )));
        }

        let name_end = head[..32].iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&head[..name_end]).into_owned();
        let created = be_u32(&head, 36);
        let modified = be_u32(&head, 40);
        let count = usize::from(u16::from_be_bytes([head[76], head[77]]));

        info!("Reading record table ({count} records)");
        let table_len = count * ENTRY_LEN;
        if (HEADER_LEN + table_len) as u64 > file_len {
            return Err(Error::malformed("record-table"));
        }
        let table = source.read_at(HEADER_LEN as u64, table_len)?;

        let offsets: Vec<u64> = table
            .chunks_exact(ENTRY_LEN)
            .map(|row| u64::from(be_u32(row, 0)))
            .collect();
        let sizes = record_sizes(&offsets, file_len)?;

        let entries = table
            .chunks_exact(ENTRY_LEN)
            .zip(offsets.iter().zip(sizes))
            .map(|(row, (&offset, size))| RecordEntry {
                offset,
                size,
                attributes: row[4],
                uid: u32::from_be_bytes([0, row[5], row[6], row[7]]),
            })
            .collect::<Vec<_>>();
        for (i, e) in entries.iter().enumerate() {
            debug!("Record {i}: offset {} size {}", e.offset, e.size);
        }

        Ok(Self {
            name,
            type_creator,
            created,
            modified,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RecordEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Result<RecordEntry> {
        self.entries
            .get(index)
            .copied()
            .ok_or_else(|| Error::malformed("record-index"))
    }

    /// Reads record `index` in full.
    pub fn read_record(&self, source: &dyn ByteSource, index: usize) -> Result<Vec<u8>> {
        let entry = self.entry(index)?;
        source
            .read_at(entry.offset, entry.size as usize)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::malformed("short-record"),
                _ => Error::Io(e),
            })
    }
}

/// Derives record sizes from their offsets: each record runs to the next
/// offset, the last one to the end of the file.
///
/// Offsets must be non-decreasing and inside the file.
pub fn record_sizes(offsets: &[u64], file_len: u64) -> Result<Vec<u64>> {
    let ends = offsets.iter().skip(1).copied().chain(std::iter::once(file_len));
    offsets
        .iter()
        .zip(ends)
        .map(|(&start, end)| {
            if start > end || end > file_len {
                Err(Error::malformed("record-offset"))
            } else {
                Ok(end - start)
            }
        })
        .collect()
}

/// Writes a complete database with `records` in order.
pub fn write<W: Write + ?Sized>(out: &mut W, name: &str, records: &[Vec<u8>]) -> Result<()> {
    let count = u16::try_from(records.len())
        .map_err(|_| Error::InvalidArgument(format!("{} records exceed the PDB limit", records.len())))?;

    let mut offset = (HEADER_LEN + ENTRY_LEN * records.len() + 2) as u64;
    let mut offsets = Vec::with_capacity(records.len());
    for record in records {
        offsets.push(u32::try_from(offset).map_err(|_| Error::malformed("record-offset"))?);
        offset += record.len() as u64;
    }

    let mut head = [0u8; HEADER_LEN];
    let name = database_name(name);
    head[..name.len()].copy_from_slice(name.as_bytes());
    let now = crate::util::time_now_secs().to_be_bytes();
    head[36..40].copy_from_slice(&now);
    head[40..44].copy_from_slice(&now);
    head[60..68].copy_from_slice(b"BOOKMOBI");
    let seed = (2 * u32::from(count)).saturating_sub(1);
    head[68..72].copy_from_slice(&seed.to_be_bytes());
    head[76..78].copy_from_slice(&count.to_be_bytes());
    out.write_all(&head)?;

    for (i, offset) in offsets.iter().enumerate() {
        let uid = (2 * i as u32).to_be_bytes();
        out.write_all(&offset.to_be_bytes())?;
        out.write_all(&[0, uid[1], uid[2], uid[3]])?;
    }
    out.write_all(&[0, 0])?;

    for record in records {
        out.write_all(record)?;
    }
    Ok(())
}

/// ASCII-only database name, at most 31 bytes.
fn database_name(title: &str) -> String {
    let name: String = title
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .take(31)
        .collect();
    if name.is_empty() { "book".to_string() } else { name }
}

pub(crate) fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

pub(crate) fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}
