//! Lazy access to the compressed text blocks of a MOBI file.
//!
//! Text positions are byte offsets into the uncompressed stream. Since every
//! block but the last decompresses to exactly `record_size` bytes and that
//! size is a power of two, `position >> shift` is the block index and
//! `position & mask` the offset inside it.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use log::trace;

use super::headers::Compression;
use super::palmdoc;
use super::pdb::RecordEntry;
use crate::content::VirtualArchive;
use crate::error::{Error, Result};
use crate::io::ByteSource;

/// A chapter's slice of the text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub position: u64,
    pub length: u64,
}

/// Text records of one book, exposed as a [`VirtualArchive`] whose
/// entries are named windows.
pub struct TextBlocks {
    source: Arc<dyn ByteSource>,
    records: Vec<RecordEntry>,
    compression: Compression,
    extra_flags: u16,
    record_size: u64,
    shift: u32,
    text_length: u64,
    windows: HashMap<String, Window>,
}

impl TextBlocks {
    /// `records` are the text records in order (record 1 onwards).
    pub fn new(
        source: Arc<dyn ByteSource>,
        records: Vec<RecordEntry>,
        compression: Compression,
        extra_flags: u16,
        record_size: u64,
        text_length: u64,
    ) -> Result<Self> {
        if !record_size.is_power_of_two() {
            return Err(Error::malformed("record-size"));
        }
        if text_length > record_size * records.len() as u64 {
            return Err(Error::malformed("text-length"));
        }
        Ok(Self {
            source,
            records,
            compression,
            extra_flags,
            record_size,
            shift: record_size.trailing_zeros(),
            text_length,
            windows: HashMap::new(),
        })
    }

    pub fn text_length(&self) -> u64 {
        self.text_length
    }

    pub fn block_count(&self) -> usize {
        self.records.len()
    }

    /// Block index and intra-block offset of a text position.
    pub fn locate(&self, position: u64) -> (usize, usize) {
        let mask = self.record_size - 1;
        ((position >> self.shift) as usize, (position & mask) as usize)
    }

    /// Registers a named window. Fails if it runs past the text.
    pub fn add_window(&mut self, name: impl Into<String>, window: Window) -> Result<()> {
        match window.position.checked_add(window.length) {
            Some(end) if end <= self.text_length => {
                self.windows.insert(name.into(), window);
                Ok(())
            }
            _ => Err(Error::malformed("chapter-range")),
        }
    }

    pub fn window(&self, name: &str) -> Option<Window> {
        self.windows.get(name).copied()
    }

    /// Reads and decompresses block `index`.
    pub fn block(&self, index: usize) -> Result<Vec<u8>> {
        let entry = self
            .records
            .get(index)
            .ok_or_else(|| Error::malformed("block-index"))?;
        let raw = self
            .source
            .read_at(entry.offset, entry.size as usize)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::malformed("short-record"),
                _ => Error::Io(e),
            })?;
        let payload = strip_trailing_entries(&raw, self.extra_flags)?;
        let block = match self.compression {
            Compression::PalmDoc => palmdoc::decompress(payload)?,
            Compression::None => payload.to_vec(),
        };
        trace!("Text block {index}: {} -> {} bytes", raw.len(), block.len());

        let last = index + 1 == self.records.len();
        let size = block.len() as u64;
        if (!last && size != self.record_size) || size > self.record_size {
            return Err(Error::malformed("block-size"));
        }
        Ok(block)
    }

    /// Decompresses consecutive blocks until the window is covered and
    /// returns its bytes.
    pub fn read_window(&self, window: Window) -> Result<Vec<u8>> {
        if window.length == 0 {
            return Ok(Vec::new());
        }
        let (mut index, local) = self.locate(window.position);
        let wanted = local + window.length as usize;
        let mut joined = Vec::with_capacity(wanted);
        while joined.len() < wanted {
            if index >= self.records.len() {
                return Err(Error::malformed("text-length"));
            }
            joined.extend_from_slice(&self.block(index)?);
            index += 1;
        }
        joined.truncate(wanted);
        joined.drain(..local);
        Ok(joined)
    }

    /// The whole uncompressed text.
    pub fn read_all_text(&self) -> Result<Vec<u8>> {
        self.read_window(Window {
            position: 0,
            length: self.text_length,
        })
    }
}

impl VirtualArchive for TextBlocks {
    fn contains(&self, entry: &str) -> bool {
        self.windows.contains_key(entry)
    }

    fn open_entry(&self, entry: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read_entry(entry)?)))
    }

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>> {
        let window = self
            .window(entry)
            .ok_or_else(|| Error::NotFound(format!("text window {entry}")))?;
        self.read_window(window)
    }

    fn entry_size(&self, entry: &str) -> Option<u64> {
        self.window(entry).map(|w| w.length)
    }
}

/// Removes the trailing entries announced by the extra-data flags.
///
/// Bits 1..15 each add an entry whose size is a backward-encoded varint at
/// the end of the record; bit 0 is the multibyte overlap, stripped last.
pub fn strip_trailing_entries(record: &[u8], flags: u16) -> Result<&[u8]> {
    let mut end = record.len();
    for bit in 1..16 {
        if flags & (1 << bit) == 0 {
            continue;
        }
        let size = backward_varint(&record[..end]);
        if size > end {
            return Err(Error::malformed("trailing-entry"));
        }
        end -= size;
    }
    if flags & 1 != 0 && end > 0 {
        let overlap = usize::from(record[end - 1] & 3) + 1;
        if overlap > end {
            return Err(Error::malformed("trailing-entry"));
        }
        end -= overlap;
    }
    Ok(&record[..end])
}

fn backward_varint(data: &[u8]) -> usize {
    let mut value = 0usize;
    let mut shift = 0;
    for &byte in data.iter().rev().take(4) {
        value |= usize::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 != 0 {
            break;
        }
    }
    value
}
