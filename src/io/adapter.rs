use super::byte_source::ByteSource;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

/// Stateful `Read + Seek` view over a shared [`ByteSource`].
///
/// Handed to `zip::ZipArchive`, and used for block payload streams where
/// `start..end` restricts the view to one byte range of the source.
pub struct ByteSourceCursor {
    inner: Arc<dyn ByteSource>,
    start: u64,
    end: u64,
    position: u64,
}

impl ByteSourceCursor {
    pub fn new(inner: Arc<dyn ByteSource>) -> Self {
        let end = inner.len();
        Self {
            inner,
            start: 0,
            end,
            position: 0,
        }
    }

    /// Cursor over `offset..offset + size`. Positions are relative to `offset`.
    pub fn window(inner: Arc<dyn ByteSource>, offset: u64, size: u64) -> Self {
        Self {
            inner,
            start: offset,
            end: offset + size,
            position: 0,
        }
    }

    fn window_len(&self) -> u64 {
        self.end - self.start
    }
}

impl Read for ByteSourceCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let total_len = self.window_len();
        if self.position >= total_len || buf.is_empty() {
            return Ok(0);
        }
        let want = (total_len - self.position).min(buf.len() as u64) as usize;
        let read = self
            .inner
            .read_at_into(self.start + self.position, &mut buf[..want])?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Seek for ByteSourceCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let total_len = self.window_len() as i64;
        let new_pos = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::End(p) => total_len + p,
            SeekFrom::Current(p) => self.position as i64 + p,
        };

        if new_pos < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "Seek before 0"));
        }

        self.position = new_pos as u64;
        Ok(self.position)
    }
}
