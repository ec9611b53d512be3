use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// A thread-safe, random-access source of bytes.
///
/// Positioned reads never move a shared cursor, so lazy payloads that
/// point into the same source can be read in any order.
pub trait ByteSource: Send + Sync {
    /// Returns the total length of the source.
    fn len(&self) -> u64;

    /// Returns true if the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` with bytes starting at `offset`.
    /// Returns `buf.len()` or an error; short reads are errors.
    fn read_at_into(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads exactly `len` bytes starting at `offset`.
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let read = self.read_at_into(offset, &mut buf)?;
        if read != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough data"));
        }
        Ok(buf)
    }

    /// Releases the underlying handle. Reads after `close` fail.
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

fn closed_error() -> io::Error {
    io::Error::other("byte source is closed")
}

fn check_range(offset: u64, want: usize, total: u64) -> io::Result<()> {
    match offset.checked_add(want as u64) {
        Some(end) if end <= total => Ok(()),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {want} bytes at {offset} exceeds length {total}"),
        )),
    }
}

// --- Implementation: Local File ---

/// A file read with positioned reads (`pread` / `seek_read`).
pub struct FileSource {
    file: RwLock<Option<File>>,
    len: u64,
}

impl FileSource {
    pub fn new(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: RwLock::new(Some(file)),
            len,
        })
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }

    pub fn is_closed(&self) -> bool {
        self.file.read().map(|f| f.is_none()).unwrap_or(true)
    }

    fn with_file<T>(&self, f: impl FnOnce(&File) -> io::Result<T>) -> io::Result<T> {
        let guard = self.file.read().map_err(|_| io::Error::other("poisoned lock"))?;
        match guard.as_ref() {
            Some(file) => f(file),
            None => Err(closed_error()),
        }
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at_into(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        check_range(offset, buf.len(), self.len)?;
        self.with_file(|file| positioned_read(file, offset, buf))
    }

    fn close(&self) -> io::Result<()> {
        let mut guard = self.file.write().map_err(|_| io::Error::other("poisoned lock"))?;
        guard.take();
        Ok(())
    }
}

#[cfg(unix)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt; // Enables pread
    file.read_exact_at(buf, offset)?;
    Ok(buf.len())
}

#[cfg(windows)]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut done = 0;
    while done < buf.len() {
        let read = file.seek_read(&mut buf[done..], offset + done as u64)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "not enough data"));
        }
        done += read;
    }
    Ok(done)
}

#[cfg(all(not(unix), not(windows)))]
fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut file_clone = file.try_clone()?;
    file_clone.seek(SeekFrom::Start(offset))?;
    file_clone.read_exact(buf)?;
    Ok(buf.len())
}

// --- Implementation: In-Memory ---

/// An in-memory ByteSource backed by a `Vec<u8>`.
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at_into(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        check_range(offset, buf.len(), self.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(buf.len())
    }
}

// --- Implementation: Seekable Reader ---

/// Adapts any `Read + Seek` stream. Each positioned read seeks and reads
/// under one lock, so concurrent readers never interleave.
pub struct ReaderSource<R> {
    inner: Mutex<Option<R>>,
    len: u64,
}

impl<R: Read + Seek + Send> ReaderSource<R> {
    pub fn new(mut reader: R) -> io::Result<Self> {
        let len = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: Mutex::new(Some(reader)),
            len,
        })
    }
}

impl<R: Read + Seek + Send> ByteSource for ReaderSource<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at_into(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        check_range(offset, buf.len(), self.len)?;
        let mut guard = self.inner.lock().map_err(|_| io::Error::other("poisoned lock"))?;
        let reader = guard.as_mut().ok_or_else(closed_error)?;
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf)?;
        Ok(buf.len())
    }

    fn close(&self) -> io::Result<()> {
        let mut guard = self.inner.lock().map_err(|_| io::Error::other("poisoned lock"))?;
        guard.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_memory_source_read_at_into() {
        let source = MemorySource::new(b"hello world".to_vec());
        let mut buf = [0u8; 5];
        let read = source.read_at_into(6, &mut buf).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_memory_source_read_at() {
        let source = MemorySource::new(b"abcdef".to_vec());
        let data = source.read_at(1, 3).unwrap();
        assert_eq!(&data, b"bcd");
    }

    #[test]
    fn test_memory_source_past_end() {
        let source = MemorySource::new(b"abc".to_vec());
        let err = source.read_at(2, 5).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_reader_source_positioned() {
        let source = ReaderSource::new(Cursor::new(b"0123456789".to_vec())).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_at(7, 3).unwrap(), b"789");
        assert_eq!(source.read_at(0, 2).unwrap(), b"01");
    }

    #[test]
    fn test_file_source_close() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"payload").unwrap();
        let source = FileSource::open(tmp.path()).unwrap();
        assert_eq!(source.read_at(3, 4).unwrap(), b"load");
        source.close().unwrap();
        assert!(source.is_closed());
        assert!(source.read_at(0, 1).is_err());
    }
}
