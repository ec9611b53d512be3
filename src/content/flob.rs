use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;

use super::mime;
use super::{VirtualArchive, ZipStore};
use crate::error::{Error, Result};
use crate::io::{ByteSource, ByteSourceCursor};

/// Opens URLs whose scheme the crate does not handle itself (`http:` etc.).
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

/// Byte range of a block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: u64,
    pub size: u64,
}

#[derive(Clone)]
enum Backing {
    File(PathBuf),
    Archive {
        archive: Arc<dyn VirtualArchive>,
        entry: String,
    },
    Block {
        source: Arc<dyn ByteSource>,
        span: Arc<Mutex<Span>>,
    },
    Bytes(Arc<[u8]>),
    Url {
        url: String,
        opener: Option<Arc<dyn UrlOpener>>,
    },
}

struct FlobInner {
    name: String,
    mime: OnceLock<String>,
    backing: Backing,
}

/// A named, typed, re-openable binary payload.
///
/// Construction checks that the backing exists but reads nothing. Every
/// [`Flob::open_stream`] call returns an independent stream. Clones share
/// the backing.
#[derive(Clone)]
pub struct Flob {
    inner: Arc<FlobInner>,
}

fn file_name_of(path: &str) -> String {
    path.rsplit(['/', '\\']).next().unwrap_or(path).to_string()
}

fn check_span(source: &dyn ByteSource, offset: u64, size: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= source.len() => Ok(()),
        _ => Err(Error::InvalidArgument(format!(
            "block {offset}+{size} exceeds source length {}",
            source.len()
        ))),
    }
}

impl Flob {
    fn from_backing(name: String, backing: Backing) -> Self {
        Self {
            inner: Arc::new(FlobInner {
                name,
                mime: OnceLock::new(),
                backing,
            }),
        }
    }

    /// Payload backed by a file on disk.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        if meta.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "{} is a directory",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::from_backing(name, Backing::File(path.to_path_buf())))
    }

    /// Member of a ZIP archive.
    pub fn zip_entry(store: &Arc<ZipStore>, entry: &str) -> Result<Self> {
        let archive: Arc<dyn VirtualArchive> = store.clone();
        Self::archive_entry(archive, entry)
    }

    /// Member of any [`VirtualArchive`].
    pub fn archive_entry(archive: Arc<dyn VirtualArchive>, entry: &str) -> Result<Self> {
        if !archive.contains(entry) {
            return Err(Error::NotFound(format!("archive entry {entry}")));
        }
        Ok(Self::from_backing(
            file_name_of(entry),
            Backing::Archive {
                archive,
                entry: entry.to_string(),
            },
        ))
    }

    /// `size` bytes at `offset` of a shared random-access source.
    pub fn block(source: Arc<dyn ByteSource>, offset: u64, size: u64) -> Result<Self> {
        check_span(source.as_ref(), offset, size)?;
        Ok(Self::from_backing(
            String::new(),
            Backing::Block {
                source,
                span: Arc::new(Mutex::new(Span { offset, size })),
            },
        ))
    }

    /// In-memory payload.
    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self::from_backing(name.into(), Backing::Bytes(data.into()))
    }

    /// `file:` or `data:` URL.
    pub fn url(url: &str) -> Result<Self> {
        Self::url_inner(url, None)
    }

    /// URL of any scheme, opened with `opener` unless it is `file:` or `data:`.
    pub fn url_with(url: &str, opener: Arc<dyn UrlOpener>) -> Result<Self> {
        Self::url_inner(url, Some(opener))
    }

    fn url_inner(url: &str, opener: Option<Arc<dyn UrlOpener>>) -> Result<Self> {
        let (scheme, rest) = url
            .split_once(':')
            .filter(|(s, _)| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)))
            .ok_or_else(|| Error::InvalidArgument(format!("URL without scheme: {url}")))?;
        let scheme = scheme.to_ascii_lowercase();
        let name = match scheme.as_str() {
            "file" => {
                let path = file_url_path(rest)?;
                if !path.exists() {
                    return Err(Error::NotFound(path.display().to_string()));
                }
                file_name_of(&path.to_string_lossy())
            }
            "data" => {
                if !rest.contains(',') {
                    return Err(Error::InvalidArgument(format!("malformed data URL: {url}")));
                }
                String::new()
            }
            other => {
                if opener.is_none() {
                    return Err(Error::UnsupportedFormat(format!(
                        "no opener for URL scheme '{other}'"
                    )));
                }
                let path = rest.split(['?', '#']).next().unwrap_or(rest);
                file_name_of(path)
            }
        };
        Ok(Self::from_backing(
            name,
            Backing::Url {
                url: url.to_string(),
                opener,
            },
        ))
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        let mime = OnceLock::new();
        if let Some(m) = self.inner.mime.get() {
            let _ = mime.set(m.clone());
        }
        Self {
            inner: Arc::new(FlobInner {
                name: name.into(),
                mime,
                backing: self.inner.backing.clone(),
            }),
        }
    }

    pub fn with_mime(self, mime_type: impl Into<String>) -> Self {
        let mime = OnceLock::new();
        let _ = mime.set(mime_type.into());
        Self {
            inner: Arc::new(FlobInner {
                name: self.inner.name.clone(),
                mime,
                backing: self.inner.backing.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Media type: explicit, else by extension, else sniffed, else
    /// `application/octet-stream`. Resolved once.
    pub fn mime(&self) -> &str {
        self.inner.mime.get_or_init(|| {
            if let Some(m) = mime::from_extension(&self.inner.name) {
                return m.to_string();
            }
            if let Backing::Url { url, .. } = &self.inner.backing
                && let Some(rest) = url.strip_prefix("data:")
            {
                let header = rest.split(',').next().unwrap_or("");
                let media = header.split(';').next().unwrap_or("");
                if !media.is_empty() {
                    return media.to_string();
                }
            }
            if let Backing::Block { .. } | Backing::Bytes(_) = &self.inner.backing
                && let Ok(head) = self.head(16)
                && let Some(m) = mime::sniff(&head)
            {
                return m.to_string();
            }
            mime::OCTET_STREAM.to_string()
        })
    }

    fn head(&self, len: usize) -> Result<Vec<u8>> {
        match &self.inner.backing {
            Backing::Bytes(data) => Ok(data[..len.min(data.len())].to_vec()),
            Backing::Block { source, span } => {
                let span = *lock_span(span)?;
                let want = (len as u64).min(span.size) as usize;
                Ok(source.read_at(span.offset, want)?)
            }
            _ => {
                let mut buf = Vec::with_capacity(len);
                self.open_stream()?.take(len as u64).read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Current span of a block payload.
    pub fn span(&self) -> Option<Span> {
        match &self.inner.backing {
            Backing::Block { span, .. } => lock_span(span).ok().map(|s| *s),
            _ => None,
        }
    }

    /// Re-targets a block payload after its real extent is known.
    pub fn set_span(&self, offset: u64, size: u64) -> Result<()> {
        match &self.inner.backing {
            Backing::Block { source, span } => {
                check_span(source.as_ref(), offset, size)?;
                *lock_span(span)? = Span { offset, size };
                Ok(())
            }
            _ => Err(Error::InvalidArgument(
                "only block payloads have a span".into(),
            )),
        }
    }

    /// Size in bytes when it is known without reading.
    pub fn size_hint(&self) -> Option<u64> {
        match &self.inner.backing {
            Backing::Bytes(data) => Some(data.len() as u64),
            Backing::Block { span, .. } => lock_span(span).ok().map(|s| s.size),
            Backing::File(path) => fs::metadata(path).ok().map(|m| m.len()),
            Backing::Archive { archive, entry } => archive.entry_size(entry),
            Backing::Url { .. } => None,
        }
    }

    /// Opens a fresh stream positioned at the start of the payload.
    pub fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        match &self.inner.backing {
            Backing::File(path) => Ok(Box::new(File::open(path)?)),
            Backing::Archive { archive, entry } => archive.open_entry(entry),
            Backing::Block { source, span } => {
                let span = *lock_span(span)?;
                Ok(Box::new(ByteSourceCursor::window(
                    source.clone(),
                    span.offset,
                    span.size,
                )))
            }
            Backing::Bytes(data) => Ok(Box::new(Cursor::new(data.clone()))),
            Backing::Url { url, opener } => open_url(url, opener.as_deref()),
        }
    }

    /// Reads the whole payload.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        match &self.inner.backing {
            Backing::Bytes(data) => Ok(data.to_vec()),
            Backing::File(path) => Ok(fs::read(path)?),
            Backing::Block { source, span } => {
                let span = *lock_span(span)?;
                Ok(source.read_at(span.offset, span.size as usize)?)
            }
            Backing::Archive { archive, entry } => archive.read_entry(entry),
            Backing::Url { .. } => {
                let mut buf = Vec::new();
                self.open_stream()?.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }

    /// Streams the payload into `sink`. Returns the number of bytes written.
    pub fn write_to(&self, sink: &mut dyn Write) -> Result<u64> {
        let mut stream = self.open_stream()?;
        Ok(io::copy(&mut stream, sink)?)
    }
}

impl fmt::Debug for Flob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.backing {
            Backing::File(_) => "file",
            Backing::Archive { .. } => "archive",
            Backing::Block { .. } => "block",
            Backing::Bytes(_) => "bytes",
            Backing::Url { .. } => "url",
        };
        f.debug_struct("Flob")
            .field("name", &self.inner.name)
            .field("backing", &kind)
            .finish()
    }
}

fn lock_span(span: &Mutex<Span>) -> Result<std::sync::MutexGuard<'_, Span>> {
    span.lock()
        .map_err(|_| Error::Io(io::Error::other("poisoned span lock")))
}

fn file_url_path(rest: &str) -> Result<PathBuf> {
    let path = rest.strip_prefix("//").unwrap_or(rest);
    // file://host/path: only the empty host and localhost are local
    let path = match path.find('/') {
        Some(0) => path,
        Some(i) if &path[..i] == "localhost" => &path[i..],
        _ if rest.starts_with("//") => {
            return Err(Error::InvalidArgument(format!("remote file URL: file:{rest}")));
        }
        _ => path,
    };
    let decoded = percent_encoding::percent_decode_str(path)
        .decode_utf8()
        .map_err(|_| Error::InvalidArgument(format!("invalid UTF-8 in file URL: {path}")))?;
    Ok(PathBuf::from(decoded.as_ref()))
}

fn open_url(url: &str, opener: Option<&dyn UrlOpener>) -> Result<Box<dyn Read + Send>> {
    if let Some(rest) = url.strip_prefix("file:") {
        return Ok(Box::new(File::open(file_url_path(rest)?)?));
    }
    if let Some(rest) = url.strip_prefix("data:") {
        return Ok(Box::new(Cursor::new(decode_data_url(rest)?)));
    }
    match opener {
        Some(opener) => {
            debug!("Opening {url} through external opener");
            opener.open(url)
        }
        None => Err(Error::UnsupportedFormat(format!("no opener for {url}"))),
    }
}

fn decode_data_url(rest: &str) -> Result<Vec<u8>> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::InvalidArgument("malformed data URL".into()))?;
    if header.ends_with(";base64") {
        STANDARD
            .decode(payload.trim())
            .map_err(|e| Error::InvalidArgument(format!("bad base64 in data URL: {e}")))
    } else {
        Ok(percent_encoding::percent_decode_str(payload).collect())
    }
}
