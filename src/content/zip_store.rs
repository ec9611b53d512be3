use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use log::warn;
use zip::ZipArchive;

use super::VirtualArchive;
use crate::error::{Error, Result};
use crate::io::{ByteSource, ByteSourceCursor};
use crate::util::decode_text;

/// A ZIP archive opened once over a shared [`ByteSource`].
///
/// Member reads are serialized on one lock; each read materializes the
/// member so the returned streams are independent of the archive.
pub struct ZipStore {
    archive: Mutex<ZipArchive<ByteSourceCursor>>,
    names: Vec<String>,
    lookup: HashSet<String>,
}

impl ZipStore {
    pub fn open(source: Arc<dyn ByteSource>) -> Result<Self> {
        let archive = ZipArchive::new(ByteSourceCursor::new(source))?;
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        let lookup = names.iter().cloned().collect();
        Ok(Self {
            archive: Mutex::new(archive),
            names,
            lookup,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Resolves `name`, falling back to its percent-decoded form.
    fn resolve(&self, name: &str) -> Option<String> {
        if self.lookup.contains(name) {
            return Some(name.to_string());
        }
        let decoded = percent_encoding::percent_decode_str(name)
            .decode_utf8()
            .ok()?;
        if self.lookup.contains(decoded.as_ref()) {
            warn!("Resolved percent-encoded archive path {name} to {decoded}");
            return Some(decoded.into_owned());
        }
        None
    }

    pub fn read(&self, name: &str) -> Result<Vec<u8>> {
        let resolved = self
            .resolve(name)
            .ok_or_else(|| Error::NotFound(format!("archive entry {name}")))?;
        let mut archive = self
            .archive
            .lock()
            .map_err(|_| Error::InvalidArgument("zip archive lock poisoned".into()))?;
        let mut file = archive.by_name(&resolved)?;
        let mut contents = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    /// Reads a member as text, honoring a BOM and the XML declaration.
    pub fn read_string(&self, name: &str) -> Result<String> {
        let bytes = self.read(name)?;
        let hint = crate::util::extract_xml_encoding(&bytes).map(str::to_string);
        Ok(decode_text(&bytes, hint.as_deref()).into_owned())
    }
}

impl VirtualArchive for ZipStore {
    fn contains(&self, entry: &str) -> bool {
        self.resolve(entry).is_some()
    }

    fn open_entry(&self, entry: &str) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read(entry)?)))
    }

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>> {
        self.read(entry)
    }

    fn entry_size(&self, entry: &str) -> Option<u64> {
        let resolved = self.resolve(entry)?;
        let mut archive = self.archive.lock().ok()?;
        archive.by_name(&resolved).ok().map(|f| f.size())
    }
}
