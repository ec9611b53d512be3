//! Lazy binary and text payloads.
//!
//! A [`Flob`] is a handle to bytes that live somewhere else: a file, an
//! archive member, a byte range of a source, a buffer, or a URL. A [`Text`]
//! is a character view over a `Flob`, an inline string, or a [`TextCache`]
//! slot. Neither reads anything until asked.

mod cache;
mod flob;
pub mod mime;
mod text;
mod zip_store;

use std::io::Read;

pub use cache::{CacheTag, TextCache};
pub use flob::{Flob, Span, UrlOpener};
pub use text::Text;
pub use zip_store::ZipStore;

use crate::error::Result;

/// A container of named members that can be opened on demand.
pub trait VirtualArchive: Send + Sync {
    fn contains(&self, entry: &str) -> bool;

    fn open_entry(&self, entry: &str) -> Result<Box<dyn Read + Send>>;

    fn read_entry(&self, entry: &str) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open_entry(entry)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn entry_size(&self, _entry: &str) -> Option<u64> {
        None
    }
}
