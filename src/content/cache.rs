use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Location of one appended string inside a [`TextCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTag {
    pub offset: usize,
    pub len: usize,
}

/// Shared append-only buffer for decoded text that has no cheaper backing.
#[derive(Clone, Default)]
pub struct TextCache {
    buffer: Arc<Mutex<String>>,
}

impl TextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, text: &str) -> CacheTag {
        let mut buffer = match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let offset = buffer.len();
        buffer.push_str(text);
        CacheTag {
            offset,
            len: text.len(),
        }
    }

    pub fn get(&self, tag: CacheTag) -> Result<String> {
        let buffer = self
            .buffer
            .lock()
            .map_err(|_| Error::InvalidArgument("text cache lock poisoned".into()))?;
        buffer
            .get(tag.offset..tag.offset + tag.len)
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidArgument(format!("stale cache tag {tag:?}")))
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
