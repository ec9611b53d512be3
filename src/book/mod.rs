//! The common document model: a tree of chapters under a book root.

pub mod attributes;

use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};

use chrono::NaiveDateTime;
use log::warn;

use crate::content::{Flob, Text};
use crate::error::Result;
use crate::variant::{Attributes, Locale, Variant};

/// A node of the document tree.
///
/// A chapter has its own attributes, optional text and ordered children.
/// Children are owned, so the tree cannot contain cycles.
#[derive(Debug, Clone, Default)]
pub struct Chapter {
    pub attributes: Attributes,
    pub text: Option<Text>,
    pub children: Vec<Chapter>,
}

impl Chapter {
    pub fn new(title: &str) -> Self {
        Self {
            attributes: Attributes::single(attributes::TITLE, Variant::from(title)),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: Text) -> Self {
        self.text = Some(text);
        self
    }

    pub fn title(&self) -> String {
        self.attributes
            .get_as::<String>(attributes::TITLE)
            .unwrap_or_default()
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.attributes.set(attributes::TITLE, title)
    }

    pub fn authors(&self) -> Vec<String> {
        self.attributes
            .get_as::<String>(attributes::AUTHOR)
            .map(|a| attributes::split_authors(&a))
            .unwrap_or_default()
    }

    pub fn set_authors<S: AsRef<str>>(&mut self, authors: &[S]) -> Result<()> {
        self.attributes
            .set(attributes::AUTHOR, attributes::join_authors(authors))
    }

    pub fn intro(&self) -> Option<Text> {
        self.attributes.get_as(attributes::INTRO)
    }

    pub fn cover(&self) -> Option<Flob> {
        self.attributes.get_as(attributes::COVER)
    }

    pub fn language(&self) -> Option<Locale> {
        self.attributes.get_as(attributes::LANGUAGE)
    }

    pub fn pubdate(&self) -> Option<NaiveDateTime> {
        self.attributes.get_as(attributes::PUBDATE)
    }

    /// String form of a scalar attribute.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.attributes
            .get(name)
            .and_then(Variant::to_display)
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, name: &str, value: impl Into<Variant>) -> Result<()> {
        self.attributes.set(name, value)
    }

    pub fn push(&mut self, child: Chapter) {
        self.children.push(child);
    }

    pub fn insert(&mut self, index: usize, child: Chapter) {
        self.children.insert(index.min(self.children.len()), child);
    }

    pub fn remove(&mut self, index: usize) -> Option<Chapter> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&Chapter> {
        self.children.get(index)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Depth-first pre-order traversal of the descendants, with depth
    /// (direct children are depth 1).
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: self.children.iter().rev().map(|c| (1, c)).collect(),
        }
    }

    /// Number of descendants.
    pub fn count(&self) -> usize {
        self.walk().count()
    }
}

pub struct Walk<'a> {
    stack: Vec<(usize, &'a Chapter)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, &'a Chapter);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, chapter) = self.stack.pop()?;
        self.stack
            .extend(chapter.children.iter().rev().map(|c| (depth + 1, c)));
        Some((depth, chapter))
    }
}

type Cleanup = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// A parsed or assembled book: the root chapter plus codec extensions.
///
/// Parsers register cleanup actions (closing the input source) that run
/// once, on [`Book::close`] or when the book is dropped.
#[derive(Default)]
pub struct Book {
    root: Chapter,
    /// Format-specific values that have no well-known attribute.
    pub extensions: Attributes,
    cleanups: Vec<Cleanup>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_root(root: Chapter) -> Self {
        Self {
            root,
            extensions: Attributes::new(),
            cleanups: Vec::new(),
        }
    }

    pub fn root(&self) -> &Chapter {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Chapter {
        &mut self.root
    }

    pub fn register_cleanup<F>(&mut self, action: F)
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.cleanups.push(Box::new(action));
    }

    /// Runs every cleanup action once, in registration order.
    /// All actions run; the first error is returned.
    pub fn close(&mut self) -> io::Result<()> {
        let mut first_err = None;
        for action in self.cleanups.drain(..) {
            if let Err(e) = action()
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Deref for Book {
    type Target = Chapter;

    fn deref(&self) -> &Chapter {
        &self.root
    }
}

impl DerefMut for Book {
    fn deref_mut(&mut self) -> &mut Chapter {
        &mut self.root
    }
}

impl Drop for Book {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release book resources: {e}");
        }
    }
}

impl fmt::Debug for Book {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Book")
            .field("root", &self.root)
            .field("extensions", &self.extensions)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}
