use std::fmt;
use std::sync::Arc;

use super::{FromVariant, Variant};
use crate::book::attributes::known_kind;
use crate::error::{Error, Result};

/// Hook run before every write. Returning an error vetoes the write.
pub type Validator = Arc<dyn Fn(&str, &Variant) -> Result<()> + Send + Sync>;

/// Insertion-ordered name/value store.
///
/// Cloning is shallow: lazy payloads share their backing with the original.
#[derive(Clone, Default)]
pub struct Attributes {
    entries: Vec<(String, Variant)>,
    validator: Option<Validator>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator(validator: Validator) -> Self {
        Self {
            entries: Vec::new(),
            validator: Some(validator),
        }
    }

    pub fn set_validator(&mut self, validator: Option<Validator>) {
        self.validator = validator;
    }

    /// A store holding one entry, bypassing validation.
    pub(crate) fn single(name: &str, value: Variant) -> Self {
        Self {
            entries: vec![(name.to_string(), value)],
            validator: None,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == name)
    }

    /// Inserts or replaces `name`. A replaced key keeps its position.
    pub fn set(&mut self, name: &str, value: impl Into<Variant>) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("attribute name is empty".into()));
        }
        let value = value.into();
        if let Some(validator) = &self.validator {
            validator(name, &value)?;
        }
        match self.position(name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    pub fn get_or(&self, name: &str, fallback: Variant) -> Variant {
        self.get(name).cloned().unwrap_or(fallback)
    }

    /// Value of `name`, else the default of its well-known kind.
    pub fn get_or_known(&self, name: &str) -> Option<Variant> {
        self.get(name)
            .cloned()
            .or_else(|| known_kind(name).map(|k| k.default_value()))
    }

    /// Typed read. Values are converted where [`FromVariant`] allows it, so a
    /// string `"17"` reads back as an `i64`; anything else is `None`.
    pub fn get_as<T: FromVariant>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(T::from_variant)
    }

    pub fn get_as_or<T: FromVariant>(&self, name: &str, fallback: T) -> T {
        self.get_as(name).unwrap_or(fallback)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Variant> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Copies every entry of `other` through [`Attributes::set`].
    pub fn update(&mut self, other: &Attributes) -> Result<()> {
        for (name, value) in &other.entries {
            self.set(name, value.clone())?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v)))
            .finish()
    }
}
