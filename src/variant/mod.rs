//! Dynamically typed attribute values.
//!
//! Every attribute stored on a chapter or book is a [`Variant`] tagged with
//! one of eight [`VariantKind`]s. Codecs that need to stash richer values use
//! [`Variant::Custom`], which reports the nearest built-in kind.

mod store;

pub use store::{Attributes, Validator};

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::content::{Flob, Text};
use crate::error::Error;

/// The closed set of value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    String,
    Text,
    Blob,
    Integer,
    Real,
    Boolean,
    Locale,
    DateTime,
}

impl VariantKind {
    pub const ALL: [VariantKind; 8] = [
        VariantKind::String,
        VariantKind::Text,
        VariantKind::Blob,
        VariantKind::Integer,
        VariantKind::Real,
        VariantKind::Boolean,
        VariantKind::Locale,
        VariantKind::DateTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VariantKind::String => "string",
            VariantKind::Text => "text",
            VariantKind::Blob => "blob",
            VariantKind::Integer => "integer",
            VariantKind::Real => "real",
            VariantKind::Boolean => "boolean",
            VariantKind::Locale => "locale",
            VariantKind::DateTime => "datetime",
        }
    }

    /// Canonical empty value of this kind.
    pub fn default_value(self) -> Variant {
        match self {
            VariantKind::String => Variant::String(String::new()),
            VariantKind::Text => Variant::Text(Text::inline("", Text::PLAIN, "")),
            VariantKind::Blob => Variant::Blob(Flob::bytes("", Vec::<u8>::new())),
            VariantKind::Integer => Variant::Integer(0),
            VariantKind::Real => Variant::Real(0.0),
            VariantKind::Boolean => Variant::Boolean(false),
            VariantKind::Locale => Variant::Locale(Locale::root()),
            VariantKind::DateTime => Variant::DateTime(NaiveDateTime::default()),
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VariantKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VariantKind::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidArgument(format!("unknown value kind '{s}'")))
    }
}

/// A language tag such as `en-US`. The empty tag is the root locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Locale {
    tag: String,
}

impl Locale {
    pub fn root() -> Self {
        Self::default()
    }

    /// Normalizes `zh_cn` / `ZH-cn` to `zh-CN`.
    pub fn new(tag: &str) -> Self {
        let mut parts = tag.trim().split(['-', '_']).filter(|p| !p.is_empty());
        let mut out = match parts.next() {
            Some(lang) => lang.to_ascii_lowercase(),
            None => return Self::root(),
        };
        for part in parts {
            out.push('-');
            if part.len() == 2 {
                out.push_str(&part.to_ascii_uppercase());
            } else {
                out.push_str(part);
            }
        }
        Self { tag: out }
    }

    pub fn is_root(&self) -> bool {
        self.tag.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.tag
    }

    pub fn language(&self) -> &str {
        self.tag.split('-').next().unwrap_or("")
    }

    pub fn region(&self) -> Option<&str> {
        self.tag.split('-').skip(1).find(|p| p.len() == 2)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::InvalidArgument(format!("bad language tag '{s}'")));
        }
        Ok(Locale::new(s))
    }
}

/// Opaque extension value reporting the nearest built-in kind.
#[derive(Clone)]
pub struct CustomValue {
    type_name: &'static str,
    kind: VariantKind,
    value: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            kind: VariantKind::String,
            value: Arc::new(value),
        }
    }

    pub fn with_kind(mut self, kind: VariantKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValue")
            .field("type_name", &self.type_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum Variant {
    String(String),
    Text(Text),
    Blob(Flob),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Locale(Locale),
    DateTime(NaiveDateTime),
    Custom(CustomValue),
}

impl Variant {
    pub fn kind(&self) -> VariantKind {
        match self {
            Variant::String(_) => VariantKind::String,
            Variant::Text(_) => VariantKind::Text,
            Variant::Blob(_) => VariantKind::Blob,
            Variant::Integer(_) => VariantKind::Integer,
            Variant::Real(_) => VariantKind::Real,
            Variant::Boolean(_) => VariantKind::Boolean,
            Variant::Locale(_) => VariantKind::Locale,
            Variant::DateTime(_) => VariantKind::DateTime,
            Variant::Custom(c) => c.kind(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Variant::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_flob(&self) -> Option<&Flob> {
        match self {
            Variant::Blob(f) => Some(f),
            _ => None,
        }
    }

    /// Short display form for scalar kinds. Lazy payloads are not read.
    pub fn to_display(&self) -> Option<String> {
        match self {
            Variant::String(s) => Some(s.clone()),
            Variant::Integer(i) => Some(i.to_string()),
            Variant::Real(r) => Some(r.to_string()),
            Variant::Boolean(b) => Some(b.to_string()),
            Variant::Locale(l) => Some(l.to_string()),
            Variant::DateTime(d) => Some(d.format("%Y-%m-%dT%H:%M:%S").to_string()),
            Variant::Text(_) | Variant::Blob(_) | Variant::Custom(_) => None,
        }
    }
}

/// Typed extraction from a [`Variant`]. `None` means "not convertible".
pub trait FromVariant: Sized {
    fn from_variant(value: &Variant) -> Option<Self>;
}

impl FromVariant for String {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Text(_) | Variant::Blob(_) | Variant::Custom(_) => None,
            other => other.to_display(),
        }
    }
}

impl FromVariant for i64 {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Integer(i) => Some(*i),
            Variant::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

macro_rules! narrow_integer {
    ($($ty:ty),*) => {
        $(
            impl FromVariant for $ty {
                fn from_variant(value: &Variant) -> Option<Self> {
                    i64::from_variant(value).and_then(|i| <$ty>::try_from(i).ok())
                }
            }
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::Integer(value as i64)
                }
            }
        )*
    };
}

narrow_integer!(i32, u32, usize);

impl FromVariant for f64 {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Real(r) => Some(*r),
            Variant::Integer(i) => Some(*i as f64),
            Variant::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromVariant for bool {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromVariant for Locale {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Locale(l) => Some(l.clone()),
            Variant::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromVariant for NaiveDateTime {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::DateTime(d) => Some(*d),
            _ => None,
        }
    }
}

impl FromVariant for Text {
    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Text(t) => Some(t.clone()),
            Variant::String(s) => Some(Text::inline("", Text::PLAIN, s.as_str())),
            _ => None,
        }
    }
}

impl FromVariant for Flob {
    fn from_variant(value: &Variant) -> Option<Self> {
        value.as_flob().cloned()
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Integer(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Real(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Boolean(value)
    }
}

impl From<Locale> for Variant {
    fn from(value: Locale) -> Self {
        Variant::Locale(value)
    }
}

impl From<NaiveDateTime> for Variant {
    fn from(value: NaiveDateTime) -> Self {
        Variant::DateTime(value)
    }
}

impl From<Text> for Variant {
    fn from(value: Text) -> Self {
        Variant::Text(value)
    }
}

impl From<Flob> for Variant {
    fn from(value: Flob) -> Self {
        Variant::Blob(value)
    }
}

impl From<CustomValue> for Variant {
    fn from(value: CustomValue) -> Self {
        Variant::Custom(value)
    }
}
