//! Declarative binding of codec configuration from an argument map.
//!
//! A configuration type lists its fields once in [`Config::fields`]. Each
//! field is looked up as `<prefix><tag>` in [`Arguments`]; values arrive as
//! CLI text, typed variants, or ready-made objects and are coerced through
//! [`FromArgument`].

use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use log::debug;

use crate::error::{Error, Result};
use crate::variant::{Locale, Variant};

/// Tag of the argument that supplies a whole configuration object.
pub const SELF_KEY: &str = "self";

/// One argument value.
#[derive(Clone)]
pub enum Argument {
    Text(String),
    Value(Variant),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Argument {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Argument::Object(Arc::new(value))
    }

    fn describe(&self) -> String {
        match self {
            Argument::Text(s) => s.clone(),
            Argument::Value(v) => v
                .to_display()
                .unwrap_or_else(|| format!("<{}>", v.kind())),
            Argument::Object(_) => "<object>".to_string(),
        }
    }
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Argument::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Argument::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Argument::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<&str> for Argument {
    fn from(value: &str) -> Self {
        Argument::Text(value.to_string())
    }
}

impl From<String> for Argument {
    fn from(value: String) -> Self {
        Argument::Text(value)
    }
}

impl From<Variant> for Argument {
    fn from(value: Variant) -> Self {
        Argument::Value(value)
    }
}

/// Flat argument map keyed `<format>.<parse|make>.<field>`.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    entries: HashMap<String, Argument>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Argument>) -> &mut Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Argument>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert_object<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Argument::object(value));
    }

    /// Adds a `key=value` pair as text, the form used by `-D` options.
    pub fn parse_pair(&mut self, pair: &str) -> Result<()> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| Error::InvalidArgument(format!("expected key=value, got '{pair}'")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument(format!("empty key in '{pair}'")));
        }
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Argument> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Argument> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<Argument>> FromIterator<(K, V)> for Arguments {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Conversion of argument values into configuration field types.
pub trait FromArgument: Clone + Send + Sync + 'static {
    /// Name reported in `BadConfiguration` errors.
    const TYPE_NAME: &'static str;

    fn from_text(text: &str) -> Option<Self>;

    fn from_variant(value: &Variant) -> Option<Self> {
        value.to_display().and_then(|s| Self::from_text(&s))
    }
}

fn convert<T: FromArgument>(arg: &Argument, key: &str) -> Result<T> {
    let converted = match arg {
        Argument::Text(s) => T::from_text(s),
        Argument::Value(v) => T::from_variant(v),
        Argument::Object(o) => o.downcast_ref::<T>().cloned(),
    };
    converted.ok_or_else(|| Error::bad_config(key, arg.describe(), T::TYPE_NAME))
}

impl FromArgument for String {
    const TYPE_NAME: &'static str = "string";

    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }
}

impl FromArgument for bool {
    const TYPE_NAME: &'static str = "boolean";

    fn from_text(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Boolean(b) => Some(*b),
            Variant::Integer(i) => Some(*i != 0),
            Variant::String(s) => Self::from_text(s),
            _ => None,
        }
    }
}

macro_rules! integer_argument {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl FromArgument for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_text(text: &str) -> Option<Self> {
                    let text = text.trim();
                    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                        Some(hex) => <$ty>::from_str_radix(hex, 16).ok(),
                        None => text.parse().ok(),
                    }
                }

                fn from_variant(value: &Variant) -> Option<Self> {
                    match value {
                        Variant::Integer(i) => <$ty>::try_from(*i).ok(),
                        Variant::String(s) => Self::from_text(s),
                        _ => None,
                    }
                }
            }
        )*
    };
}

integer_argument!(
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u32 => "u32",
    u64 => "u64",
    usize => "usize"
);

impl FromArgument for f64 {
    const TYPE_NAME: &'static str = "real";

    fn from_text(text: &str) -> Option<Self> {
        text.trim().parse().ok()
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Real(r) => Some(*r),
            Variant::Integer(i) => Some(*i as f64),
            Variant::String(s) => Self::from_text(s),
            _ => None,
        }
    }
}

impl FromArgument for PathBuf {
    const TYPE_NAME: &'static str = "path";

    fn from_text(text: &str) -> Option<Self> {
        (!text.is_empty()).then(|| PathBuf::from(text))
    }
}

impl FromArgument for Duration {
    const TYPE_NAME: &'static str = "duration";

    /// Accepts `250ms`, `30s`, `2m`, `1h` and bare seconds.
    fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let value: f64 = number.parse().ok()?;
        let seconds = match unit.trim() {
            "" | "s" => value,
            "ms" => value / 1000.0,
            "m" | "min" => value * 60.0,
            "h" => value * 3600.0,
            _ => return None,
        };
        Duration::try_from_secs_f64(seconds).ok()
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Integer(i) => u64::try_from(*i).ok().map(Duration::from_secs),
            Variant::Real(r) => Duration::try_from_secs_f64(*r).ok(),
            Variant::String(s) => Self::from_text(s),
            _ => None,
        }
    }
}

impl FromArgument for Locale {
    const TYPE_NAME: &'static str = "locale";

    fn from_text(text: &str) -> Option<Self> {
        text.parse().ok()
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::Locale(l) => Some(l.clone()),
            Variant::String(s) => Self::from_text(s),
            _ => None,
        }
    }
}

impl FromArgument for NaiveDateTime {
    const TYPE_NAME: &'static str = "datetime";

    fn from_text(text: &str) -> Option<Self> {
        crate::util::parse_date(text)
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        match value {
            Variant::DateTime(d) => Some(*d),
            Variant::String(s) => Self::from_text(s),
            _ => None,
        }
    }
}

impl<T: FromArgument> FromArgument for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_text(text: &str) -> Option<Self> {
        if text.is_empty() {
            return Some(None);
        }
        T::from_text(text).map(Some)
    }

    fn from_variant(value: &Variant) -> Option<Self> {
        T::from_variant(value).map(Some)
    }
}

/// A configuration type with a declarative field table.
pub trait Config: Default + Clone + Send + Sync + 'static {
    fn fields() -> Vec<Field<Self>>;

    /// Post-bind hook, run once after every field is applied.
    fn adjust(&mut self) {}
}

type Apply<C> = Box<dyn Fn(&mut C, &Arguments, &str) -> Result<()>>;

/// One entry of a configuration schema.
pub struct Field<C> {
    tag: &'static str,
    apply: Apply<C>,
}

impl<C: Config> Field<C> {
    /// Scalar field read from `<prefix><tag>`.
    pub fn value<T: FromArgument>(tag: &'static str, accessor: fn(&mut C) -> &mut T) -> Self {
        Self {
            tag,
            apply: Box::new(move |config: &mut C, args: &Arguments, prefix: &str| -> Result<()> {
                let key = format!("{prefix}{tag}");
                if let Some(arg) = args.get(&key) {
                    *accessor(config) = convert::<T>(arg, &key)?;
                }
                Ok(())
            }),
        }
    }

    /// Nested configuration sharing the same prefix.
    pub fn nested<N: Config>(accessor: fn(&mut C) -> &mut N) -> Self {
        Self {
            tag: "",
            apply: Box::new(move |config: &mut C, args: &Arguments, prefix: &str| -> Result<()> {
                bind_into(accessor(config), args, prefix)
            }),
        }
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }
}

/// Builds a `C` from `args`.
///
/// `<prefix>self` holding a `C` object wins outright. Otherwise, including
/// when that key holds something else, the defaults are overlaid with every
/// `<prefix><tag>` present and [`Config::adjust`] runs once.
pub fn bind<C: Config>(args: &Arguments, prefix: &str) -> Result<C> {
    let self_key = format!("{prefix}{SELF_KEY}");
    match args.get(&self_key) {
        Some(Argument::Object(obj)) => {
            if let Some(config) = obj.downcast_ref::<C>() {
                return Ok(config.clone());
            }
            debug!(
                "{self_key} is not a {}, binding fields",
                std::any::type_name::<C>()
            );
        }
        Some(other) => debug!("{self_key} holds {}, binding fields", other.describe()),
        None => {}
    }
    let mut config = C::default();
    bind_into(&mut config, args, prefix)?;
    Ok(config)
}

fn bind_into<C: Config>(config: &mut C, args: &Arguments, prefix: &str) -> Result<()> {
    for field in C::fields() {
        (field.apply)(config, args, prefix)?;
    }
    config.adjust();
    Ok(())
}
