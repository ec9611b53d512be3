//! Well-known attribute names and their value kinds.

use crate::variant::VariantKind;

pub const TITLE: &str = "title";
/// Authors joined with [`AUTHOR_SEPARATOR`].
pub const AUTHOR: &str = "author";
pub const INTRO: &str = "intro";
pub const COVER: &str = "cover";
pub const DATE: &str = "date";
pub const PUBDATE: &str = "pubdate";
pub const PUBLISHER: &str = "publisher";
pub const ISBN: &str = "isbn";
pub const LANGUAGE: &str = "language";
pub const KEYWORDS: &str = "keywords";
pub const GENRE: &str = "genre";
pub const RIGHTS: &str = "rights";
pub const VENDOR: &str = "vendor";
pub const STATE: &str = "state";
pub const WORDS: &str = "words";

pub const AUTHOR_SEPARATOR: &str = ";";

const KNOWN: &[(&str, VariantKind)] = &[
    (TITLE, VariantKind::String),
    (AUTHOR, VariantKind::String),
    (INTRO, VariantKind::Text),
    (COVER, VariantKind::Blob),
    (DATE, VariantKind::DateTime),
    (PUBDATE, VariantKind::DateTime),
    (PUBLISHER, VariantKind::String),
    (ISBN, VariantKind::String),
    (LANGUAGE, VariantKind::Locale),
    (KEYWORDS, VariantKind::String),
    (GENRE, VariantKind::String),
    (RIGHTS, VariantKind::String),
    (VENDOR, VariantKind::String),
    (STATE, VariantKind::String),
    (WORDS, VariantKind::Integer),
];

/// Kind of a well-known attribute, `None` for anything else.
pub fn known_kind(name: &str) -> Option<VariantKind> {
    KNOWN.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

pub fn known_names() -> impl Iterator<Item = &'static str> {
    KNOWN.iter().map(|(n, _)| *n)
}

/// Splits a joined author value, dropping blanks.
pub fn split_authors(value: &str) -> Vec<String> {
    value
        .split(AUTHOR_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn join_authors<S: AsRef<str>>(authors: &[S]) -> String {
    authors
        .iter()
        .map(|a| a.as_ref().trim())
        .filter(|a| !a.is_empty())
        .collect::<Vec<_>>()
        .join(AUTHOR_SEPARATOR)
}
