use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use log::info;

use super::{Arguments, Maker, Parser};
use crate::book::Book;
use crate::error::{Error, Result};

/// A format's parser and/or maker under a canonical name and aliases.
#[derive(Clone)]
pub struct Codec {
    pub name: String,
    pub aliases: Vec<String>,
    pub parser: Option<Arc<dyn Parser>>,
    pub maker: Option<Arc<dyn Maker>>,
}

impl Codec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            parser: None,
            maker: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn parser(mut self, parser: impl Parser + 'static) -> Self {
        self.parser = Some(Arc::new(parser));
        self
    }

    pub fn maker(mut self, maker: impl Maker + 'static) -> Self {
        self.maker = Some(Arc::new(maker));
        self
    }
}

/// Case-insensitive lookup of codecs by name, alias or file extension.
#[derive(Clone, Default)]
pub struct Registry {
    codecs: Vec<Codec>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the formats shipped in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let codecs = [
            Codec::new("txt")
                .alias("text")
                .parser(crate::txt::TxtParser)
                .maker(crate::txt::TxtMaker),
            Codec::new("epub")
                .parser(crate::epub::EpubParser)
                .maker(crate::epub::EpubMaker),
            Codec::new("mobi")
                .alias("azw")
                .alias("prc")
                .alias("pdb")
                .parser(crate::mobi::MobiParser)
                .maker(crate::mobi::MobiMaker),
        ];
        for codec in codecs {
            // Built-in names are distinct.
            let _ = registry.register(codec);
        }
        registry
    }

    /// Adds a codec. Fails if its name or an alias is already taken.
    pub fn register(&mut self, codec: Codec) -> Result<()> {
        let keys: Vec<String> = std::iter::once(&codec.name)
            .chain(codec.aliases.iter())
            .map(|k| k.to_ascii_lowercase())
            .collect();
        if let Some(taken) = keys.iter().find(|k| self.index.contains_key(*k)) {
            return Err(Error::InvalidArgument(format!(
                "format name '{taken}' is already registered"
            )));
        }
        let slot = self.codecs.len();
        for key in keys {
            self.index.insert(key, slot);
        }
        self.codecs.push(codec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Codec> {
        self.index
            .get(&name.to_ascii_lowercase())
            .map(|&i| &self.codecs[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.codecs.iter().map(|c| c.name.as_str())
    }

    pub fn parser(&self, name: &str) -> Result<Arc<dyn Parser>> {
        self.get(name)
            .and_then(|c| c.parser.clone())
            .ok_or_else(|| Error::UnsupportedFormat(format!("no parser for '{name}'")))
    }

    pub fn maker(&self, name: &str) -> Result<Arc<dyn Maker>> {
        self.get(name)
            .and_then(|c| c.maker.clone())
            .ok_or_else(|| Error::UnsupportedFormat(format!("no maker for '{name}'")))
    }

    /// Canonical format name for the extension of `path`.
    pub fn format_for_path(&self, path: &Path) -> Result<String> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy())
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("{} has no extension", path.display()))
            })?;
        self.get(&ext)
            .map(|c| c.name.clone())
            .ok_or_else(|| Error::UnsupportedFormat(ext.to_string()))
    }

    /// Parses `path` with `format`, or the format named by its extension.
    pub fn parse_path(
        &self,
        path: impl AsRef<Path>,
        format: Option<&str>,
        args: &Arguments,
    ) -> Result<Book> {
        let path = path.as_ref();
        let format = match format {
            Some(f) => f.to_string(),
            None => self.format_for_path(path)?,
        };
        self.parser(&format)?.parse(path, args)
    }

    pub fn make_path(
        &self,
        book: &Book,
        path: impl AsRef<Path>,
        format: Option<&str>,
        args: &Arguments,
    ) -> Result<()> {
        let path = path.as_ref();
        let format = match format {
            Some(f) => f.to_string(),
            None => self.format_for_path(path)?,
        };
        self.maker(&format)?.make(book, path, args)
    }

    /// Parses `input` and writes it to `output`.
    pub fn convert(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        from: Option<&str>,
        to: Option<&str>,
        args: &Arguments,
    ) -> Result<()> {
        let (input, output) = (input.as_ref(), output.as_ref());
        info!("Converting {} to {}", input.display(), output.display());
        let mut book = self.parse_path(input, from, args)?;
        self.make_path(&book, output, to, args)?;
        book.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::builtin();
        assert_eq!(registry.get("EPUB").unwrap().name, "epub");
        assert_eq!(registry.get("Azw").unwrap().name, "mobi");
        assert!(registry.parser("mobi").is_ok());
    }

    #[test]
    fn test_unknown_format() {
        let registry = Registry::builtin();
        assert!(matches!(
            registry.parser("docx"),
            Err(Error::UnsupportedFormat(_))
        ));
        assert!(matches!(
            registry.format_for_path(Path::new("a.docx")),
            Err(Error::UnsupportedFormat(_))
        ));
        assert_eq!(
            registry.format_for_path(Path::new("dir/Book.PRC")).unwrap(),
            "mobi"
        );
    }

    #[test]
    fn test_duplicate_alias_rejected() {
        let mut registry = Registry::builtin();
        let err = registry.register(Codec::new("kindle").alias("AZW")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(registry.get("kindle").is_none());
    }
}
