//! Record 0: the PalmDOC header, the MOBI header and EXTH metadata.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use log::debug;

use super::pdb::{be_u16, be_u32};
use crate::error::{Error, Result};

pub const NULL_INDEX: u32 = 0xFFFF_FFFF;

/// Offset of the `MOBI` magic inside record 0.
pub const MOBI_OFFSET: usize = 16;

const HUFF_CDIC: u16 = 17480;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    PalmDoc,
}

#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub compression: Compression,
    pub text_length: u32,
    pub text_record_count: u16,
    pub record_size: u16,
    /// Zero when record 0 carries no `MOBI` header (plain PalmDOC).
    pub header_length: u32,
    pub mobi_type: u32,
    pub code_page: u32,
    pub version: u32,
    pub full_name: Option<String>,
    pub locale: u32,
    pub first_image_index: u32,
    pub exth_flags: u32,
    pub extra_data_flags: u16,
    pub ncx_index: u32,
}

impl MobiHeader {
    pub fn parse(record0: &[u8]) -> Result<Self> {
        if record0.len() < MOBI_OFFSET {
            return Err(Error::malformed("record0"));
        }

        let compression = match be_u16(record0, 0) {
            1 => Compression::None,
            2 => Compression::PalmDoc,
            HUFF_CDIC => {
                return Err(Error::UnsupportedFormat(
                    "HUFF/CDIC compressed text".to_string(),
                ));
            }
            n => return Err(Error::UnsupportedFormat(format!("compression type {n}"))),
        };
        let encryption = be_u16(record0, 12);
        if encryption != 0 {
            return Err(Error::UnsupportedFormat(format!(
                "encrypted book (scheme {encryption})"
            )));
        }

        let mut header = Self {
            compression,
            text_length: be_u32(record0, 4),
            text_record_count: be_u16(record0, 8),
            record_size: be_u16(record0, 10),
            header_length: 0,
            mobi_type: 0,
            code_page: 1252,
            version: 1,
            full_name: None,
            locale: 0,
            first_image_index: NULL_INDEX,
            exth_flags: 0,
            extra_data_flags: 0,
            ncx_index: NULL_INDEX,
        };

        if record0.len() < MOBI_OFFSET + 8 || &record0[16..20] != b"MOBI" {
            debug!("Record 0 has no MOBI header");
            return Ok(header);
        }

        let header_length = be_u32(record0, 20);
        let end = MOBI_OFFSET + header_length as usize;
        if end > record0.len() {
            return Err(Error::malformed("header-length"));
        }
        header.header_length = header_length;

        // A field is only read when the declared header covers it.
        let field = |at: usize| (at + 4 <= end).then(|| be_u32(record0, at));

        header.mobi_type = field(24).unwrap_or(0);
        header.code_page = field(28).unwrap_or(1252);
        header.version = field(36).unwrap_or(1);
        if header.version == 8 {
            return Err(Error::UnsupportedFormat("KF8 (MOBI version 8)".to_string()));
        }
        if !(1..=7).contains(&header.version) {
            return Err(Error::UnsupportedFormat(format!(
                "MOBI version {}",
                header.version
            )));
        }

        if let (Some(offset), Some(len)) = (field(0x54), field(0x58)) {
            let (offset, len) = (offset as usize, len as usize);
            let name = record0
                .get(offset..offset.saturating_add(len))
                .ok_or_else(|| Error::malformed("full-name"))?;
            header.full_name = Some(header.encoding()?.decode(name).0.into_owned());
        }

        header.locale = field(0x5C).unwrap_or(0);
        header.first_image_index = field(0x6C).unwrap_or(NULL_INDEX);
        header.exth_flags = field(0x80).unwrap_or(0);
        header.extra_data_flags = field(0xF0).map(|v| v as u16).unwrap_or(0);
        header.ncx_index = field(0xF4).unwrap_or(NULL_INDEX);

        debug!(
            "MOBI header: version {} code page {} {} text records of {} bytes",
            header.version, header.code_page, header.text_record_count, header.record_size
        );
        Ok(header)
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }

    /// Offset of the EXTH block inside record 0.
    pub fn exth_offset(&self) -> usize {
        MOBI_OFFSET + self.header_length as usize
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        match self.code_page {
            65001 => Ok(UTF_8),
            1252 => Ok(WINDOWS_1252),
            n => Err(Error::UnsupportedEncoding(format!("code page {n}"))),
        }
    }
}

/// Values of the EXTH records this crate understands.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Exth {
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub subjects: Vec<String>,
    pub published: Option<String>,
    pub contributor: Option<String>,
    pub rights: Option<String>,
    pub source: Option<String>,
    pub asin: Option<String>,
    pub cover_offset: Option<u32>,
    pub thumbnail_offset: Option<u32>,
    pub updated_title: Option<String>,
    pub language: Option<String>,
}

impl Exth {
    pub fn parse(data: &[u8], encoding: &'static Encoding) -> Result<Self> {
        if data.len() < 12 || &data[..4] != b"EXTH" {
            return Err(Error::malformed("exth-header"));
        }
        let count = be_u32(data, 8);
        let text = |bytes: &[u8]| encoding.decode(bytes).0.trim().to_string();
        let index = |bytes: &[u8]| -> Option<u32> {
            let v = (bytes.len() >= 4).then(|| be_u32(bytes, 0))?;
            (v != NULL_INDEX).then_some(v)
        };

        let mut exth = Self::default();
        let mut pos = 12;
        for _ in 0..count {
            if pos + 8 > data.len() {
                return Err(Error::malformed("exth-length"));
            }
            let kind = be_u32(data, pos);
            let len = be_u32(data, pos + 4) as usize;
            if len < 8 || pos + len > data.len() {
                return Err(Error::malformed("exth-length"));
            }
            let payload = &data[pos + 8..pos + len];
            pos += len;

            match kind {
                100 => exth.authors.push(text(payload)),
                101 => exth.publisher = Some(text(payload)),
                103 => exth.description = Some(text(payload)),
                104 => exth.isbn = Some(text(payload)),
                105 => exth.subjects.extend(
                    text(payload)
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                106 => exth.published = Some(text(payload)),
                108 => exth.contributor = Some(text(payload)),
                109 => exth.rights = Some(text(payload)),
                112 => exth.source = Some(text(payload)),
                113 => exth.asin = Some(text(payload)),
                201 => exth.cover_offset = index(payload),
                202 => exth.thumbnail_offset = index(payload),
                503 => exth.updated_title = Some(text(payload)),
                524 => exth.language = Some(text(payload)),
                other => debug!("Skipping EXTH record {other} ({} bytes)", payload.len()),
            }
        }
        exth.authors.retain(|a| !a.is_empty());
        Ok(exth)
    }
}

/// Serializes `(type, payload)` pairs as an EXTH block padded to 4 bytes.
pub fn encode_exth(records: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(records.len() as u32).to_be_bytes());
    for (kind, payload) in records {
        body.extend_from_slice(&kind.to_be_bytes());
        body.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        body.extend_from_slice(payload);
    }
    let padding = (4 - body.len() % 4) % 4;
    body.resize(body.len() + padding, 0);

    let mut exth = Vec::with_capacity(8 + body.len());
    exth.extend_from_slice(b"EXTH");
    exth.extend_from_slice(&(8 + body.len() as u32).to_be_bytes());
    exth.extend_from_slice(&body);
    exth
}

const LANGUAGES: &[(u32, &str)] = &[
    (0x04, "zh"),
    (0x07, "de"),
    (0x09, "en"),
    (0x0A, "es"),
    (0x0C, "fr"),
    (0x10, "it"),
    (0x11, "ja"),
    (0x12, "ko"),
    (0x13, "nl"),
    (0x15, "pl"),
    (0x16, "pt"),
    (0x19, "ru"),
    (0x1D, "sv"),
];

/// Language tag for the low byte of a MOBI locale field.
pub fn language_tag(locale: u32) -> Option<&'static str> {
    let code = locale & 0xFF;
    LANGUAGES.iter().find(|(c, _)| *c == code).map(|(_, t)| *t)
}

pub fn locale_code(language: &str) -> u32 {
    LANGUAGES
        .iter()
        .find(|(_, t)| *t == language)
        .map(|(c, _)| *c)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record0(compression: u16, mobi: Option<&[(usize, u32)]>) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        data[0..2].copy_from_slice(&compression.to_be_bytes());
        data[8..10].copy_from_slice(&3u16.to_be_bytes());
        data[10..12].copy_from_slice(&4096u16.to_be_bytes());
        if let Some(fields) = mobi {
            data.resize(16 + 0xE8, 0);
            data[16..20].copy_from_slice(b"MOBI");
            data[20..24].copy_from_slice(&0xE8u32.to_be_bytes());
            data[36..40].copy_from_slice(&6u32.to_be_bytes());
            for &(at, value) in fields {
                data[at..at + 4].copy_from_slice(&value.to_be_bytes());
            }
        }
        data
    }

    #[test]
    fn test_plain_palmdoc_header() {
        let header = MobiHeader::parse(&record0(2, None)).unwrap();
        assert_eq!(header.compression, Compression::PalmDoc);
        assert_eq!(header.text_record_count, 3);
        assert_eq!(header.record_size, 4096);
        assert_eq!(header.header_length, 0);
        assert_eq!(header.ncx_index, NULL_INDEX);
    }

    #[test]
    fn test_mobi_fields() {
        let data = record0(1, Some(&[(28, 65001), (0x6C, 7), (0x80, 0x50), (0xF4, 9)]));
        let header = MobiHeader::parse(&data).unwrap();
        assert_eq!(header.compression, Compression::None);
        assert_eq!(header.encoding().unwrap(), UTF_8);
        assert_eq!(header.first_image_index, 7);
        assert!(header.has_exth());
        assert_eq!(header.ncx_index, 9);
        assert_eq!(header.exth_offset(), 16 + 0xE8);
    }

    #[test]
    fn test_huffman_is_unsupported() {
        let err = MobiHeader::parse(&record0(HUFF_CDIC, None)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn test_kf8_is_unsupported() {
        let data = record0(2, Some(&[(36, 8)]));
        assert!(matches!(
            MobiHeader::parse(&data),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_encryption_is_unsupported() {
        let mut data = record0(2, None);
        data[12..14].copy_from_slice(&2u16.to_be_bytes());
        assert!(matches!(
            MobiHeader::parse(&data),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_header_length_past_record() {
        let mut data = record0(2, Some(&[]));
        data[20..24].copy_from_slice(&0x400u32.to_be_bytes());
        let err = MobiHeader::parse(&data).unwrap_err();
        assert_eq!(err.cause(), Some("header-length"));
    }

    #[test]
    fn test_exth_accumulates_authors_and_skips_unknown() {
        let exth = encode_exth(&[
            (100, b"Ann".to_vec()),
            (999, b"whatever".to_vec()),
            (100, b"Bo".to_vec()),
            (201, 2u32.to_be_bytes().to_vec()),
            (503, b"Title".to_vec()),
        ]);
        let parsed = Exth::parse(&exth, UTF_8).unwrap();
        assert_eq!(parsed.authors, ["Ann", "Bo"]);
        assert_eq!(parsed.cover_offset, Some(2));
        assert_eq!(parsed.updated_title.as_deref(), Some("Title"));
    }

    #[test]
    fn test_exth_bad_record_length() {
        let mut exth = encode_exth(&[(100, b"Ann".to_vec())]);
        // Declared length below the 8-byte record header.
        exth[16..20].copy_from_slice(&4u32.to_be_bytes());
        let err = Exth::parse(&exth, UTF_8).unwrap_err();
        assert_eq!(err.cause(), Some("exth-length"));
    }

    #[test]
    fn test_exth_null_cover_is_absent() {
        let exth = encode_exth(&[(201, NULL_INDEX.to_be_bytes().to_vec())]);
        assert_eq!(Exth::parse(&exth, UTF_8).unwrap().cover_offset, None);
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(language_tag(0x0409), Some("en"));
        assert_eq!(locale_code("fr"), 0x0C);
        assert_eq!(language_tag(0xFE), None);
    }
}
