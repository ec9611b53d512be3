use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use folio::content::{CacheTag, Flob, Text, TextCache, VirtualArchive, ZipStore};
use folio::io::{ByteSource, ByteSourceCursor, FileSource, MemorySource, ReaderSource};
use folio::{Error, Result};
use tempfile::NamedTempFile;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

const PAYLOAD: &[u8] = b"The same bytes, wherever they live.";

fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Archive serving entries from a fixed list.
struct ListArchive(Vec<(String, Vec<u8>)>);

impl VirtualArchive for ListArchive {
    fn contains(&self, entry: &str) -> bool {
        self.0.iter().any(|(n, _)| n == entry)
    }

    fn open_entry(&self, entry: &str) -> Result<Box<dyn Read + Send>> {
        self.0
            .iter()
            .find(|(n, _)| n == entry)
            .map(|(_, d)| Box::new(Cursor::new(d.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| Error::NotFound(entry.to_string()))
    }
}

#[test]
fn test_read_all_is_repeatable_for_every_backing() {
    let mut file = NamedTempFile::with_suffix(".bin").unwrap();
    file.write_all(PAYLOAD).unwrap();
    file.flush().unwrap();

    let zip_source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(zip_with(&[(
        "dir/payload.bin",
        PAYLOAD,
    )])));
    let store = Arc::new(ZipStore::open(zip_source).unwrap());

    let mut padded = b"xxxx".to_vec();
    padded.extend_from_slice(PAYLOAD);
    padded.extend_from_slice(b"yyyy");
    let block_source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(padded));

    let archive: Arc<dyn VirtualArchive> = Arc::new(ListArchive(vec![(
        "payload.bin".to_string(),
        PAYLOAD.to_vec(),
    )]));

    let data_url = format!(
        "data:application/octet-stream;base64,{}",
        base64_encode(PAYLOAD)
    );
    let file_url = format!("file://{}", file.path().display());

    let flobs = [
        Flob::file(file.path()).unwrap(),
        Flob::zip_entry(&store, "dir/payload.bin").unwrap(),
        Flob::archive_entry(archive, "payload.bin").unwrap(),
        Flob::block(block_source, 4, PAYLOAD.len() as u64).unwrap(),
        Flob::bytes("payload.bin", PAYLOAD.to_vec()),
        Flob::url(&data_url).unwrap(),
        Flob::url(&file_url).unwrap(),
    ];
    for flob in &flobs {
        let first = flob.read_all().unwrap();
        let second = flob.read_all().unwrap();
        assert_eq!(first, PAYLOAD, "{flob:?}");
        assert_eq!(first, second, "{flob:?}");

        let mut sink = Vec::new();
        assert_eq!(flob.write_to(&mut sink).unwrap(), PAYLOAD.len() as u64);
        assert_eq!(sink, PAYLOAD);
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

#[test]
fn test_missing_members() {
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(zip_with(&[("a.txt", b"a")])));
    let store = Arc::new(ZipStore::open(source).unwrap());
    assert!(store.contains("a.txt"));
    assert!(matches!(
        Flob::zip_entry(&store, "b.txt"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        Flob::file("/definitely/not/here.bin"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_percent_encoded_member_names() {
    let source: Arc<dyn ByteSource> =
        Arc::new(MemorySource::new(zip_with(&[("text/chapter one.xhtml", b"<p/>")])));
    let store = Arc::new(ZipStore::open(source).unwrap());
    let flob = Flob::zip_entry(&store, "text/chapter%20one.xhtml").unwrap();
    assert_eq!(flob.read_all().unwrap(), b"<p/>");
}

#[test]
fn test_text_over_file_in_legacy_encoding() {
    let mut file = NamedTempFile::new().unwrap();
    // "café" in windows-1252
    file.write_all(&[b'c', b'a', b'f', 0xE9]).unwrap();
    file.flush().unwrap();

    let flob = Flob::file(file.path()).unwrap();
    let text = Text::from_flob("menu", Text::PLAIN, flob, "windows-1252").unwrap();
    assert_eq!(text.text().unwrap(), "café");
    assert_eq!(text.text().unwrap(), "café");
    assert_eq!(text.encoding().name(), "windows-1252");
}

#[test]
fn test_unknown_encoding_is_rejected_up_front() {
    let flob = Flob::bytes("x", b"x".to_vec());
    let err = Text::from_flob("x", Text::PLAIN, flob, "utf-99").unwrap_err();
    assert!(matches!(err, Error::UnsupportedEncoding(_)));
}

#[test]
fn test_cached_texts_share_one_store() {
    let cache = TextCache::new();
    let tag: CacheTag = cache.append("cached body");
    let a = Text::cached("a", Text::PLAIN, &cache, tag);
    let b = a.renamed("b", Text::HTML);
    assert_eq!(a.text().unwrap(), "cached body");
    assert_eq!(b.text().unwrap(), "cached body");
    assert!(b.is_html());
}

#[test]
fn test_sources_agree() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(PAYLOAD).unwrap();
    file.flush().unwrap();

    let sources: Vec<Box<dyn ByteSource>> = vec![
        Box::new(FileSource::open(file.path()).unwrap()),
        Box::new(MemorySource::new(PAYLOAD.to_vec())),
        Box::new(ReaderSource::new(Cursor::new(PAYLOAD.to_vec())).unwrap()),
    ];
    for source in &sources {
        assert_eq!(source.len(), PAYLOAD.len() as u64);
        assert_eq!(source.read_at(4, 4).unwrap(), &PAYLOAD[4..8]);
        assert!(source.read_at(PAYLOAD.len() as u64 - 2, 4).is_err());
    }
}

#[test]
fn test_cursor_window() {
    let source: Arc<dyn ByteSource> = Arc::new(MemorySource::new(PAYLOAD.to_vec()));
    let mut window = ByteSourceCursor::window(source, 4, 4);
    let mut out = String::new();
    window.read_to_string(&mut out).unwrap();
    assert_eq!(out, "same");
}
