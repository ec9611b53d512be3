//! Benchmarks for the conversion pipeline.
//!
//! Run with: cargo bench

use std::hint::black_box;
use std::io::Cursor;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};

use folio::codec::{Arguments, Maker, Parser};
use folio::epub::EpubMaker;
use folio::mobi::{MobiMaker, MobiParser, palmdoc};
use folio::txt::TxtParser;
use folio::{Book, ByteSource, Chapter, MemorySource, Text};

const PARAGRAPH: &str = "It was a bright cold day in April, and the clocks were striking \
                         thirteen. The hallway smelt of boiled cabbage and old rag mats.";

fn chapter_body(n: usize) -> String {
    (0..40)
        .map(|i| format!("<p>{n}.{i} {PARAGRAPH}</p>\n"))
        .collect()
}

/// A book of 30 chapters, every third one with two sections.
fn generated_book() -> Book {
    let mut book = Book::new();
    book.set_title("Benchmark").unwrap();
    book.set_authors(&["A. Writer"]).unwrap();
    for n in 0..30 {
        let mut chapter = Chapter::new(&format!("Chapter {}", n + 1))
            .with_text(Text::inline(format!("c{n}"), Text::HTML, &chapter_body(n)));
        if n % 3 == 0 {
            for s in 0..2 {
                chapter.push(
                    Chapter::new(&format!("Section {}.{}", n + 1, s + 1))
                        .with_text(Text::inline(format!("s{n}.{s}"), Text::HTML, &chapter_body(s))),
                );
            }
        }
        book.push(chapter);
    }
    book
}

fn make_bytes(maker: &dyn Maker, book: &Book) -> Vec<u8> {
    let mut output = Cursor::new(Vec::new());
    maker.encode(book, &mut output, &Arguments::new()).unwrap();
    output.into_inner()
}

fn source(bytes: &[u8]) -> Arc<dyn ByteSource> {
    Arc::new(MemorySource::new(bytes.to_vec()))
}

// ============================================================================
// PalmDOC
// ============================================================================

fn bench_palmdoc(c: &mut Criterion) {
    let block: Vec<u8> = chapter_body(0).into_bytes().into_iter().take(4096).collect();
    let compressed = palmdoc::compress(&block);

    c.bench_function("palmdoc_compress", |b| {
        b.iter(|| palmdoc::compress(black_box(&block)));
    });
    c.bench_function("palmdoc_decompress", |b| {
        b.iter(|| palmdoc::decompress(black_box(&compressed)).unwrap());
    });
}

// ============================================================================
// Book I/O
// ============================================================================

fn bench_make_mobi(c: &mut Criterion) {
    let book = generated_book();
    c.bench_function("make_mobi", |b| b.iter(|| make_bytes(&MobiMaker, &book)));
}

fn bench_parse_mobi(c: &mut Criterion) {
    let bytes = make_bytes(&MobiMaker, &generated_book());
    let args = Arguments::new();

    c.bench_function("parse_mobi", |b| {
        b.iter(|| MobiParser.decode(source(&bytes), &args).unwrap());
    });
    c.bench_function("parse_mobi_read_text", |b| {
        b.iter(|| {
            let book = MobiParser.decode(source(&bytes), &args).unwrap();
            for (_, chapter) in book.walk() {
                if let Some(text) = &chapter.text {
                    black_box(text.text().unwrap());
                }
            }
        });
    });
}

fn bench_make_epub(c: &mut Criterion) {
    let book = generated_book();
    c.bench_function("make_epub", |b| b.iter(|| make_bytes(&EpubMaker, &book)));
}

fn bench_parse_txt(c: &mut Criterion) {
    let mut text = String::from("Benchmark\nAuthor: A. Writer\n\n");
    for n in 0..200 {
        text.push_str(&format!("Chapter {}\n", n + 1));
        for _ in 0..20 {
            text.push_str(PARAGRAPH);
            text.push('\n');
        }
    }
    let args = Arguments::new();

    c.bench_function("parse_txt", |b| {
        b.iter(|| TxtParser.decode(source(text.as_bytes()), &args).unwrap());
    });
}

criterion_group!(
    benches,
    bench_palmdoc,
    bench_make_mobi,
    bench_parse_mobi,
    bench_make_epub,
    bench_parse_txt,
);
criterion_main!(benches);
