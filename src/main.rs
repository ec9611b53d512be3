//! folio - e-book format converter

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use folio::{Arguments, Book, Chapter, Registry, attributes};

#[derive(Parser)]
#[command(name = "folio")]
#[command(version, about = "E-book format converter", long_about = None)]
#[command(after_help = "EXAMPLES:
    folio book.mobi book.epub                 Convert MOBI to EPUB
    folio novel.txt novel.mobi -D txt.parse.encoding=GBK
    folio -i book.epub                        Show book metadata
    folio -i --json book.mobi                 Metadata and chapters as JSON")]
struct Cli {
    /// Input file (MOBI, EPUB or TXT)
    #[arg(value_name = "INPUT")]
    input: String,

    /// Output file
    #[arg(value_name = "OUTPUT", required_unless_present = "info")]
    output: Option<String>,

    /// Input format, instead of the input extension
    #[arg(short, long, value_name = "FORMAT")]
    from: Option<String>,

    /// Output format, instead of the output extension
    #[arg(short, long, value_name = "FORMAT")]
    to: Option<String>,

    /// Codec option, e.g. mobi.make.record_size=8192
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    define: Vec<String>,

    /// Show book metadata and chapters without converting
    #[arg(short, long)]
    info: bool,

    /// Print --info output as JSON
    #[arg(long, requires = "info")]
    json: bool,

    /// Suppress output messages
    #[arg(short, long)]
    quiet: bool,

    /// Log to stderr; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Sends library log records to stderr. `-v` picks the level, otherwise
/// `RUST_LOG` does, otherwise nothing is printed.
fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .try_init();
    if let Err(e) = installed {
        eprintln!("warning: logging disabled: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> folio::Result<()> {
    let registry = Registry::builtin();
    let mut args = Arguments::new();
    for pair in &cli.define {
        args.parse_pair(pair)?;
    }

    if cli.info {
        let mut book = registry.parse_path(&cli.input, cli.from.as_deref(), &args)?;
        if cli.json {
            print_json(&book)?;
        } else {
            print_info(&cli.input, &book);
        }
        book.close()?;
        return Ok(());
    }

    let Some(output) = &cli.output else {
        return Err(folio::Error::InvalidArgument("no output file".into()));
    };
    registry.convert(
        &cli.input,
        output,
        cli.from.as_deref(),
        cli.to.as_deref(),
        &args,
    )?;
    if !cli.quiet {
        println!(
            "Converted {} -> {}",
            Path::new(&cli.input).display(),
            Path::new(output).display()
        );
    }
    Ok(())
}

fn print_info(path: &str, book: &Book) {
    println!("File: {path}");
    println!("Title: {}", book.title());
    let authors = book.authors();
    if !authors.is_empty() {
        println!("Authors: {}", authors.join(", "));
    }
    if let Some(language) = book.language() {
        println!("Language: {language}");
    }
    for (label, name) in [
        ("Publisher", attributes::PUBLISHER),
        ("ISBN", attributes::ISBN),
        ("Date", attributes::PUBDATE),
    ] {
        if let Some(value) = book.get_string(name) {
            println!("{label}: {value}");
        }
    }
    if let Some(intro) = book.intro().and_then(|t| t.text().ok()) {
        let intro = intro.trim();
        match intro.char_indices().nth(200) {
            Some((cut, _)) => println!("Description: {}...", &intro[..cut]),
            None => println!("Description: {intro}"),
        }
    }
    if let Some(cover) = book.cover() {
        println!("Cover: {} ({})", cover.name(), cover.mime());
    }
    println!("Chapters: {}", book.count());
    for (depth, chapter) in book.walk() {
        println!("{}{}", "  ".repeat(depth), chapter.title());
    }
}

#[derive(Serialize)]
struct BookInfo {
    title: String,
    authors: Vec<String>,
    language: Option<String>,
    publisher: Option<String>,
    isbn: Option<String>,
    pubdate: Option<String>,
    cover: Option<String>,
    chapters: Vec<ChapterInfo>,
}

#[derive(Serialize)]
struct ChapterInfo {
    title: String,
    has_text: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<ChapterInfo>,
}

impl From<&Chapter> for ChapterInfo {
    fn from(chapter: &Chapter) -> Self {
        Self {
            title: chapter.title(),
            has_text: chapter.text.is_some(),
            children: chapter.children.iter().map(ChapterInfo::from).collect(),
        }
    }
}

fn print_json(book: &Book) -> folio::Result<()> {
    let info = BookInfo {
        title: book.title(),
        authors: book.authors(),
        language: book.language().map(|l| l.to_string()),
        publisher: book.get_string(attributes::PUBLISHER),
        isbn: book.get_string(attributes::ISBN),
        pubdate: book.get_string(attributes::PUBDATE),
        cover: book.cover().map(|c| c.name().to_string()),
        chapters: book.children.iter().map(ChapterInfo::from).collect(),
    };
    let json = serde_json::to_string_pretty(&info)
        .map_err(|e| folio::Error::InvalidArgument(e.to_string()))?;
    println!("{json}");
    Ok(())
}
