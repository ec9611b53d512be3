//! Small helpers shared by the codecs.

use std::borrow::Cow;

use log::warn;
use quick_xml::Reader;
use quick_xml::events::Event;

/// Get current time as seconds since Unix epoch.
pub fn time_now_secs() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Decode bytes to a string.
///
/// UTF-8 is tried first (BOM-aware), then the hint encoding (for example
/// from `<?xml encoding="..."?>`), then Windows-1252, which is what most
/// old e-books without a declaration turn out to be.
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);

    if !malformed {
        return result;
    }

    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Extract the encoding name from an XML declaration in the first 100 bytes.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];

    let xml_start = memchr::memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let value_end = after_enc[1..].iter().position(|&b| b == quote)? + 1;

    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Extract local name from a potentially namespaced XML name.
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Parses the date forms found in e-book metadata: full timestamps,
/// `YYYY-MM-DD`, `YYYY-MM` and bare years.
pub fn parse_date(s: &str) -> Option<chrono::NaiveDateTime> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime};

    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01-01"), "%Y-%m-%d"))
        .ok()?;
    date.and_hms_opt(0, 0, 0)
}

/// Formats a date as `YYYY-MM-DD`, the form EPUB and MOBI metadata expect.
pub fn format_date(dt: &chrono::NaiveDateTime) -> String {
    dt.format("%Y-%m-%d").to_string()
}

/// Inner markup of the `<body>` element, or the whole input when it is a
/// fragment.
pub fn html_body(html: &str) -> &str {
    let lower = html.to_ascii_lowercase();
    let Some(open) = lower.find("<body") else {
        return html;
    };
    let Some(start) = lower[open..].find('>').map(|i| open + i + 1) else {
        return html;
    };
    let end = lower.rfind("</body").filter(|&e| e >= start).unwrap_or(html.len());
    &html[start..end]
}

/// Text content of an HTML fragment. Block ends become newlines; script
/// and style bodies are dropped.
pub fn strip_tags(html: &str) -> String {
    let mut reader = Reader::from_str(html);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut out = String::with_capacity(html.len());
    let mut hidden = 0usize;
    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                warn!("Markup error at byte {}: {e}", reader.error_position());
                break;
            }
        };
        match event {
            Event::Start(e) if is_hidden(e.name().as_ref()) => hidden += 1,
            Event::End(e) if is_hidden(e.name().as_ref()) => hidden = hidden.saturating_sub(1),
            Event::Start(e) | Event::Empty(e) => block_break(&mut out, e.name().as_ref()),
            Event::End(e) => block_break(&mut out, e.name().as_ref()),
            Event::Text(e) if hidden == 0 => out.push_str(&String::from_utf8_lossy(e.as_ref())),
            Event::CData(e) if hidden == 0 => out.push_str(&String::from_utf8_lossy(&e)),
            Event::GeneralRef(e) if hidden == 0 => match resolve_reference(e.as_ref()) {
                Some(c) => out.push(c),
                None => {
                    out.push('&');
                    out.push_str(&String::from_utf8_lossy(e.as_ref()));
                    out.push(';');
                }
            },
            Event::Eof => break,
            _ => {}
        }
    }
    out
}

fn is_hidden(name: &[u8]) -> bool {
    let name = local_name(name);
    name.eq_ignore_ascii_case(b"script") || name.eq_ignore_ascii_case(b"style")
}

fn block_break(out: &mut String, name: &[u8]) {
    const BLOCKS: [&[u8]; 10] = [b"p", b"br", b"div", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"li"];
    let name = local_name(name);
    if BLOCKS.iter().any(|b| name.eq_ignore_ascii_case(b)) && !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}

/// Character of a named or numeric character reference.
pub fn resolve_reference(name: &[u8]) -> Option<char> {
    let name = std::str::from_utf8(name).ok()?;
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code);
    }
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => None,
    }
}
