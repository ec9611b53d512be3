//! PalmDOC LZ77 block codec.
//!
//! Each compressed byte is one of:
//! - `0x00`, `0x09..=0x7F`: the byte itself
//! - `0x01..=0x08`: that many following bytes, copied verbatim
//! - `0x80..=0xBF` + one byte: a back-reference, 11 bits of distance and
//!   3 bits of length (3..=10)
//! - `0xC0..=0xFF`: a space followed by `byte ^ 0x80`

use log::trace;
use memchr::memmem;

use crate::error::{Error, Result};

const MAX_DISTANCE: usize = 2047;
const MIN_MATCH: usize = 3;
const MAX_MATCH: usize = 10;

/// Decompresses one block. A back-reference reaching before the start of
/// the output or a truncated escape is `MalformedArchive("palmdoc")`.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut bytes = input.iter().copied();

    while let Some(c) = bytes.next() {
        match c {
            0x01..=0x08 => {
                for _ in 0..c {
                    let b = bytes.next().ok_or_else(|| Error::malformed("palmdoc"))?;
                    out.push(b);
                }
            }
            0x00 | 0x09..=0x7F => out.push(c),
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(c ^ 0x80);
            }
            _ => {
                let low = bytes.next().ok_or_else(|| Error::malformed("palmdoc"))?;
                let pair = u16::from_be_bytes([c, low]);
                let distance = usize::from((pair & 0x3FFF) >> 3);
                let length = usize::from(pair & 7) + MIN_MATCH;
                if distance == 0 || distance > out.len() {
                    return Err(Error::malformed("palmdoc"));
                }
                // Source and destination may overlap, so copy byte by byte.
                let start = out.len() - distance;
                for k in 0..length {
                    let b = out[start + k];
                    out.push(b);
                }
            }
        }
    }

    trace!("PalmDOC block {} -> {} bytes", input.len(), out.len());
    Ok(out)
}

/// Compresses one block with a greedy longest-match search over the
/// preceding 2047 bytes.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if let Some((distance, length)) = longest_match(input, i) {
            let packed = ((distance << 3) | (length - MIN_MATCH)) as u16;
            let [hi, lo] = packed.to_be_bytes();
            out.push(0x80 | hi);
            out.push(lo);
            i += length;
            continue;
        }

        let c = input[i];
        if c == b' '
            && let Some(&next) = input.get(i + 1)
            && (0x40..=0x7F).contains(&next)
        {
            out.push(next ^ 0x80);
            i += 2;
            continue;
        }

        if is_literal(c) {
            out.push(c);
            i += 1;
            continue;
        }

        let run = input[i..]
            .iter()
            .take(8)
            .take_while(|&&b| !is_literal(b))
            .count();
        out.push(run as u8);
        out.extend_from_slice(&input[i..i + run]);
        i += run;
    }

    out
}

fn is_literal(b: u8) -> bool {
    b == 0 || (0x09..0x80).contains(&b)
}

fn longest_match(input: &[u8], pos: usize) -> Option<(usize, usize)> {
    let remaining = input.len() - pos;
    if pos < MIN_MATCH || remaining < MIN_MATCH {
        return None;
    }
    let window_start = pos.saturating_sub(MAX_DISTANCE);
    let window = &input[window_start..pos];

    (MIN_MATCH..=MAX_MATCH.min(remaining)).rev().find_map(|len| {
        let found = memmem::rfind(window, &input[pos..pos + len])?;
        Some((pos - (window_start + found), len))
    })
}
