//! Charset detection and decoding for fetched HTML chunks.
//!
//! The strongest hint is the `charset` parameter of the HTTP Content-Type
//! header; after that a WHATWG-style scan of the first kilobyte looks for
//! a `<meta charset=…>` declaration. Valid UTF-8 passes through untouched
//! and windows-1252 is the last-resort fallback.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// WHATWG prescan window for in-document charset declarations.
const META_SCAN_LEN: usize = 1024;

static RE_META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?([a-zA-Z0-9._:-]+)"#).expect("charset regex")
});

/// Decodes an HTML chunk to UTF-8 text, honoring the Content-Type header
/// first, then a `<meta charset>` found in the first kilobyte. Undecodable
/// byte sequences are replaced rather than failing: a truncated chunk must
/// still parse.
pub fn decode_html(data: &[u8], content_type: &str) -> String {
    if let Some(enc) = header_charset(content_type) {
        let (text, _, _) = enc.decode(data);
        return text.into_owned();
    }
    if let Some((enc, bom_len)) = Encoding::for_bom(data) {
        let (text, _) = enc.decode_without_bom_handling(&data[bom_len..]);
        return text.into_owned();
    }
    if let Some(enc) = meta_charset(data) {
        let (text, _, _) = enc.decode(data);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(data) {
        return text.to_string();
    }
    let (text, _, _) = WINDOWS_1252.decode(data);
    text.into_owned()
}

/// Charset named by the Content-Type header parameter, if any.
fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    let lowered = content_type.to_ascii_lowercase();
    let rest = lowered.split_once("charset=")?.1;
    let label = rest
        .trim_start_matches(['"', '\''])
        .split([';', '"', '\'', ' '])
        .next()?;
    Encoding::for_label(label.trim().as_bytes())
}

/// Charset declared by a `<meta>` element within the prescan window.
fn meta_charset(data: &[u8]) -> Option<&'static Encoding> {
    let window = &data[..data.len().min(META_SCAN_LEN)];
    let captures = RE_META_CHARSET.captures(window)?;
    let enc = Encoding::for_label(&captures[1])?;
    // UTF-16 content cannot declare itself in ASCII-compatible bytes;
    // WHATWG maps such labels to UTF-8.
    if enc == encoding_rs::UTF_16BE || enc == encoding_rs::UTF_16LE {
        return Some(UTF_8);
    }
    Some(enc)
}
