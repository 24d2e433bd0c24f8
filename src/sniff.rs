//! Content-type sniffing over the first bytes of a response body, used to
//! decide which extractor may run against a chunk regardless of what the
//! server claimed in its headers.

const SNIFF_LEN: usize = 512;

/// Detects the content type of `data` by inspecting at most its first 512
/// bytes, following the WHATWG mime-sniffing signatures for the types the
/// extractors care about. Falls back to `text/plain` for anything that looks
/// textual and `application/octet-stream` otherwise.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];

    let trimmed = trim_leading_ws(data);
    for tag in HTML_TAGS {
        if matches_html_tag(trimmed, tag) {
            return "text/html";
        }
    }

    if data.starts_with(b"%PDF-") {
        return "application/pdf";
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return "image/gif";
    }
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png";
    }
    if data.starts_with(b"\xff\xd8\xff") {
        return "image/jpeg";
    }
    if data.len() >= 14 && &data[..4] == b"RIFF" && &data[8..14] == b"WEBPVP" {
        return "image/webp";
    }
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return "video/mp4";
    }
    if data.starts_with(b"\x1a\x45\xdf\xa3") {
        return "video/webm";
    }
    if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"AVI " {
        return "video/avi";
    }

    if looks_binary(data) {
        return "application/octet-stream";
    }
    "text/plain"
}

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

fn trim_leading_ws(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// Case-insensitive tag match that must be terminated by a space or `>`,
/// so `<BR>` does not shadow `<B>`-prefixed words in plain text.
fn matches_html_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() < tag.len() + 1 {
        return false;
    }
    if !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn looks_binary(data: &[u8]) -> bool {
    data.iter()
        .any(|&b| b <= 0x08 || b == 0x0b || (0x0e..=0x1a).contains(&b) || (0x1c..=0x1f).contains(&b))
}
