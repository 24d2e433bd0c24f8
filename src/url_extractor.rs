use comrak::nodes::{AstNode, NodeValue};
use comrak::{parse_document, Arena, Options};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Matches sequences of characters described by RFC 3986 with an http:// or
/// https:// prefix. The character class is a superset of RFC 3986 allowing
/// some commonly seen characters like {}.
static RE_URLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:https?)://[%:/?#\[\]@!$&'(){}*+,;=\p{L}\p{N}._~-]+").expect("url regex")
});

const TRAILING_PUNCT: &[char] = &['[', ']', '(', ')', '<', '>', '{', '}', ',', ';', '.', '*', '_'];

/// Extracts unique url-like (http/https scheme only) substrings from plain
/// text in first-occurrence order. Results may not be proper URLs since only
/// sequences of matched characters are searched for. Trailing punctuation is
/// removed, but a trailing `)`, `]`, `>` or `}` survives when the matching
/// opener appears inside the URL.
pub fn parse_urls(content: &str, max_items: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in RE_URLS.find_iter(content) {
        let cleaned = trim_trailing_punct(m.as_str());
        let cleaned = normalize_url(cleaned);
        if !out.iter().any(|seen| *seen == cleaned) {
            out.push(cleaned);
            if out.len() == max_items {
                break;
            }
        }
    }
    out
}

fn trim_trailing_punct(s: &str) -> &str {
    if !s.contains(TRAILING_PUNCT) {
        return s;
    }
    let mut s = s;
    while let Some(last) = s.chars().last() {
        if !TRAILING_PUNCT.contains(&last) {
            break;
        }
        let opener = match last {
            ')' => Some('('),
            ']' => Some('['),
            '>' => Some('<'),
            '}' => Some('{'),
            _ => None,
        };
        if let Some(op) = opener {
            if s[..s.len() - 1].contains(op) {
                break;
            }
        }
        s = &s[..s.len() - 1];
    }
    s
}

/// Extracts URLs from markdown-formatted text in context-aware mode: bare
/// URLs are auto-linked, while inline code and code blocks are skipped.
/// Only URLs passing [`valid_url`] are returned.
pub fn parse_markdown_urls(content: &str, max_items: usize) -> Vec<String> {
    let mut options = Options::default();
    options.extension.autolink = true;
    let arena = Arena::new();
    let root = parse_document(&arena, content, &options);

    let mut out: Vec<String> = Vec::new();
    collect_links(root, &mut out, max_items);
    out
}

fn collect_links<'a>(node: &'a AstNode<'a>, out: &mut Vec<String>, max_items: usize) {
    if out.len() == max_items {
        return;
    }
    match &node.data.borrow().value {
        NodeValue::Link(link) => {
            if valid_url(&link.url) {
                let normalized = normalize_url(&link.url);
                if !out.iter().any(|seen| *seen == normalized) {
                    out.push(normalized);
                }
            }
            return;
        }
        // Only descend into nodes that can carry human-visible links; this
        // leaves inline code, code blocks and embedded HTML alone.
        NodeValue::Document
        | NodeValue::Paragraph
        | NodeValue::Text(_)
        | NodeValue::BlockQuote
        | NodeValue::List(_)
        | NodeValue::Item(_)
        | NodeValue::Strong
        | NodeValue::Emph => {}
        _ => return,
    }
    for child in node.children() {
        collect_links(child, out, max_items);
    }
}

/// Returns true if `s` is a valid absolute URL with an http/https scheme,
/// a non-empty host and a query part restricted to the characters RFC 3986
/// section 3.4 allows.
///
/// The query check runs against the raw input because URL parsing silently
/// percent-encodes offending bytes like spaces.
pub fn valid_url(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let Ok(u) = Url::parse(s) else {
        return false;
    };
    if !matches!(u.scheme(), "http" | "https") {
        return false;
    }
    if u.host_str().map_or(true, str::is_empty) {
        return false;
    }
    let before_fragment = s.split('#').next().unwrap_or(s);
    if let Some(pos) = before_fragment.find('?') {
        for b in before_fragment[pos + 1..].bytes() {
            // query = *( pchar / "/" / "?" ), with
            // pchar = unreserved / pct-encoded / sub-delims / ":" / "@"
            match b {
                b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z' => {}
                b'/' | b'?' | b':' | b'@' | b'-' | b'.' | b'_' | b'~' | b'%' | b'!' | b'$'
                | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b',' | b';' | b'=' => {}
                _ => return false,
            }
        }
    }
    true
}

/// Query parameters that only exist for click tracking; stripping them makes
/// cache keys stable across shares of the same page.
const TRACKING_PREFIXES: &[&str] = &["utm_", "pf_rd_"];
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref_"];

/// Removes known tracking query parameters from http(s) URLs. Anything that
/// fails to parse, or uses another scheme, is returned unchanged.
pub fn normalize_url(s: &str) -> String {
    let Ok(mut u) = Url::parse(s) else {
        return s.to_string();
    };
    if !matches!(u.scheme(), "http" | "https") {
        return s.to_string();
    }
    let Some(query) = u.query() else {
        return s.to_string();
    };
    let kept: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| {
            !TRACKING_PARAMS.contains(&k.as_ref())
                && !TRACKING_PREFIXES.iter().any(|p| k.starts_with(p))
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.len() == url::form_urlencoded::parse(query.as_bytes()).count() {
        return s.to_string();
    }
    if kept.is_empty() {
        u.set_query(None);
    } else {
        u.query_pairs_mut().clear().extend_pairs(kept).finish();
    }
    u.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_urls_handles_rfc3986_characters() {
        let text = r#"This text contains various urls mixed with different reserved per rfc3986 characters:
	http://google.com, https://doist.com/#about (also see https://todoist.com), <http://example.com/foo>,
	**[markdown](http://daringfireball.net/projects/markdown/)**,
	http://marvel-movies.wikia.com/wiki/The_Avengers_(film), https://pt.wikipedia.org/wiki/Mamão.
	https://docs.live.net/foo/?section-id={D7CEDACE-AEFB-4B61-9C63-BDE05EEBD80A},
	http://example.com/?param=foo;bar
	HTTPS://EXAMPLE.COM/UPPERCASE
	hTtP://example.com/mixedCase
	"#;
        let want = vec![
            "http://google.com",
            "https://doist.com/#about",
            "https://todoist.com",
            "http://example.com/foo",
            "http://daringfireball.net/projects/markdown/",
            "http://marvel-movies.wikia.com/wiki/The_Avengers_(film)",
            "https://pt.wikipedia.org/wiki/Mamão",
            "https://docs.live.net/foo/?section-id={D7CEDACE-AEFB-4B61-9C63-BDE05EEBD80A}",
            "http://example.com/?param=foo;bar",
            "HTTPS://EXAMPLE.COM/UPPERCASE",
            "hTtP://example.com/mixedCase",
        ];
        assert_eq!(parse_urls(text, usize::MAX), want);
    }

    #[test]
    fn parse_urls_deduplicates_in_order() {
        let got = parse_urls(
            "Only two unique urls should be extracted from this text: \
             http://google.com, http://twitter.com, http://google.com",
            usize::MAX,
        );
        assert_eq!(got, vec!["http://google.com", "http://twitter.com"]);
    }

    #[test]
    fn parse_urls_caps_results() {
        let got = parse_urls("http://a.example http://b.example http://c.example", 2);
        assert_eq!(got, vec!["http://a.example", "http://b.example"]);
    }

    #[test]
    fn parse_urls_keeps_escaped_paths() {
        let got = parse_urls(
            "Bug report http://f.cl.ly/items/000V0N1B31283s3O350q/Screen%20Shot%202015-12-22%20at%2014.49.28.png",
            usize::MAX,
        );
        assert_eq!(
            got,
            vec!["http://f.cl.ly/items/000V0N1B31283s3O350q/Screen%20Shot%202015-12-22%20at%2014.49.28.png"]
        );
    }

    #[test]
    fn trailing_paren_kept_only_with_matching_opener() {
        assert_eq!(
            parse_urls("see http://en.wikipedia.org/wiki/Rust_(film), ok", usize::MAX),
            vec!["http://en.wikipedia.org/wiki/Rust_(film)"]
        );
        assert_eq!(
            parse_urls("see (http://example.com/plain), ok", usize::MAX),
            vec!["http://example.com/plain"]
        );
    }

    #[test]
    fn valid_url_cases() {
        let cases = [
            ("https://example.com/path?multi+word+escaped+query", true),
            ("https://example.com/path?unescaped query", false),
            ("ftp://example.com/unsupported/scheme", false),
            ("", false),
            ("https://example.com/path", true),
            ("https:///path", false),
        ];
        for (input, want) in cases {
            assert_eq!(valid_url(input), want, "valid_url({input:?})");
        }
    }

    #[test]
    fn markdown_skips_code_spans_and_blocks() {
        let text = "Implicit url: http://example.com/1, [explicit url](http://example.com/2).\n\
                    \n\
                    This url should be skipped `http://example.com/3`, as well as the one inside code block:\n\
                    \n\
                    \tpreformatted text block with url: http://example.com/4\n\
                    \n\
                    Another paragraph with implicit link http://example.com/5.\n";
        let got = parse_markdown_urls(text, 10);
        assert_eq!(
            got,
            vec![
                "http://example.com/1",
                "http://example.com/2",
                "http://example.com/5",
            ]
        );
    }

    #[test]
    fn markdown_respects_max_items() {
        let got = parse_markdown_urls("http://example.com/1 and http://example.com/2", 1);
        assert_eq!(got, vec!["http://example.com/1"]);
    }

    #[test]
    fn normalize_url_strips_tracking_params() {
        let cases = [
            (
                "https://example.com/page?utm_source=twitter&utm_medium=social",
                "https://example.com/page",
            ),
            (
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            ),
            (
                "https://example.com/page?utm_source=twitter&id=42",
                "https://example.com/page?id=42",
            ),
            (
                "https://www.imdb.com/title/tt1234567/",
                "https://www.imdb.com/title/tt1234567/",
            ),
            (
                "https://example.com/page?utm_source=x&fbclid=y&gclid=z",
                "https://example.com/page",
            ),
            (
                "https://www.imdb.com/title/tt1234567/?ref_=nv_sr_srsg_0&pf_rd_m=abc",
                "https://www.imdb.com/title/tt1234567/",
            ),
            (
                "https://example.com/article?fbclid=abc123&page=2",
                "https://example.com/article?page=2",
            ),
            (
                "ftp://example.com/file?utm_source=x",
                "ftp://example.com/file?utm_source=x",
            ),
            ("not a url at all", "not a url at all"),
        ];
        for (input, want) in cases {
            assert_eq!(normalize_url(input), want, "normalize_url({input:?})");
        }
    }
}
