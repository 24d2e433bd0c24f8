use scraper::{Html, Selector};

use crate::charset::decode_html;

/// Finds the first `<link rel="icon" href="…">` in an HTML chunk and returns
/// its href. The `rel` value must equal `icon` (any case); other icon-ish
/// rels like `apple-touch-icon` are ignored.
pub fn extract_link(data: &[u8], content_type: &str) -> Option<String> {
    let text = decode_html(data, content_type);
    let document = Html::parse_document(&text);
    let selector = Selector::parse("link[rel][href]").expect("link selector");
    document
        .select(&selector)
        .find(|el| {
            el.value()
                .attr("rel")
                .is_some_and(|rel| rel.eq_ignore_ascii_case("icon"))
        })
        .and_then(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}
