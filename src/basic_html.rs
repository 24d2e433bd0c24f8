//! Last-chance extractor: classifies the chunk by sniffed content type and,
//! for HTML, falls back to `<title>` and `<meta name="description">`.

use scraper::{Html, Selector};

use crate::charset::decode_html;
use crate::sniff::detect_content_type;
use crate::types::{Metadata, PageChunk};

pub fn parse(chunk: &PageChunk) -> Metadata {
    let sniffed = detect_content_type(&chunk.data);
    let mut meta = Metadata {
        url_type: sniffed.to_string(),
        ..Metadata::default()
    };
    if sniffed.starts_with("image/") {
        meta.url_type = "image".to_string();
        meta.image = chunk.final_url.to_string();
    } else if sniffed.starts_with("text/") {
        meta.url_type = "website".to_string();
        let text = decode_html(&chunk.data, &chunk.content_type);
        let document = Html::parse_document(&text);
        if let Some(title) = find_title(&document) {
            meta.title = title;
        }
        if let Some(description) = find_description(&document) {
            meta.description = description;
        }
    } else if sniffed.starts_with("video/") {
        meta.url_type = "video".to_string();
    }
    meta
}

fn find_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").expect("title selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .filter(|t| !t.is_empty())
}

fn find_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("meta[name][content]").expect("description selector");
    document
        .select(&selector)
        .find(|el| {
            el.value()
                .attr("name")
                .is_some_and(|n| n.eq_ignore_ascii_case("description"))
        })
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string)
}
