//! Open Graph extractor (<http://ogp.me/>). Collects title, description,
//! type, site name and the first image.

use scraper::{Html, Selector};

use crate::charset::decode_html;
use crate::fetcher::host_ends_with;
use crate::sniff::detect_content_type;
use crate::types::{Metadata, PageChunk};

/// Parses Open Graph properties out of an HTML chunk. Returns `None` unless
/// the sniffed content is HTML and a non-empty `og:title` is present.
pub fn parse(chunk: &PageChunk) -> Option<Metadata> {
    if detect_content_type(&chunk.data) != "text/html" {
        return None;
    }
    let text = decode_html(&chunk.data, &chunk.content_type);
    let document = Html::parse_document(&text);
    let selector = Selector::parse("meta[property][content]").expect("og selector");

    let mut meta = Metadata::default();
    let mut user_generated_image = false;
    for element in document.select(&selector) {
        let (Some(property), Some(content)) =
            (element.value().attr("property"), element.value().attr("content"))
        else {
            continue;
        };
        match property {
            "og:title" if meta.title.is_empty() => meta.title = content.to_string(),
            "og:description" if meta.description.is_empty() => {
                meta.description = content.to_string()
            }
            "og:type" if meta.url_type.is_empty() => meta.url_type = content.to_string(),
            "og:site_name" if meta.site_name.is_empty() => meta.site_name = content.to_string(),
            "og:image" | "og:image:url" if meta.image.is_empty() => {
                meta.image = content.to_string()
            }
            "og:image:user_generated" if content == "true" => user_generated_image = true,
            _ => {}
        }
    }
    if meta.title.is_empty() {
        return None;
    }

    // Tweet pages advertise a generic account banner unless the card image
    // was attached by the tweet author.
    if host_ends_with(&chunk.final_url, "twitter.com")
        && chunk.final_url.path().contains("/status/")
        && !user_generated_image
    {
        meta.image = String::new();
    }

    Some(meta)
}
