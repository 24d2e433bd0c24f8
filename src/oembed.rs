//! oEmbed support (<https://oembed.com>): lookup-by-URL against the embedded
//! providers table, `<link>`-based endpoint discovery inside fetched chunks,
//! and payload decoding with the field hygiene the format calls for.

use once_cell::sync::Lazy;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::charset::decode_html;
use crate::error::UnfurlError;
use crate::fetcher::Fetcher;
use crate::types::Metadata;

/// Providers list in the oembed.com JSON format, embedded at build time.
static PROVIDERS_JSON: &[u8] = include_bytes!("../data/providers.json");

static PROVIDERS: Lazy<ProviderIndex> = Lazy::new(|| {
    ProviderIndex::from_json(PROVIDERS_JSON).expect("embedded providers table must parse")
});

/// The compiled default provider table.
pub fn default_providers() -> &'static ProviderIndex {
    &PROVIDERS
}

/// Compiled provider table: each entry matches one (scheme, host glob, path
/// glob) pattern and knows the endpoint to query.
#[derive(Debug, Clone)]
pub struct ProviderIndex {
    entries: Vec<Endpoint>,
}

#[derive(Debug, Clone)]
struct Endpoint {
    https: bool,
    host: String,
    path: String,
    endpoint: Url,
}

#[derive(Deserialize)]
struct RawProvider {
    #[serde(default)]
    endpoints: Vec<RawEndpoint>,
}

#[derive(Deserialize)]
struct RawEndpoint {
    #[serde(default)]
    url: String,
    #[serde(default)]
    schemes: Vec<String>,
}

impl ProviderIndex {
    /// Compiles a providers document. Entries with unusable URL patterns are
    /// skipped; a document that fails to parse at all is a startup error.
    pub fn from_json(data: &[u8]) -> Result<Self, UnfurlError> {
        let raw: Vec<RawProvider> = serde_json::from_slice(data)
            .map_err(|e| UnfurlError::Config(format!("providers table: {e}")))?;
        let mut entries = Vec::new();
        for provider in raw {
            for ep in provider.endpoints {
                if ep.url.is_empty() || ep.schemes.is_empty() {
                    continue;
                }
                let Ok(endpoint) = Url::parse(&ep.url.replace("{format}", "json")) else {
                    continue;
                };
                for scheme in &ep.schemes {
                    let Some((https, host, path)) = split_pattern(scheme) else {
                        continue;
                    };
                    if !valid_host_pattern(host) {
                        continue;
                    }
                    entries.push(Endpoint {
                        https,
                        host: host.to_string(),
                        path: path.to_string(),
                        endpoint: endpoint.clone(),
                    });
                }
            }
        }
        Ok(ProviderIndex { entries })
    }

    /// Matches `url_str` against the table; on a hit returns the provider
    /// endpoint with `url=<input>` appended.
    pub fn lookup(&self, url_str: &str) -> Option<String> {
        let u = Url::parse(url_str).ok()?;
        if !matches!(u.scheme(), "http" | "https") {
            return None;
        }
        let host = u.host_str()?;
        let dotted = format!(".{host}");
        for entry in &self.entries {
            if (u.scheme() == "https") != entry.https {
                continue;
            }
            // *.domain.com should also match bare domain.com
            if !(wild_match(&entry.host, host) || wild_match(&entry.host, &dotted)) {
                continue;
            }
            if !wild_match(&entry.path, u.path()) {
                continue;
            }
            let mut endpoint = entry.endpoint.clone();
            endpoint.query_pairs_mut().append_pair("url", url_str);
            return Some(endpoint.to_string());
        }
        None
    }
}

/// Splits a provider scheme pattern like `https://*.youtube.com/watch*` into
/// scheme flag, host pattern and path pattern. Query parts of patterns are
/// ignored, as lookups only match on host and path.
fn split_pattern(pattern: &str) -> Option<(bool, &str, &str)> {
    let (https, rest) = if let Some(rest) = pattern.strip_prefix("https://") {
        (true, rest)
    } else if let Some(rest) = pattern.strip_prefix("http://") {
        (false, rest)
    } else {
        return None;
    };
    let (host, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let path = path.split('?').next().unwrap_or("");
    if host.is_empty() {
        return None;
    }
    Some((https, host, path))
}

/// Host patterns may carry a single `*`, only as a leading `*.` subdomain
/// wildcard, and the remainder must span at least two labels.
fn valid_host_pattern(host: &str) -> bool {
    match host.find('*') {
        None => true,
        Some(idx) => {
            idx == 0
                && host.rfind('*') == Some(0)
                && host[1..].starts_with('.')
                && host.matches('.').count() >= 2
        }
    }
}

/// Glob match where `*` spans any run of bytes, including none.
fn wild_match(pattern: &str, input: &str) -> bool {
    let p = pattern.as_bytes();
    let s = input.as_bytes();
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while si < s.len() {
        if pi < p.len() && (p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, si));
            pi += 1;
        } else if let Some((star_pi, star_si)) = star {
            pi = star_pi + 1;
            si = star_si + 1;
            star = Some((star_pi, star_si + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Scans an HTML chunk for an oEmbed discovery link
/// (`<link type="application/json+oembed" href="…">`).
pub fn discover(data: &[u8], content_type: &str) -> Option<String> {
    let text = decode_html(data, content_type);
    let document = Html::parse_document(&text);
    let selector = Selector::parse("link[type][href]").expect("discovery selector");
    document
        .select(&selector)
        .find(|el| {
            matches!(
                el.value().attr("type"),
                Some("application/json+oembed") | Some("text/xml+oembed")
            )
        })
        .and_then(|el| el.value().attr("href"))
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

/// Fetches an oEmbed endpoint and decodes the payload. Requires a 200
/// response with a JSON or XML content type.
pub async fn fetch(fetcher: &Fetcher, endpoint: &str) -> Result<Metadata, UnfurlError> {
    let u = Url::parse(endpoint)?;
    let resp = fetcher.get(&u).await?;
    if resp.status() != StatusCode::OK {
        return Err(UnfurlError::BadStatus {
            status: resp.status(),
            final_url: Box::new(resp.url().clone()),
        });
    }
    let ct = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body = resp.text().await?;
    if ct == "application/json" || ct.starts_with("application/json;") {
        from_json(&body)
    } else if ct == "text/xml" || ct.starts_with("text/xml;") {
        from_xml(&body)
    } else {
        Err(UnfurlError::InvalidContentType(ct))
    }
}

pub fn from_json(body: &str) -> Result<Metadata, UnfurlError> {
    let raw: RawPayload =
        serde_json::from_str(body).map_err(|e| UnfurlError::Extract(format!("oembed json: {e}")))?;
    normalize(raw)
}

pub fn from_xml(body: &str) -> Result<Metadata, UnfurlError> {
    let raw: RawPayload =
        quick_xml::de::from_str(body).map_err(|e| UnfurlError::Extract(format!("oembed xml: {e}")))?;
    normalize(raw)
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    provider_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnail_url: String,
    #[serde(default)]
    thumbnail_width: u32,
    #[serde(default)]
    thumbnail_height: u32,
    #[serde(default)]
    html: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

/// Applies the payload hygiene rules: only the four standard types are
/// accepted, URLs must be http(s) with a host, and dimensions only count
/// when the thing they measure is present.
fn normalize(raw: RawPayload) -> Result<Metadata, UnfurlError> {
    let kind = raw.kind.to_lowercase();
    if !matches!(kind.as_str(), "photo" | "video" | "link" | "rich") {
        return Err(UnfurlError::Extract(format!(
            "unsupported oembed type {kind:?}"
        )));
    }
    let thumbnail = Some(raw.thumbnail_url)
        .filter(|u| supported_url(u))
        .unwrap_or_default();
    let mut meta = Metadata {
        title: raw.title,
        url_type: kind.clone(),
        site_name: raw.provider_name,
        ..Metadata::default()
    };
    match kind.as_str() {
        "photo" => {
            let photo = Some(raw.url).filter(|u| supported_url(u)).unwrap_or_default();
            if !photo.is_empty() && raw.width > 0 && raw.height > 0 {
                meta.image_width = raw.width;
                meta.image_height = raw.height;
            }
            meta.image = photo;
        }
        "video" | "rich" => {
            meta.html = raw.html;
        }
        _ => {}
    }
    if meta.image.is_empty() && !thumbnail.is_empty() {
        if raw.thumbnail_width > 0 && raw.thumbnail_height > 0 {
            meta.image_width = raw.thumbnail_width;
            meta.image_height = raw.thumbnail_height;
        }
        meta.image = thumbnail;
    }
    Ok(meta)
}

fn supported_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(u) => {
            matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wildcard_matching() {
        assert!(wild_match("*.youtube.com", "www.youtube.com"));
        assert!(wild_match("*.youtube.com", ".youtube.com"));
        assert!(!wild_match("*.youtube.com", "youtube.org"));
        assert!(wild_match("/watch*", "/watch"));
        assert!(wild_match("/watch*", "/watch/v/abc"));
        assert!(wild_match("/r/*/comments/*/*", "/r/rust/comments/abc/title"));
        assert!(!wild_match("/r/*/comments/*/*", "/r/rust/about"));
    }

    #[test]
    fn host_pattern_validation() {
        assert!(valid_host_pattern("youtu.be"));
        assert!(valid_host_pattern("*.youtube.com"));
        assert!(!valid_host_pattern("*.com"));
        assert!(!valid_host_pattern("www.*.com"));
        assert!(!valid_host_pattern("*youtube.com"));
        assert!(!valid_host_pattern("*.*.com"));
    }

    #[test]
    fn lookup_matches_known_providers() {
        let index = default_providers();
        let endpoint = index
            .lookup("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .expect("youtube should match");
        assert!(endpoint.starts_with("https://www.youtube.com/oembed?url="));
        assert!(endpoint.contains("dQw4w9WgXcQ"));

        // *.youtube.com also matches the bare domain
        assert!(index.lookup("https://youtube.com/watch?v=x").is_some());
        assert!(index.lookup("https://youtu.be/dQw4w9WgXcQ").is_some());
        assert!(index.lookup("https://vimeo.com/1234567").is_some());

        assert!(index.lookup("https://example.com/watch?v=x").is_none());
        // scheme flag must match
        assert!(index.lookup("http://vimeo.com/1234567").is_none());
        assert!(index.lookup("ftp://vimeo.com/1234567").is_none());
    }

    #[test]
    fn discovery_finds_json_and_xml_links() {
        let body = br#"<html><head>
            <link rel="alternate" type="application/json+oembed"
                  href="https://example.com/oembed?url=x&format=json">
        </head><body></body></html>"#;
        assert_eq!(
            discover(body, "text/html"),
            Some("https://example.com/oembed?url=x&format=json".to_string())
        );

        let xml_body = br#"<html><head>
            <link rel="alternate" type="text/xml+oembed" href="https://example.com/oembed.xml">
        </head></html>"#;
        assert_eq!(
            discover(xml_body, "text/html"),
            Some("https://example.com/oembed.xml".to_string())
        );

        assert_eq!(discover(b"<html><head></head></html>", "text/html"), None);
    }

    #[test]
    fn photo_payloads_use_the_payload_url() {
        let meta = from_json(
            r#"{"type":"photo","title":"Sunset","url":"https://img.example/sunset.jpg",
                "width":1024,"height":768,"provider_name":"Imgs"}"#,
        )
        .unwrap();
        assert_eq!(meta.url_type, "photo");
        assert_eq!(meta.image, "https://img.example/sunset.jpg");
        assert_eq!((meta.image_width, meta.image_height), (1024, 768));
        assert_eq!(meta.site_name, "Imgs");
    }

    #[test]
    fn video_payloads_keep_html_and_thumbnail() {
        let meta = from_json(
            r#"{"type":"video","title":"Clip","html":"<iframe src='x'></iframe>",
                "thumbnail_url":"https://i.example/t.jpg","thumbnail_width":480,
                "thumbnail_height":360}"#,
        )
        .unwrap();
        assert_eq!(meta.url_type, "video");
        assert_eq!(meta.html, "<iframe src='x'></iframe>");
        assert_eq!(meta.image, "https://i.example/t.jpg");
        assert_eq!((meta.image_width, meta.image_height), (480, 360));
    }

    #[test]
    fn dimensions_require_their_counterpart() {
        // thumbnail missing: its dimensions must not leak through
        let meta = from_json(
            r#"{"type":"video","title":"Clip","html":"<i/>","thumbnail_url":"notaurl",
                "thumbnail_width":480,"thumbnail_height":360}"#,
        )
        .unwrap();
        assert_eq!(meta.image, "");
        assert_eq!((meta.image_width, meta.image_height), (0, 0));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        assert!(from_json(r#"{"type":"audio","title":"x"}"#).is_err());
        assert!(from_json(r#"{"title":"typeless"}"#).is_err());
        assert!(from_json(r#"{"type":"link","title":"plain link"}"#).is_ok());
    }

    #[test]
    fn xml_payloads_decode() {
        let meta = from_xml(
            "<oembed><type>video</type><title>Clip</title><html>&lt;iframe/&gt;</html></oembed>",
        )
        .unwrap();
        assert_eq!(meta.url_type, "video");
        assert_eq!(meta.title, "Clip");
        assert_eq!(meta.html, "<iframe/>");
    }
}
