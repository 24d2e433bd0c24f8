use serde::{Deserialize, Serialize};
use url::Url;

/// Preview record returned to the client, one per extracted URL.
///
/// `url` always holds the original input URL (not the redirected final URL);
/// every other field is omitted from the JSON encoding when empty. Once the
/// per-URL worker finishes, the record is immutable and safe to share.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preview {
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub favicon: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub image_width: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub image_height: u32,

    /// Position of the URL in the input text; used to reassemble the
    /// response in input order. Never serialized.
    #[serde(skip)]
    pub(crate) idx: usize,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Preview {
    pub fn new(url: impl Into<String>) -> Self {
        Preview {
            url: url.into(),
            ..Preview::default()
        }
    }

    /// True when no extractor produced anything worth caching.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
            && self.title.is_empty()
            && self.url_type.is_empty()
            && self.description.is_empty()
            && self.image.is_empty()
    }

    /// True when the record carries only the input URL. A bare shared result
    /// signals the single-flight waiters that the originator was canceled
    /// before the pipeline could run.
    pub(crate) fn is_bare(&self) -> bool {
        self.title.is_empty()
            && self.url_type.is_empty()
            && self.description.is_empty()
            && self.html.is_empty()
            && self.site_name.is_empty()
            && self.favicon.is_empty()
            && self.image.is_empty()
            && self.image_width == 0
            && self.image_height == 0
    }

    /// Collapses whitespace runs in the title to single ASCII spaces.
    pub(crate) fn normalize(&mut self) {
        if self.title.contains(char::is_whitespace) {
            self.title = self.title.split_whitespace().collect::<Vec<_>>().join(" ");
        }
    }

    /// Fills empty fields from `other`, keeping existing values.
    pub(crate) fn merge(&mut self, other: Metadata) {
        if self.title.is_empty() {
            self.title = other.title;
        }
        if self.url_type.is_empty() {
            self.url_type = other.url_type;
        }
        if self.description.is_empty() {
            self.description = other.description;
        }
        if self.html.is_empty() {
            self.html = other.html;
        }
        if self.site_name.is_empty() {
            self.site_name = other.site_name;
        }
        if self.image.is_empty() {
            self.image = other.image;
        }
        if self.image_width == 0 {
            self.image_width = other.image_width;
        }
        if self.image_height == 0 {
            self.image_height = other.image_height;
        }
    }

    /// Replaces all metadata fields from a fetcher result, leaving `url`,
    /// `favicon` and `idx` untouched.
    pub(crate) fn apply(&mut self, meta: Metadata) {
        self.title = meta.title;
        self.url_type = meta.url_type;
        self.description = meta.description;
        self.html = meta.html;
        self.site_name = meta.site_name;
        self.image = meta.image;
        self.image_width = meta.image_width;
        self.image_height = meta.image_height;
    }
}

/// Metadata produced by extractors, oEmbed decoding and plug-in fetchers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: String,
    pub url_type: String,
    pub description: String,
    pub html: String,
    pub site_name: String,
    pub image: String,
    pub image_width: u32,
    pub image_height: u32,
}

impl Metadata {
    /// At least one of title, description or image must be present for
    /// a fetcher result to count as a match.
    pub fn is_valid(&self) -> bool {
        !self.title.is_empty() || !self.description.is_empty() || !self.image.is_empty()
    }
}

/// First chunk of a fetched resource, capped at the configured body limit.
#[derive(Debug, Clone)]
pub struct PageChunk {
    /// Raw body prefix; at most `max_chunk_size` bytes.
    pub data: Vec<u8>,
    /// URL the resource was ultimately fetched from, after all redirects.
    pub final_url: Url,
    /// Content-Type verbatim from the response header.
    pub content_type: String,
}
