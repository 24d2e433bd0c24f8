use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::MetadataFetcher;
use crate::types::Metadata;

/// File extensions treated as directly-linked videos.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".m4v", ".3gp", ".webm", ".mkv"];

/// Marks direct video links on known hosts and points the preview image at
/// the sidecar thumbnail the hosting pipeline renders next to each upload
/// (same URL with a `.thumb` suffix).
pub struct VideoThumbsFetcher {
    hosts: HashSet<String>,
}

impl VideoThumbsFetcher {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        VideoThumbsFetcher {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl MetadataFetcher for VideoThumbsFetcher {
    async fn fetch(&self, _client: &Client, url: &Url) -> Option<Metadata> {
        let host = url.host_str()?;
        if !self.hosts.contains(host) {
            return None;
        }
        let path = url.path().to_ascii_lowercase();
        if !VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return None;
        }
        Some(Metadata {
            url_type: "video".to_string(),
            image: format!("{url}.thumb"),
            ..Metadata::default()
        })
    }
}
