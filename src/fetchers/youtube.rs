use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, StatusCode};
use url::Url;

use super::MetadataFetcher;
use crate::fetcher::DEFAULT_USER_AGENT;
use crate::oembed;
use crate::types::Metadata;

const OEMBED_TIMEOUT: Duration = Duration::from_secs(3);

/// Queries the YouTube oEmbed endpoint directly for watch and short-link
/// URLs. YouTube sometimes serves a captcha-walled page that carries no
/// discovery link, so this fetcher doubles as the fallback when the chunk
/// fetch itself fails.
pub struct YoutubeFetcher;

#[async_trait]
impl MetadataFetcher for YoutubeFetcher {
    async fn fetch(&self, client: &Client, url: &Url) -> Option<Metadata> {
        let endpoint = oembed_endpoint(url)?;
        let resp = client
            .get(endpoint)
            .timeout(OEMBED_TIMEOUT)
            .header(USER_AGENT, DEFAULT_USER_AGENT)
            .send()
            .await
            .ok()?;
        if resp.status() != StatusCode::OK {
            return None;
        }
        let body = resp.text().await.ok()?;
        oembed::from_json(&body).ok()
    }
}

fn oembed_endpoint(u: &Url) -> Option<Url> {
    let host = u.host_str()?;
    let is_watch = host == "www.youtube.com"
        && u.path() == "/watch"
        && u.query().is_some_and(|q| q.starts_with("v="));
    let is_short = host == "youtu.be" && u.path().len() > 1;
    if !is_watch && !is_short {
        return None;
    }
    let mut endpoint = Url::parse("https://www.youtube.com/oembed").expect("static url");
    endpoint
        .query_pairs_mut()
        .append_pair("format", "json")
        .append_pair("url", u.as_str());
    Some(endpoint)
}
