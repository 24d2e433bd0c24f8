use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::basic_html;
use crate::blocklist::{title_blocklisted, PrefixSet};
use crate::cache::{self, Cache};
use crate::error::UnfurlError;
use crate::favicon;
use crate::fetcher::{Fetcher, DEFAULT_MAX_CHUNK_SIZE};
use crate::fetchers::MetadataFetcher;
use crate::image::{self, ImageProxy};
use crate::oembed;
use crate::opengraph;
use crate::security::IpFilter;
use crate::singleflight::FlightGroup;
use crate::types::{PageChunk, Preview};
use crate::url_extractor;

/// Maximum number of URLs processed per request unless configured otherwise.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Pluggable oEmbed lookup-by-URL, replacing the embedded provider table.
pub type OembedLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Service configuration. All options are orthogonal; the defaults give a
/// working service with no cache, no blocklists and the embedded oEmbed
/// provider table.
#[derive(Default)]
pub struct UnfurlConfig {
    /// Client for all outgoing requests; when unset one is built with the
    /// service transport policy (redirect guard, timeouts, IP filter).
    pub http_client: Option<reqwest::Client>,
    /// Key-value store for finished previews.
    pub cache: Option<Arc<dyn Cache>>,
    /// Header key/value pairs added to each outgoing request, in order.
    pub extra_headers: Vec<(String, String)>,
    /// User-Agent fallback for requests without one from `extra_headers`.
    pub user_agent: Option<String>,
    /// URL prefixes that short-circuit processing.
    pub blocklist_prefixes: Vec<String>,
    /// Title substrings that invalidate an extracted match.
    pub blocklist_titles: Vec<String>,
    /// Probe image width/height when extractors did not provide them.
    pub fetch_image_size: bool,
    pub max_results: usize,
    pub max_chunk_size: usize,
    /// Domain-specialized fetchers, tried in order before the extractors.
    pub fetchers: Vec<Arc<dyn MetadataFetcher>>,
    pub oembed_lookup: Option<OembedLookup>,
    /// Rewrite plaintext-HTTP preview images through this proxy.
    pub image_proxy: Option<ImageProxy>,
    /// Dial-time address filtering for outgoing connections.
    pub ip_filter: Option<IpFilter>,
}

impl UnfurlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_extra_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    pub fn with_blocklist_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocklist_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blocklist_titles<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocklist_titles = titles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_image_dimensions(mut self, enable: bool) -> Self {
        self.fetch_image_size = enable;
        self
    }

    pub fn with_max_results(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_results = n;
        }
        self
    }

    pub fn with_max_chunk_size(mut self, n: usize) -> Self {
        if n > 0 {
            self.max_chunk_size = n;
        }
        self
    }

    pub fn with_fetchers(mut self, fetchers: Vec<Arc<dyn MetadataFetcher>>) -> Self {
        self.fetchers = fetchers;
        self
    }

    pub fn with_oembed_lookup(mut self, lookup: OembedLookup) -> Self {
        self.oembed_lookup = Some(lookup);
        self
    }

    pub fn with_image_proxy(mut self, proxy_url: &str, secret: &str) -> Self {
        self.image_proxy = Some(ImageProxy::new(proxy_url, secret));
        self
    }

    pub fn with_ip_filter(mut self, filter: IpFilter) -> Self {
        self.ip_filter = Some(filter);
        self
    }
}

/// The unfurling engine: extracts URLs from request content and runs the
/// per-URL pipeline (blocklist, cache, single-flight, fetch, extractors,
/// image post-processing) for each of them.
pub struct UnfurlService {
    fetcher: Fetcher,
    cache: Option<Arc<dyn Cache>>,
    prefix_blocklist: Option<PrefixSet>,
    /// Lowercased at construction; matching is substring-based.
    title_blocklist: Vec<String>,
    fetchers: Vec<Arc<dyn MetadataFetcher>>,
    oembed_lookup: OembedLookup,
    image_proxy: Option<ImageProxy>,
    fetch_image_size: bool,
    max_results: usize,
    inflight: FlightGroup,
}

impl UnfurlService {
    pub fn new(config: UnfurlConfig) -> Result<Self, UnfurlError> {
        let max_chunk_size = if config.max_chunk_size > 0 {
            config.max_chunk_size
        } else {
            DEFAULT_MAX_CHUNK_SIZE
        };
        let fetcher = match config.http_client {
            Some(client) => Fetcher::with_client(
                client,
                config.extra_headers,
                config.user_agent,
                max_chunk_size,
            ),
            None => Fetcher::new(
                config.extra_headers,
                config.user_agent,
                config.ip_filter,
                max_chunk_size,
            )?,
        };
        let oembed_lookup = config.oembed_lookup.unwrap_or_else(|| {
            let table = oembed::default_providers();
            Arc::new(move |url: &str| table.lookup(url))
        });
        Ok(UnfurlService {
            fetcher,
            cache: config.cache,
            prefix_blocklist: PrefixSet::new(config.blocklist_prefixes),
            title_blocklist: config
                .blocklist_titles
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            fetchers: config.fetchers,
            oembed_lookup,
            image_proxy: config.image_proxy,
            fetch_image_size: config.fetch_image_size,
            max_results: if config.max_results > 0 {
                config.max_results
            } else {
                DEFAULT_MAX_RESULTS
            },
            inflight: FlightGroup::new(),
        })
    }

    /// Extracts up to `max_results` candidate URLs from free-form text.
    pub fn extract_urls(&self, content: &str, markdown: bool) -> Vec<String> {
        if markdown {
            url_extractor::parse_markdown_urls(content, self.max_results)
        } else {
            url_extractor::parse_urls(content, self.max_results)
        }
    }

    /// Fans out one task per URL and reassembles the previews in input
    /// order. Cancel `cancel` (or drop the future) to abandon the request;
    /// in-flight executions shared with other requests keep their waiters
    /// correct through the single-flight registry.
    pub async fn unfurl_all(
        self: Arc<Self>,
        cancel: CancellationToken,
        urls: Vec<String>,
    ) -> Vec<Preview> {
        let mut tasks = JoinSet::new();
        for (idx, link) in urls.into_iter().enumerate() {
            let service = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { service.process_url_idx(&cancel, idx, &link).await });
        }
        let mut results = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Ok(preview) = joined {
                results.push(preview);
            }
        }
        results.sort_by_key(|p| p.idx);
        for preview in &mut results {
            preview.normalize();
        }
        results
    }

    /// Convenience wrapper: extract then unfurl.
    pub async fn unfurl(
        self: Arc<Self>,
        cancel: CancellationToken,
        content: &str,
        markdown: bool,
    ) -> Vec<Preview> {
        let urls = self.extract_urls(content, markdown);
        self.unfurl_all(cancel, urls).await
    }

    /// Wraps the pipeline in the single-flight registry and stamps the
    /// caller's index on a private copy of the shared result. When the
    /// shared result is bare (its originator was canceled early) and this
    /// caller is still live, the pipeline is re-executed.
    async fn process_url_idx(
        &self,
        cancel: &CancellationToken,
        idx: usize,
        link: &str,
    ) -> Preview {
        let (shared_result, shared) = self
            .inflight
            .run(link, || self.process_url(link))
            .await;
        let mut result = (*shared_result).clone();
        if shared && result.is_bare() && !cancel.is_cancelled() {
            result = self.process_url(link).await;
        }
        result.idx = idx;
        result
    }

    /// The per-URL pipeline. Always returns a result; on any failure that
    /// result degrades to the bare `{url}` record.
    async fn process_url(&self, link: &str) -> Preview {
        let mut result = Preview::new(link);

        if let Some(blocklist) = &self.prefix_blocklist {
            if blocklist.matches(link) {
                info!(url = %link, "blocklisted");
                return result;
            }
        }

        let key = cache::cache_key(link);
        if let Some(store) = &self.cache {
            if let Some(value) = store.get(&key).await {
                match cache::decode(&value) {
                    Ok(cached) => {
                        info!(url = %link, "cache hit");
                        return cached;
                    }
                    Err(err) => debug!(url = %link, error = %err, "stale cache entry ignored"),
                }
            }
        }

        // Optimistically match the URL we already have against the provider
        // table; on a hit the page itself never needs to be fetched, which
        // also sidesteps captcha walls shown to datacenter addresses.
        let mut matched = false;
        if let Some(endpoint) = (self.oembed_lookup)(link) {
            if let Ok(meta) = oembed::fetch(&self.fetcher, &endpoint).await {
                result.merge(meta);
                matched = true;
            }
        }

        if !matched {
            match self.fetch_chunk(link).await {
                Err(err) => {
                    debug!(url = %link, error = %err, "chunk fetch failed");
                    // a specialized fetcher may still recognize the final URL
                    if let Some(final_url) = err.final_url() {
                        for fetcher in &self.fetchers {
                            match fetcher.fetch(self.fetcher.client(), final_url).await {
                                Some(meta) if meta.is_valid() => {
                                    result.apply(meta);
                                    matched = true;
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                    if !matched {
                        return result;
                    }
                }
                Ok(chunk) => {
                    if let Some(icon) = self.favicon_lookup(&chunk).await {
                        result.favicon = icon;
                    }
                    for fetcher in &self.fetchers {
                        match fetcher.fetch(self.fetcher.client(), &chunk.final_url).await {
                            Some(meta) if meta.is_valid() => {
                                result.apply(meta);
                                matched = true;
                                break;
                            }
                            _ => {}
                        }
                    }
                    if !matched {
                        if let Some(meta) = opengraph::parse(&chunk) {
                            if !title_blocklisted(&self.title_blocklist, &meta.title) {
                                result.merge(meta);
                                matched = true;
                            }
                        }
                    }
                    if !matched {
                        if let Some(endpoint) = self.oembed_endpoint(&chunk) {
                            if let Ok(meta) = oembed::fetch(&self.fetcher, &endpoint).await {
                                result.merge(meta);
                                matched = true;
                            }
                        }
                    }
                    if !matched {
                        let meta = basic_html::parse(&chunk);
                        if !title_blocklisted(&self.title_blocklist, &meta.title) {
                            result.merge(meta);
                        }
                    }
                }
            }
        }

        self.finish_image(&mut result).await;

        if let Some(store) = &self.cache {
            if !result.is_empty() {
                match cache::encode(&result) {
                    Ok(value) => {
                        info!(url = %link, "cache update");
                        store.set(&key, value).await;
                    }
                    Err(err) => debug!(url = %link, error = %err, "cache encode failed"),
                }
            }
        }
        result
    }

    async fn fetch_chunk(&self, link: &str) -> Result<PageChunk, UnfurlError> {
        let parsed = Url::parse(link)?;
        self.fetcher.fetch_chunk(&parsed).await
    }

    /// Favicon for the fetched page: the first `<link rel="icon">` resolved
    /// against the final URL, else a HEAD probe of `/favicon.ico`.
    async fn favicon_lookup(&self, chunk: &PageChunk) -> Option<String> {
        if chunk.content_type.starts_with("text/html") {
            if let Some(href) = favicon::extract_link(&chunk.data, &chunk.content_type) {
                return match chunk.final_url.join(&href) {
                    Ok(resolved) => Some(resolved.to_string()),
                    Err(_) => None,
                };
            }
        }
        self.fetcher.probe_default_favicon(&chunk.final_url).await
    }

    /// oEmbed endpoint for a fetched chunk: provider-table match on the
    /// final URL first, then in-document discovery.
    fn oembed_endpoint(&self, chunk: &PageChunk) -> Option<String> {
        if let Some(endpoint) = (self.oembed_lookup)(chunk.final_url.as_str()) {
            return Some(endpoint);
        }
        oembed::discover(&chunk.data, &chunk.content_type)
    }

    /// Image post-processing: make the image URL absolute and validated,
    /// probe dimensions if configured, route plaintext HTTP through the
    /// image proxy.
    async fn finish_image(&self, result: &mut Preview) {
        if result.image.is_empty() {
            return;
        }
        match image::absolute_url(&result.url, &result.image) {
            Ok(absolute) if url_extractor::valid_url(&absolute) => result.image = absolute,
            Ok(_) | Err(_) => {
                warn!(url = %result.url, image = %result.image, "dropping unusable image url");
                result.image.clear();
                result.image_width = 0;
                result.image_height = 0;
                return;
            }
        }
        if self.fetch_image_size && (result.image_width == 0 || result.image_height == 0) {
            match image::dimensions(&self.fetcher, &result.image).await {
                Ok((width, height)) => {
                    result.image_width = width;
                    result.image_height = height;
                }
                Err(err) => debug!(image = %result.image, error = %err, "dimensions probe failed"),
            }
        }
        if let Some(proxy) = &self.image_proxy {
            result.image = proxy.rewrite(&result.image);
        }
    }
}
