//! # unfurl
//!
//! A concurrent URL unfurling engine: give it free-form text, get back a
//! compact metadata record (title, description, type, image, favicon, site
//! name) for every HTTP(S) URL the text contains, in input order.
//!
//! ## Features
//!
//! - **Concurrent fan-out**: every URL of a request is processed in
//!   parallel, results are reassembled in input order and the whole request
//!   honors client cancellation.
//! - **Single-flight + cache**: concurrent requests for the same URL share
//!   one pipeline execution, finished previews are memoized in a pluggable
//!   key-value cache (Snappy-compressed JSON under a SHA-1 key).
//! - **Prioritized extraction**: oEmbed lookup by URL pattern, Open Graph,
//!   oEmbed discovery, `<title>`/`<meta>` fallback, favicon discovery and
//!   domain-specialized fetchers (YouTube, Google Maps, video thumbnails).
//! - **Defensive transport**: redirect guard with login/loop detection,
//!   optional dial-time IP blocklist, streaming body cap, charset-aware
//!   decoding of multibyte HTML.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unfurl::{router, UnfurlConfig, UnfurlService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Arc::new(UnfurlService::new(UnfurlConfig::new())?);
//!     let app = router(service);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! The endpoint accepts GET and POST with `content` as the main argument
//! and returns a JSON-encoded list of previews:
//!
//! ```text
//! ?content=Check+this+out+https://www.youtube.com/watch?v=dQw4w9WgXcQ
//! ```
//!
//! ```json
//! [
//!   {
//!     "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
//!     "title": "Rick Astley - Never Gonna Give You Up (Video)",
//!     "url_type": "video",
//!     "site_name": "YouTube",
//!     "image": "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg"
//!   }
//! ]
//! ```
//!
//! Attributes a page lacks are omitted; `callback=…` wraps the response in
//! JSONP; `markdown=true` extracts URLs context-aware, skipping code spans
//! and preformatted blocks.
//!
//! ## Deployment note
//!
//! Unfurling fetches attacker-chosen URLs. When running inside an internal
//! network either enable the dial-time IP filter
//! ([`UnfurlConfig::with_ip_filter`]) or isolate the process in a subnet
//! that has no route to internal endpoints.

mod basic_html;
mod blocklist;
mod cache;
mod charset;
mod error;
mod favicon;
mod fetcher;
mod fetchers;
mod handler;
mod image;
mod logging;
mod oembed;
mod opengraph;
mod security;
mod service;
mod singleflight;
mod sniff;
mod types;
mod url_extractor;

pub use cache::{cache_key, Cache, MemoryCache};
pub use error::UnfurlError;
pub use fetcher::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_USER_AGENT};
pub use fetchers::{
    GoogleMapsFetcher, MetadataFetcher, VideoThumbsFetcher, YoutubeFetcher,
};
pub use handler::router;
pub use image::ImageProxy;
pub use logging::{setup_logging, LogConfig};
pub use oembed::ProviderIndex;
pub use security::IpFilter;
pub use service::{OembedLookup, UnfurlConfig, UnfurlService, DEFAULT_MAX_RESULTS};
pub use types::{Metadata, PageChunk, Preview};
pub use url_extractor::{parse_markdown_urls, parse_urls, valid_url};
