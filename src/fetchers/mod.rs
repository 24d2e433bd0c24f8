//! Domain-specialized metadata fetchers. Fetchers run before the generic
//! extractor pipeline; the first one returning valid metadata wins. They are
//! supplied at service construction time, no dynamic loading.

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::types::Metadata;

mod googlemaps;
mod video_thumbs;
mod youtube;

pub use googlemaps::GoogleMapsFetcher;
pub use video_thumbs::VideoThumbsFetcher;
pub use youtube::YoutubeFetcher;

/// A plug-in recognizing some family of URLs and producing metadata for
/// them directly. Returning `None` means "not mine, ask the next one";
/// a `Some` result only counts when [`Metadata::is_valid`] holds.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, client: &Client, url: &Url) -> Option<Metadata>;
}
