use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

/// Errors produced while unfurling a single URL or configuring the service.
///
/// Per-URL failures are never surfaced to HTTP clients; the worker swallows
/// them and falls back to the next extraction strategy or to a bare result.
#[derive(Debug, Error)]
pub enum UnfurlError {
    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("request failed: {0}")]
    Fetch(#[from] reqwest::Error),

    /// Server answered with an error status. The final URL (after all
    /// redirects) is kept so domain-specialized fetchers can still run.
    #[error("bad response status: {status}")]
    BadStatus { status: StatusCode, final_url: Box<Url> },

    #[error("unsupported content type: {0}")]
    InvalidContentType(String),

    #[error("failed to extract metadata: {0}")]
    Extract(String),

    #[error("cache codec error: {0}")]
    CacheCodec(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl UnfurlError {
    /// Final URL carried by a failed fetch, if the response got far enough
    /// to know it.
    pub fn final_url(&self) -> Option<&Url> {
        match self {
            UnfurlError::BadStatus { final_url, .. } => Some(final_url),
            _ => None,
        }
    }
}
