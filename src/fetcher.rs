use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::{Attempt, Policy};
use reqwest::{Client, Method, StatusCode};
use tracing::debug;
use url::Url;

use crate::error::UnfurlError;
use crate::security::{FilteringResolver, IpFilter};
use crate::types::PageChunk;

/// Default cap on how much of a body is fetched for extraction.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 * 1024;

/// User-Agent applied when no extra header supplies one.
pub const DEFAULT_USER_AGENT: &str = "unfurlist (https://github.com/Doist/unfurlist)";

/// Twitter serves real pages to crawler agents and captcha walls to
/// everything else.
const TWITTER_USER_AGENT: &str = "DiscourseBot/1.0";

const MAX_REDIRECTS: usize = 10;
const FAVICON_TIMEOUT: Duration = Duration::from_secs(3);

static RE_LOGIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)login|sign.?in").expect("login regex"));

/// Known login pages that escape the pattern above; compared with query and
/// fragment stripped.
static LOGIN_PAGES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "https://accounts.google.com/ServiceLogin",
        "https://www.amazon.com/ap/signin",
        "https://www.facebook.com/login.php",
        "https://www.fastcompany.com/user",
        "https://idmsa.apple.com/IDMSWebAuth/authenticate",
    ]
});

/// HTTP client wrapper owning transport policy: redirect guard, optional
/// dial-time IP filter, extra headers and User-Agent injection, plus the
/// capped chunk read.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    extra_headers: Arc<Vec<(String, String)>>,
    user_agent: String,
    max_chunk_size: usize,
}

impl Fetcher {
    /// Builds a client with the service's transport policy baked in.
    pub fn new(
        extra_headers: Vec<(String, String)>,
        user_agent: Option<String>,
        ip_filter: Option<IpFilter>,
        max_chunk_size: usize,
    ) -> Result<Self, UnfurlError> {
        let mut builder = Client::builder()
            .redirect(redirect_policy())
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            // stands in for a periodic idle-connection reaper
            .pool_idle_timeout(Duration::from_secs(120));
        if let Some(filter) = ip_filter {
            builder = builder.dns_resolver(Arc::new(FilteringResolver::new(filter)));
        }
        let client = builder.build()?;
        Ok(Self::with_client(client, extra_headers, user_agent, max_chunk_size))
    }

    /// Wraps a caller-provided client; transport policy is then the
    /// caller's responsibility, header injection still applies.
    pub fn with_client(
        client: Client,
        extra_headers: Vec<(String, String)>,
        user_agent: Option<String>,
        max_chunk_size: usize,
    ) -> Self {
        Fetcher {
            client,
            extra_headers: Arc::new(extra_headers),
            user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            max_chunk_size,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn request(&self, method: Method, url: &Url) -> reqwest::RequestBuilder {
        let mut rb = self.client.request(method, url.clone());
        let mut has_user_agent = false;
        for (k, v) in self.extra_headers.iter() {
            if k.eq_ignore_ascii_case("user-agent") {
                has_user_agent = true;
            }
            rb = rb.header(k.as_str(), v.as_str());
        }
        if !has_user_agent {
            let agent = if host_ends_with(url, "twitter.com") {
                TWITTER_USER_AGENT
            } else {
                self.user_agent.as_str()
            };
            rb = rb.header(USER_AGENT, agent);
        }
        rb
    }

    /// Plain GET with the configured headers applied.
    pub(crate) async fn get(&self, url: &Url) -> Result<reqwest::Response, UnfurlError> {
        Ok(self.request(Method::GET, url).send().await?)
    }

    /// GET with a per-request deadline tighter than the client timeout.
    pub(crate) async fn get_with_timeout(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> Result<reqwest::Response, UnfurlError> {
        Ok(self.request(Method::GET, url).timeout(timeout).send().await?)
    }

    /// Fetches the first `max_chunk_size` bytes of `url`, following
    /// redirects. A response with status >= 400 is an error but still
    /// reports the final URL so specialized fetchers can have a go at it.
    pub(crate) async fn fetch_chunk(&self, url: &Url) -> Result<PageChunk, UnfurlError> {
        let mut resp = self.get(url).await?;
        let status = resp.status();
        let final_url = resp.url().clone();
        if status >= StatusCode::BAD_REQUEST {
            return Err(UnfurlError::BadStatus {
                status,
                final_url: Box::new(final_url),
            });
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        // twitter/X sends unsolicited deflate-encoded responses violating
        // the RFC; their payload is a zlib stream.
        let zlib_wrapped = resp
            .headers()
            .get(CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes() == b"deflate")
            && (host_ends_with(&final_url, "twitter.com") || host_ends_with(&final_url, "x.com"));

        let mut data = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            if data.len() + chunk.len() >= self.max_chunk_size {
                data.extend_from_slice(&chunk[..self.max_chunk_size - data.len()]);
                break;
            }
            data.extend_from_slice(&chunk);
        }
        if zlib_wrapped {
            data = inflate_capped(&data, self.max_chunk_size)?;
        }
        debug!(url = %url, final_url = %final_url, bytes = data.len(), "fetched chunk");
        Ok(PageChunk {
            data,
            final_url,
            content_type,
        })
    }

    /// Probes `scheme://host/favicon.ico` with a HEAD request under a short
    /// deadline; returns the URL when the server confirms it exists.
    pub(crate) async fn probe_default_favicon(&self, final_url: &Url) -> Option<String> {
        let mut icon = final_url.clone();
        icon.set_path("/favicon.ico");
        icon.set_query(None);
        icon.set_fragment(None);
        let resp = self
            .request(Method::HEAD, &icon)
            .timeout(FAVICON_TIMEOUT)
            .send()
            .await
            .ok()?;
        (resp.status() == StatusCode::OK).then(|| icon.to_string())
    }
}

fn inflate_capped(data: &[u8], cap: usize) -> Result<Vec<u8>, UnfurlError> {
    let mut out = Vec::new();
    flate2::read::ZlibDecoder::new(data)
        .take(cap as u64)
        .read_to_end(&mut out)
        .map_err(|e| UnfurlError::Extract(format!("zlib body: {e}")))?;
    Ok(out)
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt: Attempt| {
        let previous = attempt.previous();
        if previous.len() > MAX_REDIRECTS {
            return attempt.error("stopped after 10 redirects");
        }
        if previous.last() == Some(attempt.url()) {
            return attempt.error("redirect loop");
        }
        if wants_login(attempt.url()) {
            return attempt.error("redirect target wants login");
        }
        attempt.follow()
    })
}

/// True when a redirect target looks like a login wall: pattern match on the
/// host or path, or an exact hit in the known login-pages table.
fn wants_login(u: &Url) -> bool {
    if RE_LOGIN.is_match(u.host_str().unwrap_or_default()) || RE_LOGIN.is_match(u.path()) {
        return true;
    }
    let mut stripped = u.clone();
    stripped.set_query(None);
    stripped.set_fragment(None);
    let stripped = stripped.as_str().trim_end_matches('/');
    LOGIN_PAGES.iter().any(|page| *page == stripped)
}

/// Host equality or dot-boundary suffix match, so `nottwitter.com` does not
/// pass for `twitter.com`.
pub(crate) fn host_ends_with(u: &Url, suffix: &str) -> bool {
    match u.host_str() {
        Some(host) => host == suffix || host.ends_with(&format!(".{suffix}")),
        None => false,
    }
}
