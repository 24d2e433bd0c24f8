//! Image post-processing: resolving preview images to absolute URLs,
//! probing their dimensions without downloading full pixel data, and
//! rewriting plaintext-HTTP images through a signing proxy.

use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use image::ImageReader;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use sha1::{Digest, Sha1};
use url::Url;

use crate::error::UnfurlError;
use crate::fetcher::Fetcher;

/// Enough of a file to cover headers-with-EXIF for the supported formats.
const DIMENSION_PROBE_LIMIT: usize = 256 * 1024;

const DIMENSION_TIMEOUT: Duration = Duration::from_secs(3);

const SUPPORTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif"];

/// Resolves `image` against `base`, e.g. `/logo.png` fetched from
/// `https://a.example/x/y` becomes `https://a.example/logo.png`.
pub fn absolute_url(base: &str, image: &str) -> Result<String, UnfurlError> {
    if image.is_empty() {
        return Err(UnfurlError::Extract("empty image url".to_string()));
    }
    let base = Url::parse(base)?;
    Ok(base.join(image)?.to_string())
}

/// Fetches just enough of an image to learn its dimensions. Only jpeg, png
/// and gif are probed; everything else is not worth a request round-trip.
pub async fn dimensions(fetcher: &Fetcher, image_url: &str) -> Result<(u32, u32), UnfurlError> {
    let image_url = if image_url.starts_with("//") {
        // scheme-relative url, assume plain http
        format!("http:{image_url}")
    } else if image_url.starts_with("http") {
        image_url.to_string()
    } else {
        return Err(UnfurlError::Extract(format!(
            "unsupported image url {image_url:?}"
        )));
    };
    let u = Url::parse(&image_url)?;
    let mut resp = fetcher.get_with_timeout(&u, DIMENSION_TIMEOUT).await?;
    if resp.status() >= StatusCode::BAD_REQUEST {
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
    // prefix match tolerates broken servers sending image/png;charset=UTF-8
    if !SUPPORTED_IMAGE_TYPES.iter().any(|t| ct.starts_with(t)) {
        return Err(UnfurlError::InvalidContentType(ct));
    }
    let mut head = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        head.extend_from_slice(&chunk);
        if head.len() >= DIMENSION_PROBE_LIMIT {
            break;
        }
    }
    ImageReader::new(Cursor::new(head))
        .with_guessed_format()
        .map_err(|e| UnfurlError::Extract(format!("image format: {e}")))?
        .into_dimensions()
        .map_err(|e| UnfurlError::Extract(format!("image dimensions: {e}")))
}

/// Rewrites plaintext-HTTP image URLs through a proxy so that previews can
/// be embedded on https pages without mixed-content warnings.
#[derive(Debug, Clone)]
pub struct ImageProxy {
    proxy_url: String,
    /// SHA-1 of the configured secret, used as the HMAC key.
    key: Option<[u8; 20]>,
}

impl ImageProxy {
    /// `proxy_url` is used verbatim with `?u=<image>&h=<signature>`
    /// appended; it must not carry its own query string. An empty secret
    /// disables signing.
    pub fn new(proxy_url: impl Into<String>, secret: &str) -> Self {
        let key = if secret.is_empty() {
            None
        } else {
            Some(Sha1::digest(secret.as_bytes()).into())
        };
        ImageProxy {
            proxy_url: proxy_url.into(),
            key,
        }
    }

    /// Returns the proxied form of `image`, or the original URL when it is
    /// already https.
    pub fn rewrite(&self, image: &str) -> String {
        if !image.starts_with("http://") {
            return image.to_string();
        }
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("u", image);
        if let Some(key) = &self.key {
            let mut mac =
                Hmac::<Sha1>::new_from_slice(key).expect("hmac accepts any key length");
            mac.update(image.as_bytes());
            let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
            query.append_pair("h", &signature);
        }
        format!("{}?{}", self.proxy_url, query.finish())
    }
}
