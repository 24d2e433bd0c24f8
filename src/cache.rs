use std::fmt::Write as _;

use async_trait::async_trait;
use dashmap::DashMap;
use sha1::{Digest, Sha1};

use crate::error::UnfurlError;
use crate::types::Preview;

/// Key-value store for finished previews. Implementations wrap whatever
/// backend the deployment uses (typically a memcached-compatible client);
/// values are opaque bytes produced by [`encode`].
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>);
}

/// Cache key for a URL: lowercase hex SHA-1, which is safe for key-length
/// and character restrictions of memcached-style stores.
pub fn cache_key(url: &str) -> String {
    let digest = Sha1::digest(url.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Serializes a preview for storage: JSON, then Snappy.
pub fn encode(preview: &Preview) -> Result<Vec<u8>, UnfurlError> {
    let json = serde_json::to_vec(preview).map_err(|e| UnfurlError::CacheCodec(e.to_string()))?;
    snap::raw::Encoder::new()
        .compress_vec(&json)
        .map_err(|e| UnfurlError::CacheCodec(e.to_string()))
}

/// Inverse of [`encode`]. Any corruption surfaces as an error and is
/// treated as a cache miss by the worker.
pub fn decode(value: &[u8]) -> Result<Preview, UnfurlError> {
    let json = snap::raw::Decoder::new()
        .decompress_vec(value)
        .map_err(|e| UnfurlError::CacheCodec(e.to_string()))?;
    serde_json::from_slice(&json).map_err(|e| UnfurlError::CacheCodec(e.to_string()))
}

/// Process-local cache for deployments without an external store, and for
/// tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    async fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
    }
}
