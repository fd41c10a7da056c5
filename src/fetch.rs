// Raw feed retrieval over HTTP.
//
// Blocking on purpose: callers run fetches inside spawn_blocking so a slow
// upstream never ties up an executor thread. Retry policy lives with the
// TTL mechanism in the cache, not here.

use bytes::Bytes;
use reqwest::blocking;

use crate::error::{Result, TransitError};

const REQUEST_TIMEOUT_SECS: u64 = 20;

/// Fetches raw bytes for one feed URL. Implemented over HTTP in
/// production; tests substitute a canned-bytes stub.
pub trait FeedFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Bytes>;
}

#[derive(Default)]
pub struct HttpFetcher;

fn create_http_client() -> Result<blocking::Client> {
    blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| TransitError::Transport(format!("failed to create HTTP client: {}", e)))
}

impl FeedFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Bytes> {
        let client = create_http_client()?;

        let response = client
            .get(url)
            .send()
            .map_err(|e| TransitError::Transport(format!("failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(TransitError::Transport(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .map_err(|e| TransitError::Transport(format!("failed to read {}: {}", url, e)))?;

        Ok(body)
    }
}
