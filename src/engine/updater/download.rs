//! HTTP Transport
//!
//! Plain GET requests with the response body read incrementally.

use super::error::{Result, UpdateError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::debug;

/// Fetches a URL and returns the full body.
///
/// `on_chunk` receives the length of every chunk as it arrives.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, on_chunk: &mut (dyn FnMut(u64) + Send)) -> Result<Vec<u8>>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with a request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("UpdateKit/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, on_chunk: &mut (dyn FnMut(u64) + Send)) -> Result<Vec<u8>> {
        debug!(url, "GET");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network {
                message: format!("HTTP {} from {}", status, url),
                status: Some(status.as_u16()),
            });
        }

        let mut body = match response.content_length() {
            Some(len) => Vec::with_capacity(len as usize),
            None => Vec::new(),
        };

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result?;
            body.extend_from_slice(&chunk);
            on_chunk(chunk.len() as u64);
        }

        Ok(body)
    }
}

/// Append `channel` as a query parameter to the manifest URL
pub fn manifest_request_url(base: &str, channel: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| UpdateError::network(format!("invalid manifest URL {}: {}", base, e)))?;
    url.query_pairs_mut().append_pair("channel", channel);
    Ok(url.into())
}
