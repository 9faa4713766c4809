//! reqwest-backed fetcher

use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::debug;

use cachet_foundation::{Error, Result};

use super::{FetchResponse, Fetcher, RequestOptions};

const USER_AGENT: &str = concat!("cachet/", env!("CARGO_PKG_VERSION"));

/// Default [`Fetcher`] over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Client-wide timeout; per-request timeouts still apply on top
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn map_reqwest(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(url.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse> {
        let method = Method::from_bytes(options.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::InvalidInput(format!("invalid HTTP method '{}'", options.method)))?;

        let mut request = self.client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| map_reqwest(url, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| map_reqwest(url, e))?;

        debug!(url = %url, status, bytes = body.len(), "fetched");
        Ok(FetchResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}
