//! Fetch capability
//!
//! The cache never performs transport itself. Callers inject a [`Fetcher`];
//! [`HttpFetcher`] is the default, backed by `reqwest`.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use cachet_foundation::{Error, Result};

use crate::cache::Payload;

/// Request parameters that shape both the fetch and its cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Upper bound on the fetch; does not affect the cache key
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A completed response, body fully buffered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// 2xx status
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json(&self) -> Result<Payload> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Serialization(format!("response body is not JSON: {}", e)))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Encode the body as a base64 `data:` URL
    pub fn to_data_url(&self) -> String {
        let mime = self
            .content_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        format!("data:{};base64,{}", mime, BASE64.encode(&self.body))
    }
}

/// Network transport used by the read-through workflows
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &RequestOptions) -> Result<FetchResponse>;
}
