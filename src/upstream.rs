//! One-shot outbound fetch of the relayed URL.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use reqwest::Client;
use thiserror::Error;
use url::Url;

use crate::transform::is_html;

/// Request headers the transport sets for itself.
///
/// `accept-encoding` is included so the client negotiates (and decodes)
/// compression on its own; the HTML path needs plain text.
const TRANSPORT_MANAGED: &[&str] = &["host", "content-length", "accept-encoding"];

#[derive(Debug, Error)]
#[error("{0}")]
pub struct UpstreamError(String);

impl UpstreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest's Display omits the cause chain (DNS, TLS, connect...).
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self(message)
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    /// Only sent for methods other than GET and HEAD.
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamBody {
    /// HTML decoded with the charset announced by the origin.
    Text(String),
    Bytes(Bytes),
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    pub body: UpstreamBody,
    /// Where the request ended up after redirects.
    pub final_url: Url,
}

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Removes headers the outbound transport owns.
pub fn outbound_headers(mut headers: HeaderMap) -> HeaderMap {
    for name in TRANSPORT_MANAGED {
        headers.remove(*name);
    }
    headers
}

/// [`Upstream`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let UpstreamRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let sends_body = method != Method::GET && method != Method::HEAD;
        let mut builder = self
            .client
            .request(method, url)
            .headers(outbound_headers(headers));
        if let Some(body) = body.filter(|_| sends_body) {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        tracing::debug!(%status, %final_url, content_type = ?content_type, "upstream responded");

        let body = if content_type.as_deref().is_some_and(is_html) {
            UpstreamBody::Text(response.text().await?)
        } else {
            UpstreamBody::Bytes(response.bytes().await?)
        };

        Ok(UpstreamResponse {
            status,
            headers,
            content_type,
            body,
            final_url,
        })
    }
}
